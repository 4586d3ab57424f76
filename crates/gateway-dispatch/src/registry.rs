// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler Registry (spec §4.7): a keyed mapping from `event_type` —
//! including the dynamic tail, e.g. `interaction.command.leaderboard` — to
//! a handler. Populated once at process start; the 20+ business handlers
//! themselves are out of scope (spec §1), so this is the seam they plug
//! into.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_types::{Disposition, ErrorKind, Envelope};

use crate::context::DispatchContext;

/// What a handler reports back to the Dispatcher (spec §4.4 step 7).
pub struct HandlerOutcome {
    pub disposition: Disposition,
    pub error_kind: Option<ErrorKind>,
}

impl HandlerOutcome {
    pub fn ack() -> Self {
        Self { disposition: Disposition::Ack, error_kind: None }
    }

    pub fn drop() -> Self {
        Self { disposition: Disposition::Drop, error_kind: None }
    }

    /// A permanent failure (validation, 4xx from the platform, unknown
    /// event type): routed to the DLQ rather than acked (spec §4.3 step 6).
    pub fn drop_with(kind: ErrorKind) -> Self {
        Self { disposition: Disposition::DropDlq, error_kind: Some(kind) }
    }

    pub fn retry(kind: ErrorKind) -> Self {
        Self { disposition: Disposition::Retry, error_kind: Some(kind) }
    }
}

/// One business handler. Handlers depend on [`DispatchContext`] (an
/// interface bundle — tenant config, `RestReplier`, State Store, logger
/// fields, cancellation), never on each other (Design Notes §9).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &DispatchContext, envelope: &Envelope) -> HandlerOutcome;
}

/// Keyed registry of handlers, plus a default fallback for unmatched
/// `event_type`s (spec §4.7, SPEC_FULL §4.7 `register_default`).
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    default: Option<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under an exact `event_type` routing key.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    /// Register the fallback invoked when no exact match exists. The
    /// Worker's built-in fallback acks with an "Unknown command" reply
    /// (spec §4.7).
    pub fn register_default(&mut self, handler: Arc<dyn Handler>) {
        self.default = Some(handler);
    }

    /// Look up the handler for an exact `event_type`, falling back to the
    /// default if registered. Command names are authoritative here, not at
    /// the Ingestor (spec §4.7).
    pub fn resolve(&self, event_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(event_type).cloned().or_else(|| self.default.clone())
    }

    /// Introspection used by the Worker's startup log line and a debug
    /// admin endpoint (SPEC_FULL §4.7).
    pub fn registered_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// The Worker's built-in "Unknown command" fallback.
pub struct UnknownCommandHandler;

#[async_trait]
impl Handler for UnknownCommandHandler {
    async fn handle(&self, ctx: &DispatchContext, envelope: &Envelope) -> HandlerOutcome {
        if envelope.is_interaction() {
            let _ = ctx
                .rest
                .send_followup(&envelope.interaction_token.clone().unwrap_or_default(), "Unknown command")
                .await;
        }
        HandlerOutcome::ack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::FakeRestReplier;
    use gateway_tenant::TenantContext;
    use gateway_types::TenantConfig;

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn handle(&self, _ctx: &DispatchContext, _envelope: &Envelope) -> HandlerOutcome {
            HandlerOutcome::ack()
        }
    }

    fn sample_context(rest: Arc<FakeRestReplier>) -> DispatchContext {
        let tenant = TenantContext {
            tenant_id: "g1".into(),
            user_id: Some("u1".into()),
            tier: gateway_types::Tier::Free,
            config: TenantConfig::default_for("g1", 0),
        };
        DispatchContext::new(tenant, rest, tokio_util::sync::CancellationToken::new())
    }

    #[test]
    fn exact_match_wins_over_default() {
        let mut registry = HandlerRegistry::new();
        registry.register("interaction.command.stats", Arc::new(EchoHandler));
        registry.register_default(Arc::new(UnknownCommandHandler));

        assert!(registry.resolve("interaction.command.stats").is_some());
        assert_eq!(registry.registered_kinds(), vec!["interaction.command.stats"]);
    }

    #[tokio::test]
    async fn unmatched_falls_through_to_default() {
        let mut registry = HandlerRegistry::new();
        registry.register_default(Arc::new(UnknownCommandHandler));
        let handler = registry.resolve("interaction.command.nonexistent").expect("default present");

        let rest = Arc::new(FakeRestReplier::new());
        let ctx = sample_context(Arc::clone(&rest));
        let envelope = crate::dispatcher::tests::sample_command_envelope("nonexistent");
        let outcome = handler.handle(&ctx, &envelope).await;
        assert_eq!(outcome.disposition, Disposition::Ack);
    }
}
