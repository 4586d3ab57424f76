// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Dispatcher (spec §4.4): per-delivery tenant resolution,
//! authorization, rate limiting, the hard 2.5s deferral deadline, handler
//! invocation, and the single seam through which every failure path
//! reports a [`Disposition`] back to the Consumer (Design Notes §9).

use std::sync::Arc;
use std::time::Duration;

use gateway_state::{epoch_ms, StateStore};
use gateway_tenant::{RateLimiter, TenantManager};
use gateway_types::envelope::{EventData, InteractionMember};
use gateway_types::{CustomId, Disposition, Envelope, ErrorKind, EventKind};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::context::DispatchContext;
use crate::metrics;
use crate::registry::HandlerRegistry;
use crate::rest::RestReplier;

/// Context lifetime handed to interaction handlers (spec §5): tighter than
/// the platform's 15-minute followup window by design.
const HANDLER_DEADLINE: Duration = Duration::from_secs(15);

/// Stable, testable user-visible strings (spec §7).
pub mod messages {
    pub const NOT_CONFIGURED: &str = "This server is not configured.";
    pub const ADMIN_REQUIRED: &str = "Administrator permissions required";
    pub const RATE_LIMITED_PREFIX: &str = "Rate limit exceeded; retry in";
    pub const SESSION_EXPIRED: &str = "Session expired";
    pub const ONBOARDING: &str = "This server has not completed onboarding.";
}

/// What the Dispatcher decided for one delivery, plus the failure kind
/// when disposition isn't a plain success.
pub struct DispatchOutcome {
    pub disposition: Disposition,
    pub error_kind: Option<ErrorKind>,
}

impl DispatchOutcome {
    fn ack() -> Self {
        Self { disposition: Disposition::Ack, error_kind: None }
    }

    fn drop_silent() -> Self {
        Self { disposition: Disposition::Drop, error_kind: None }
    }

    /// Permanent failure or missed deadline: routed to the DLQ rather than
    /// acked, so it isn't silently discarded (spec §4.3 step 6, §4.4 step 5).
    fn drop_dlq(kind: ErrorKind) -> Self {
        Self { disposition: Disposition::DropDlq, error_kind: Some(kind) }
    }

    fn retry(kind: ErrorKind) -> Self {
        Self { disposition: Disposition::Retry, error_kind: Some(kind) }
    }
}

pub struct Dispatcher {
    tenant_manager: Arc<TenantManager>,
    rate_limiter: Arc<RateLimiter>,
    registry: HandlerRegistry,
    rest: Arc<dyn RestReplier>,
    state: StateStore,
}

impl Dispatcher {
    pub fn new(
        tenant_manager: Arc<TenantManager>,
        rate_limiter: Arc<RateLimiter>,
        registry: HandlerRegistry,
        rest: Arc<dyn RestReplier>,
        state: StateStore,
    ) -> Self {
        Self { tenant_manager, rate_limiter, registry, rest, state }
    }

    pub async fn dispatch(&self, envelope: &Envelope) -> DispatchOutcome {
        let span = tracing::info_span!(
            "dispatch",
            trace_id = %envelope.trace.trace_id,
            event_id = %envelope.event_id,
            guild_id = %envelope.guild_id,
            event_type = %envelope.event_type.routing_key(),
        );
        self.dispatch_inner(envelope).instrument(span).await
    }

    async fn dispatch_inner(&self, envelope: &Envelope) -> DispatchOutcome {
        let is_interaction = envelope.is_interaction();

        if envelope.guild_id.trim().is_empty() {
            if is_interaction {
                self.reply_error(envelope, messages::NOT_CONFIGURED).await;
            }
            return DispatchOutcome::drop_silent();
        }

        // -- 1. Tenant resolution ------------------------------------------
        let tenant = match self.tenant_manager.get_context(&envelope.guild_id, envelope.user_id.as_deref()).await {
            Ok(tenant) => tenant,
            Err(e) => {
                tracing::warn!(err = %e, "tenant resolution failed");
                metrics::dispatch_error(ErrorKind::Transient);
                return DispatchOutcome::retry(ErrorKind::Transient);
            }
        };

        // -- 2. Authorization (admin.* commands) ---------------------------
        if let EventKind::InteractionCommand { name } = &envelope.event_type {
            if is_admin_command(name) {
                let member = extract_member(&envelope.data);
                let authorized = member.map(InteractionMember::is_administrator).unwrap_or(false);
                if !authorized {
                    metrics::admin_denied();
                    self.reply_error(envelope, messages::ADMIN_REQUIRED).await;
                    return DispatchOutcome::drop_silent();
                }
            }
        }

        // -- 3. Rate limiting (interactions only) --------------------------
        if is_interaction {
            let action_type = action_type_for(&envelope.event_type);
            let now = epoch_ms();
            match self.rate_limiter.check_limit(&tenant.tenant_id, action_type, &tenant.config, now).await {
                Ok(decision) if !decision.allowed => {
                    metrics::rate_limited(action_type);
                    let message = format!("{} {}ms", messages::RATE_LIMITED_PREFIX, decision.retry_after_ms);
                    self.reply_error(envelope, &message).await;
                    return DispatchOutcome::drop_silent();
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(err = %e, "rate limiter unavailable");
                    metrics::dispatch_error(ErrorKind::Transient);
                    return DispatchOutcome::retry(ErrorKind::Transient);
                }
            }
        }

        // -- 4. Deferral deadline (hard, interactions only) ----------------
        if is_interaction {
            let now = epoch_ms();
            let remaining_ms = envelope.defer_deadline_remaining_ms(now);
            if remaining_ms == 0 {
                metrics::deadline_miss();
                tracing::warn!("deferral deadline missed before dispatch could attempt it");
                return DispatchOutcome::drop_dlq(ErrorKind::DeadlineMiss);
            }

            let Some((interaction_id, interaction_token)) = envelope.interaction_id.as_deref().zip(envelope.interaction_token.as_deref()) else {
                return DispatchOutcome::drop_silent();
            };

            let defer = if matches!(envelope.event_type, EventKind::InteractionButton { .. } | EventKind::InteractionModal { .. }) {
                self.rest.defer_update(interaction_id, interaction_token)
            } else {
                self.rest.defer_reply(interaction_id, interaction_token)
            };

            // The defer call carries its own deadline: the remaining slice of
            // the 2.5s budget, not the handler's 15s context (spec §5 "the
            // first REST defer has its own deadline of timestamp + 2.5s").
            match tokio::time::timeout(Duration::from_millis(remaining_ms), defer).await {
                Ok(Ok(outcome)) if outcome.success => {}
                Ok(Ok(_)) => {
                    metrics::deadline_miss();
                    return DispatchOutcome::drop_dlq(ErrorKind::DeadlineMiss);
                }
                Ok(Err(e)) => {
                    tracing::warn!(err = %e, "defer call failed");
                    metrics::deadline_miss();
                    return DispatchOutcome::drop_dlq(ErrorKind::DeadlineMiss);
                }
                Err(_elapsed) => {
                    tracing::warn!("defer call exceeded remaining deadline budget");
                    metrics::deadline_miss();
                    return DispatchOutcome::drop_dlq(ErrorKind::DeadlineMiss);
                }
            }
        }

        // -- 5. Handler invocation ------------------------------------------
        let Some(handler) = self.registry.resolve(&envelope.event_type.routing_key()) else {
            return DispatchOutcome::drop_silent();
        };

        let deadline_ms = envelope.timestamp.saturating_add(HANDLER_DEADLINE.as_millis() as u64);
        let remaining = Duration::from_millis(deadline_ms.saturating_sub(epoch_ms()));
        let cancel = CancellationToken::new();
        let timeout_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            timeout_cancel.cancel();
        });

        let ctx = DispatchContext::new(tenant, Arc::clone(&self.rest), cancel).with_state(self.state.clone());
        metrics::handler_invoked(&envelope.event_type.routing_key());
        let outcome = handler.handle(&ctx, envelope).await;

        match outcome.disposition {
            Disposition::Ack => DispatchOutcome::ack(),
            Disposition::Drop => match outcome.error_kind {
                Some(kind) => DispatchOutcome::drop_dlq(kind),
                None => DispatchOutcome::drop_silent(),
            },
            Disposition::DropDlq => {
                let kind = outcome.error_kind.unwrap_or(ErrorKind::Permanent);
                DispatchOutcome::drop_dlq(kind)
            }
            Disposition::Retry => {
                let kind = outcome.error_kind.unwrap_or(ErrorKind::Transient);
                metrics::dispatch_error(kind);
                DispatchOutcome::retry(kind)
            }
        }
    }

    async fn reply_error(&self, envelope: &Envelope, message: &str) {
        if let (Some(id), Some(token)) = (envelope.interaction_id.as_deref(), envelope.interaction_token.as_deref()) {
            let _ = self.rest.defer_reply(id, token).await;
            let _ = self.rest.send_followup(token, message).await;
        }
    }
}

/// Admin commands are named with an `admin` prefix at the convention level
/// (spec §4.4 step 3 "`admin.*` commands"; our closed `EventKind` has no
/// separate admin event family, so the convention is the command name).
fn is_admin_command(name: &str) -> bool {
    name == "admin" || name.starts_with("admin-") || name.starts_with("admin_")
}

fn extract_member(data: &EventData) -> Option<&InteractionMember> {
    match data {
        EventData::Command { member, .. } => member.as_ref(),
        EventData::Button { member } => member.as_ref(),
        EventData::Modal { member, .. } => member.as_ref(),
        _ => None,
    }
}

/// Map an event kind to one of the minimum action types in spec §4.6.
/// Buttons whose `custom_id` parses as a select-menu schema are billed
/// against the `select` bucket instead of `button`.
fn action_type_for(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::InteractionCommand { .. } => "command",
        EventKind::InteractionButton { custom_id } => match CustomId::parse(custom_id) {
            Some(CustomId::Select { .. }) => "select",
            _ => "button",
        },
        EventKind::InteractionModal { .. } => "button",
        EventKind::InteractionAutocomplete { .. } => "autocomplete",
        _ => "event",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use gateway_types::Trace;

    pub fn sample_command_envelope(name: &str) -> Envelope {
        Envelope {
            event_id: "evt-1".into(),
            event_type: EventKind::InteractionCommand { name: name.to_owned() },
            timestamp: epoch_ms(),
            shard_id: 0,
            guild_id: "g1".into(),
            channel_id: Some("c1".into()),
            user_id: Some("u1".into()),
            interaction_id: Some("int-1".into()),
            interaction_token: Some("tok-1".into()),
            trace: Trace { trace_id: "t1".into(), span_id: "s1".into(), parent_span_id: None },
            data: EventData::Command { options: serde_json::json!({}), member: None },
        }
    }

    #[test]
    fn admin_command_detection() {
        assert!(is_admin_command("admin-badge"));
        assert!(is_admin_command("admin"));
        assert!(!is_admin_command("stats"));
    }

    #[test]
    fn action_type_mapping_matches_spec_minimum_set() {
        assert_eq!(action_type_for(&EventKind::InteractionCommand { name: "stats".into() }), "command");
        assert_eq!(action_type_for(&EventKind::InteractionAutocomplete { name: "stats".into() }), "autocomplete");
        assert_eq!(
            action_type_for(&EventKind::InteractionButton { custom_id: "directory_select_u1".into() }),
            "select"
        );
        assert_eq!(
            action_type_for(&EventKind::InteractionButton { custom_id: "alerts_toggle_g1".into() }),
            "button"
        );
    }
}
