// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The context bundle passed to every handler invocation (spec §4.4 step
//! 6): tenant config, the REST Replier, the State Store, and a
//! cancellation signal. Handlers depend on this interface bundle, never on
//! each other (Design Notes §9).

use std::sync::Arc;

use gateway_state::StateStore;
use gateway_tenant::TenantContext;
use tokio_util::sync::CancellationToken;

use crate::rest::RestReplier;

#[derive(Clone)]
pub struct DispatchContext {
    pub tenant: TenantContext,
    pub rest: Arc<dyn RestReplier>,
    pub state: Option<StateStore>,
    /// Cancelled at `envelope.timestamp + 15s` (spec §5), the Worker's
    /// tighter-than-platform SLO for interaction handlers.
    pub cancel: CancellationToken,
}

impl DispatchContext {
    pub fn new(tenant: TenantContext, rest: Arc<dyn RestReplier>, cancel: CancellationToken) -> Self {
        Self { tenant, rest, state: None, cancel }
    }

    pub fn with_state(mut self, state: StateStore) -> Self {
        self.state = Some(state);
        self
    }
}
