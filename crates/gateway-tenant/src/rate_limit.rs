// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rate Limiter (spec §4.6): per-tenant, per-action fixed-window counter
//! backed by the State Store. Windows and limits come from the resolved
//! [`TenantConfig`]; a `max = -1` sentinel means unlimited.

use gateway_state::StateStore;
use gateway_types::TenantConfig;

/// Outcome of one `check_limit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
    pub retry_after_ms: u64,
}

pub struct RateLimiter {
    state: StateStore,
}

impl RateLimiter {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Check (and, if allowed, consume) one unit of `{tenant_id,
    /// action_type}` rate budget (spec §4.6). Per-action counters are
    /// independent: exhausting `command` never touches `eligibility_check`.
    pub async fn check_limit(
        &self,
        tenant_id: &str,
        action_type: &str,
        config: &TenantConfig,
        now_ms: u64,
    ) -> anyhow::Result<RateDecision> {
        let limit_config = config.rate_limit_for(action_type);

        if limit_config.is_unlimited() {
            return Ok(RateDecision { allowed: true, limit: -1, remaining: -1, retry_after_ms: 0 });
        }

        let window_ms = limit_config.window_ms.max(1);
        let window_index = now_ms / window_ms;
        let window_len_secs = window_ms.div_ceil(1000).max(1);

        let count = self
            .state
            .incr_rate_counter(tenant_id, action_type, window_index, window_len_secs)
            .await?;

        let max = limit_config.max;
        let remaining = (max - count).max(0);
        let allowed = count <= max;
        let retry_after_ms = if allowed { 0 } else { window_ms - (now_ms % window_ms) };

        Ok(RateDecision { allowed, limit: max, remaining, retry_after_ms })
    }

    /// Reset the current window for `{tenant_id, action_type}` (spec §4.6
    /// "Reset operation").
    pub async fn reset(&self, tenant_id: &str, action_type: &str, window_ms: u64, now_ms: u64) -> anyhow::Result<()> {
        let window_index = now_ms / window_ms.max(1);
        self.state.reset_rate_counter(tenant_id, action_type, window_index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::tenant::RateLimitConfig;

    #[test]
    fn unlimited_sentinel_skips_increment() {
        let config = RateLimitConfig::unlimited();
        assert!(config.is_unlimited());
        assert_eq!(config.max, -1);
    }

    #[test]
    fn retry_after_is_time_to_window_reset() {
        let window_ms: u64 = 60_000;
        let now_ms: u64 = 1_700_000_075_000; // 15s into the window
        let retry_after = window_ms - (now_ms % window_ms);
        assert_eq!(retry_after, 45_000);
    }
}
