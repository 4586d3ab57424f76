// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-community (guild) configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Tenant tier, authoritative definitions in spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    /// The default rate-limit table for a freshly-created tenant at this tier.
    pub fn default_rate_limits(&self) -> HashMap<String, RateLimitConfig> {
        let mut limits = HashMap::new();
        match self {
            Self::Free => {
                limits.insert("command".to_owned(), RateLimitConfig { window_ms: 60_000, max: 10 });
                limits.insert(
                    "eligibility_check".to_owned(),
                    RateLimitConfig { window_ms: 3_600_000, max: 100 },
                );
            }
            Self::Pro => {
                limits.insert(
                    "command".to_owned(),
                    RateLimitConfig { window_ms: 60_000, max: 100 },
                );
                limits.insert(
                    "eligibility_check".to_owned(),
                    RateLimitConfig { window_ms: 3_600_000, max: 1_000 },
                );
            }
            Self::Enterprise => {
                limits.insert("command".to_owned(), RateLimitConfig::unlimited());
                limits.insert("eligibility_check".to_owned(), RateLimitConfig::unlimited());
            }
        }
        limits
    }

    /// Feature flags enabled by default at this tier.
    pub fn default_features(&self) -> FeatureFlags {
        match self {
            Self::Free => FeatureFlags { advanced_analytics: false, unlimited_commands: false },
            Self::Pro => FeatureFlags { advanced_analytics: true, unlimited_commands: false },
            Self::Enterprise => FeatureFlags { advanced_analytics: true, unlimited_commands: true },
        }
    }
}

/// Window length and max count for one `{tenant, action}` rate limit.
/// `max = -1` is the sentinel for "unlimited" (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max: i64,
}

impl RateLimitConfig {
    pub fn unlimited() -> Self {
        Self { window_ms: 0, max: -1 }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max < 0
    }
}

/// The closed enumeration of feature flags recognized at the handler layer.
/// Per Design Notes §9, unknown flags read back from the store are ignored
/// with a warning, never treated as an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub advanced_analytics: bool,
    pub unlimited_commands: bool,
}

/// Per-`guild_id` configuration (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub guild_id: String,
    pub tier: Tier,
    pub rate_limits: HashMap<String, RateLimitConfig>,
    pub features: FeatureFlags,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl TenantConfig {
    /// The default configuration created on first observation of a guild
    /// (spec §6 "Tenant default").
    pub fn default_for(guild_id: impl Into<String>, now_ms: u64) -> Self {
        let tier = Tier::Free;
        Self {
            guild_id: guild_id.into(),
            rate_limits: tier.default_rate_limits(),
            features: tier.default_features(),
            tier,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Resolve the rate limit for an action type, falling back to the
    /// tier's default if the tenant's config doesn't carry an explicit
    /// entry (e.g. a newly-added action type).
    pub fn rate_limit_for(&self, action_type: &str) -> RateLimitConfig {
        self.rate_limits
            .get(action_type)
            .copied()
            .unwrap_or_else(|| self.tier.default_rate_limits()
                .get(action_type)
                .copied()
                .unwrap_or(RateLimitConfig { window_ms: 60_000, max: 10 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enterprise_is_unlimited() {
        let config = TenantConfig::default_for("g1", 0);
        assert_eq!(config.tier, Tier::Free);

        let enterprise = Tier::Enterprise;
        let limits = enterprise.default_rate_limits();
        assert!(limits["command"].is_unlimited());
        assert!(enterprise.default_features().unlimited_commands);
    }

    #[test]
    fn free_tier_matches_spec_table() {
        let limits = Tier::Free.default_rate_limits();
        assert_eq!(limits["command"], RateLimitConfig { window_ms: 60_000, max: 10 });
        assert_eq!(
            limits["eligibility_check"],
            RateLimitConfig { window_ms: 3_600_000, max: 100 }
        );
        assert!(!Tier::Free.default_features().advanced_analytics);
    }
}
