// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker configuration (spec §6 "Worker environment"), following the same
//! clap-derived, multi-violation `validate()` shape as the Ingestor's
//! config.

use std::time::Duration;

use clap::Parser;
use gateway_broker::consumer::{DEFAULT_DRAIN_DEADLINE, DEFAULT_MAX_REDELIVERIES, DEFAULT_PREFETCH};

#[derive(Debug, Clone, Parser)]
#[command(name = "arakis-worker", version, about)]
pub struct WorkerConfig {
    /// AMQP broker URL.
    #[arg(long, env = "RABBITMQ_URL")]
    pub rabbitmq_url: Option<String>,

    /// State Store (Redis) URL.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Pooled database proxy URL. Handlers that use it are out of scope
    /// for this repository (spec §1 Non-goals); still validated for
    /// presence so misconfiguration is caught at start-up rather than
    /// inside a handler.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Discord application id, needed for REST calls that don't carry an
    /// interaction token (role grants, DMs).
    #[arg(long, env = "DISCORD_APPLICATION_ID")]
    pub discord_application_id: Option<u64>,

    /// Discord bot token, used only for REST operations that require it
    /// (spec §4.8) — the Worker never opens a gateway session.
    #[arg(long, env = "DISCORD_BOT_TOKEN")]
    pub discord_bot_token: Option<String>,

    /// Per-consumer in-flight message cap (spec §4.3).
    #[arg(long, env = "PREFETCH", default_value_t = DEFAULT_PREFETCH)]
    pub prefetch: u16,

    /// Cap on requeue-nack attempts before a delivery is dead-lettered
    /// (spec §4.3 step 5).
    #[arg(long, env = "MAX_REDELIVERIES", default_value_t = DEFAULT_MAX_REDELIVERIES)]
    pub max_redeliveries: u32,

    /// Graceful-shutdown drain deadline, in milliseconds (spec §4.3
    /// "Shutdown").
    #[arg(long, env = "DRAIN_DEADLINE_MS", default_value_t = DEFAULT_DRAIN_DEADLINE.as_millis() as u64)]
    pub drain_deadline_ms: u64,

    /// Health/metrics endpoint port.
    #[arg(long, env = "PORT", default_value_t = 8081)]
    pub port: u16,

    /// Deployment environment; `production` selects JSON log output.
    #[arg(long, env = "NODE_ENV", default_value = "development")]
    pub node_env: String,

    /// `tracing_subscriber::EnvFilter` directive.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl WorkerConfig {
    /// Validate after parsing, collecting every violation rather than
    /// failing on the first (spec §6).
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.rabbitmq_url.as_deref().unwrap_or_default().trim().is_empty() {
            errors.push("RABBITMQ_URL is required".to_owned());
        }
        if self.redis_url.as_deref().unwrap_or_default().trim().is_empty() {
            errors.push("REDIS_URL is required".to_owned());
        }
        if self.database_url.as_deref().unwrap_or_default().trim().is_empty() {
            errors.push("DATABASE_URL is required".to_owned());
        }
        if self.discord_bot_token.as_deref().unwrap_or_default().trim().is_empty() {
            errors.push("DISCORD_BOT_TOKEN is required".to_owned());
        }
        if self.discord_application_id.is_none() {
            errors.push("DISCORD_APPLICATION_ID is required".to_owned());
        }
        if self.prefetch == 0 {
            errors.push("PREFETCH must be greater than zero".to_owned());
        }
        if !matches!(self.node_env.as_str(), "development" | "staging" | "production" | "test") {
            errors.push(format!("NODE_ENV '{}' is not one of development|staging|production|test", self.node_env));
        }
        if !matches!(self.log_level.as_str(), "trace" | "debug" | "info" | "warn" | "error" | "fatal") {
            errors.push(format!(
                "LOG_LEVEL '{}' is not one of trace|debug|info|warn|error|fatal",
                self.log_level
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid configuration:\n{}", errors.join("\n"))
        }
    }

    pub fn broker_url(&self) -> anyhow::Result<&str> {
        self.rabbitmq_url.as_deref().filter(|s| !s.trim().is_empty()).ok_or_else(|| anyhow::anyhow!("RABBITMQ_URL is required"))
    }

    pub fn state_url(&self) -> anyhow::Result<&str> {
        self.redis_url.as_deref().filter(|s| !s.trim().is_empty()).ok_or_else(|| anyhow::anyhow!("REDIS_URL is required"))
    }

    pub fn bot_token(&self) -> anyhow::Result<&str> {
        self.discord_bot_token.as_deref().filter(|s| !s.trim().is_empty()).ok_or_else(|| anyhow::anyhow!("DISCORD_BOT_TOKEN is required"))
    }

    pub fn application_id(&self) -> anyhow::Result<u64> {
        self.discord_application_id.ok_or_else(|| anyhow::anyhow!("DISCORD_APPLICATION_ID is required"))
    }

    pub fn drain_deadline(&self) -> Duration {
        Duration::from_millis(self.drain_deadline_ms)
    }

    pub fn is_production(&self) -> bool {
        self.node_env == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> WorkerConfig {
        WorkerConfig {
            rabbitmq_url: Some("amqp://localhost".into()),
            redis_url: Some("redis://localhost".into()),
            database_url: Some("postgres://localhost/arakis".into()),
            discord_application_id: Some(1),
            discord_bot_token: Some("token".into()),
            prefetch: 10,
            max_redeliveries: 5,
            drain_deadline_ms: 30_000,
            port: 8081,
            node_env: "development".into(),
            log_level: "info".into(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn missing_required_fields_are_all_reported() {
        let mut config = base();
        config.rabbitmq_url = None;
        config.redis_url = None;
        config.database_url = None;
        config.discord_bot_token = None;
        config.discord_application_id = None;
        let err = config.validate().expect_err("should fail");
        let message = err.to_string();
        assert!(message.contains("RABBITMQ_URL"));
        assert!(message.contains("REDIS_URL"));
        assert!(message.contains("DATABASE_URL"));
        assert!(message.contains("DISCORD_BOT_TOKEN"));
        assert!(message.contains("DISCORD_APPLICATION_ID"));
    }

    #[test]
    fn zero_prefetch_is_rejected() {
        let mut config = base();
        config.prefetch = 0;
        assert!(config.validate().is_err());
    }
}
