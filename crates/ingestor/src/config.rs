// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ingestor configuration (spec §6 environment variable table), accumulating
//! every validation failure into one multi-line error before start-up
//! continues.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "arakis-ingestor", version, about)]
pub struct IngestorConfig {
    /// Discord bot token used for the gateway session.
    #[arg(long, env = "DISCORD_BOT_TOKEN")]
    pub discord_bot_token: Option<String>,

    /// AMQP broker URL.
    #[arg(long, env = "RABBITMQ_URL")]
    pub rabbitmq_url: Option<String>,

    /// This process's shard id.
    #[arg(long, env = "SHARD_ID", default_value_t = 0)]
    pub shard_id: u32,

    /// Total shard count across the Ingestor fleet.
    #[arg(long, env = "SHARD_COUNT", default_value_t = 1)]
    pub shard_count: u32,

    /// Topic exchange name (spec §6 broker topology).
    #[arg(long, env = "EXCHANGE_NAME", default_value = "arrakis.events")]
    pub exchange_name: String,

    /// Interactions queue name override.
    #[arg(long, env = "INTERACTION_QUEUE", default_value = "arrakis.interactions")]
    pub interaction_queue: String,

    /// Guild events queue name override.
    #[arg(long, env = "EVENT_QUEUE", default_value = "arrakis.events.guild")]
    pub event_queue: String,

    /// Health endpoint port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Heap budget above which the health endpoint reports unhealthy.
    #[arg(long, env = "MEMORY_THRESHOLD_MB", default_value_t = 75)]
    pub memory_threshold_mb: u64,

    /// Deployment environment; `production` selects JSON log output.
    #[arg(long, env = "NODE_ENV", default_value = "development")]
    pub node_env: String,

    /// `tracing_subscriber::EnvFilter` directive.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl IngestorConfig {
    /// Validate after parsing, collecting every violation rather than
    /// failing on the first (spec §6: "fails start-up with a multi-line
    /// error enumerating violations").
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.discord_bot_token.as_deref().unwrap_or_default().trim().is_empty() {
            errors.push("DISCORD_BOT_TOKEN is required".to_owned());
        }
        if self.rabbitmq_url.as_deref().unwrap_or_default().trim().is_empty() {
            errors.push("RABBITMQ_URL is required".to_owned());
        }
        if self.shard_id >= self.shard_count.max(1) {
            errors.push(format!(
                "SHARD_ID ({}) must be less than SHARD_COUNT ({})",
                self.shard_id, self.shard_count
            ));
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

    pub fn bot_token(&self) -> anyhow::Result<&str> {
        self.discord_bot_token.as_deref().filter(|s| !s.trim().is_empty()).ok_or_else(|| anyhow::anyhow!("DISCORD_BOT_TOKEN is required"))
    }

    pub fn broker_url(&self) -> anyhow::Result<&str> {
        self.rabbitmq_url.as_deref().filter(|s| !s.trim().is_empty()).ok_or_else(|| anyhow::anyhow!("RABBITMQ_URL is required"))
    }

    pub fn is_production(&self) -> bool {
        self.node_env == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> IngestorConfig {
        IngestorConfig {
            discord_bot_token: Some("token".into()),
            rabbitmq_url: Some("amqp://localhost".into()),
            shard_id: 0,
            shard_count: 1,
            exchange_name: "arrakis.events".into(),
            interaction_queue: "arrakis.interactions".into(),
            event_queue: "arrakis.events.guild".into(),
            port: 8080,
            memory_threshold_mb: 75,
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
        config.discord_bot_token = None;
        config.rabbitmq_url = None;
        let err = config.validate().expect_err("should fail");
        let message = err.to_string();
        assert!(message.contains("DISCORD_BOT_TOKEN"));
        assert!(message.contains("RABBITMQ_URL"));
    }

    #[test]
    fn shard_id_must_be_within_shard_count() {
        let mut config = base();
        config.shard_id = 2;
        config.shard_count = 2;
        assert!(config.validate().is_err());
    }
}
