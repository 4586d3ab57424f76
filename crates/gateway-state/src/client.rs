// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Async Redis-backed State Store client.
//!
//! A cross-process KV for everything that needs to survive past a single
//! process and be visible to every Ingestor/Worker: cooldowns, sessions,
//! rate buckets, idempotency markers, and tenant config, all durable in
//! Redis rather than held in an in-process cache.

use std::time::Duration;

use deadpool_redis::{Config, Pool, Runtime};
use gateway_types::redact::redact_url;
use redis::AsyncCommands;

use crate::keys;

/// Handle to the State Store. Cheap to clone (wraps a pooled connection
/// manager); one instance is shared process-wide per §9 Design Notes
/// ("process-wide singletons, initialized once at start-up").
#[derive(Clone)]
pub struct StateStore {
    pool: Pool,
}

impl StateStore {
    /// Connect to Redis. Does not perform a round trip — the pool connects
    /// lazily on first use, so this can run before Redis is reachable.
    pub fn connect(redis_url: &str) -> anyhow::Result<Self> {
        tracing::info!(url = %redact_url(redis_url), "state store configured");
        let config = Config::from_url(redis_url);
        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| anyhow::anyhow!("failed to build redis pool: {e}"))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> anyhow::Result<deadpool_redis::Connection> {
        self.pool.get().await.map_err(|e| anyhow::anyhow!("redis pool exhausted: {e}"))
    }

    // -- Cooldowns ------------------------------------------------------

    /// Returns the epoch-ms timestamp of the last successful invocation, if
    /// the cooldown has not yet expired.
    pub async fn get_cooldown(&self, command: &str, user_id: &str) -> anyhow::Result<Option<u64>> {
        let mut conn = self.conn().await?;
        let value: Option<u64> = conn.get(keys::cooldown(command, user_id)).await?;
        Ok(value)
    }

    /// Set a cooldown, keyed on command success, expiring after `window_ms`.
    pub async fn set_cooldown(
        &self,
        command: &str,
        user_id: &str,
        now_ms: u64,
        window_ms: u64,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let ttl_secs = window_ms.div_ceil(1000).max(1);
        let _: () = conn
            .set_ex(keys::cooldown(command, user_id), now_ms, ttl_secs)
            .await?;
        Ok(())
    }

    // -- Interaction sessions --------------------------------------------

    pub async fn get_session(&self, kind: &str, user_id: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(keys::session(kind, user_id)).await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// Create or mutate a session, refreshing its TTL (default 5 min).
    pub async fn set_session(
        &self,
        kind: &str,
        user_id: &str,
        data: &serde_json::Value,
        ttl_secs: u64,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(data)?;
        let _: () = conn.set_ex(keys::session(kind, user_id), payload, ttl_secs.max(1)).await?;
        Ok(())
    }

    /// Explicit close, independent of TTL expiry.
    pub async fn close_session(&self, kind: &str, user_id: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(keys::session(kind, user_id)).await?;
        Ok(())
    }

    // -- Rate limiting ----------------------------------------------------

    /// Atomically increment the fixed-window counter for
    /// `{tenant_id, action_type, window_index}`, setting its expiry only on
    /// the increment that creates the key (spec §4.6).
    pub async fn incr_rate_counter(
        &self,
        tenant_id: &str,
        action_type: &str,
        window_index: u64,
        window_len_secs: u64,
    ) -> anyhow::Result<i64> {
        let mut conn = self.conn().await?;
        let key = keys::rate_bucket(tenant_id, action_type, window_index);
        let count: i64 = conn.incr(&key, 1).await?;
        if count == 1 {
            let _: () = conn.expire(&key, window_len_secs.max(1) as i64).await?;
        }
        Ok(count)
    }

    /// Delete the current window key (spec §4.6 "Reset operation").
    pub async fn reset_rate_counter(
        &self,
        tenant_id: &str,
        action_type: &str,
        window_index: u64,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(keys::rate_bucket(tenant_id, action_type, window_index)).await?;
        Ok(())
    }

    // -- Tenant configuration ---------------------------------------------

    pub async fn get_tenant_config_json(&self, guild_id: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(keys::tenant_config(guild_id)).await?;
        Ok(value)
    }

    /// Atomically create the default tenant config iff absent (`SETNX`
    /// semantics). Returns `true` if this call created the key.
    pub async fn set_tenant_config_if_absent(
        &self,
        guild_id: &str,
        json: &str,
    ) -> anyhow::Result<bool> {
        let mut conn = self.conn().await?;
        let created: bool = conn.set_nx(keys::tenant_config(guild_id), json).await?;
        Ok(created)
    }

    /// Overwrite the tenant config (admin API / tier upgrade path). No TTL —
    /// tenant config persists until explicitly changed.
    pub async fn set_tenant_config(&self, guild_id: &str, json: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set(keys::tenant_config(guild_id), json).await?;
        Ok(())
    }

    // -- Invalidation pub/sub ----------------------------------------------

    /// Publish a `tenant:reload` message. `guild_id_or_star` is either a
    /// specific guild id or [`keys::RELOAD_ALL`] for a global reload.
    pub async fn publish_reload(&self, guild_id_or_star: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.publish(keys::TENANT_RELOAD_CHANNEL, guild_id_or_star).await?;
        Ok(())
    }

    // -- Idempotency --------------------------------------------------------

    pub async fn is_processed(&self, event_id: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn().await?;
        let exists: bool = conn.exists(keys::idempotency(event_id)).await?;
        Ok(exists)
    }

    /// Set the idempotency marker with TTL >= broker retention (spec §4.3
    /// step 4).
    pub async fn mark_processed(&self, event_id: &str, ttl_secs: u64) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set_ex(keys::idempotency(event_id), 1u8, ttl_secs.max(1)).await?;
        Ok(())
    }
}

/// A dedicated pub/sub connection, separate from the pooled command
/// connections (Redis multiplexes subscriptions on their own connection).
pub struct ReloadSubscriber {
    conn: redis::aio::PubSub,
}

impl ReloadSubscriber {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_async_pubsub().await?;
        conn.subscribe(keys::TENANT_RELOAD_CHANNEL).await?;
        Ok(Self { conn })
    }

    /// Wait for the next invalidation message, returning its payload (a
    /// guild id, or [`keys::RELOAD_ALL`]).
    pub async fn recv(&mut self) -> anyhow::Result<String> {
        use futures_util::StreamExt;

        let msg = self
            .conn
            .on_message()
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("reload pub/sub stream closed"))?;
        let payload: String = msg.get_payload()?;
        Ok(payload)
    }
}

/// Current epoch milliseconds. Centralized so both Ingestor and Worker use
/// the same clock source for envelope timestamps and cooldown windows.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_ms_is_monotonic_enough() {
        let a = epoch_ms();
        let b = epoch_ms();
        assert!(b >= a);
    }
}
