// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tenant Manager: L1 in-process TTL+LRU cache over an L2 Redis-backed
//! [`StateStore`], with singleflight misses and pub/sub invalidation.
//!
//! Read-mostly, invalidated out of band: a guild's config is read on
//! every dispatch but written rarely, so a local cache absorbs the hot
//! path while a Redis pub/sub channel pushes invalidations out to every
//! process holding a stale copy.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use gateway_state::{epoch_ms, keys, StateStore};
use gateway_types::{TenantConfig, Tier};
use lru::LruCache;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

/// Default L1 per-entry TTL (spec §4.5).
pub const DEFAULT_L1_TTL: Duration = Duration::from_secs(60);

/// Default L1 size cap before LRU eviction kicks in.
pub const DEFAULT_L1_CAPACITY: usize = 4_096;

struct L1Entry {
    config: TenantConfig,
    loaded_at_ms: u64,
}

/// Resolved context for one `{guild_id, user_id}` pair (spec §4.5
/// `get_context`).
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub tier: Tier,
    pub config: TenantConfig,
}

/// Per-guild singleflight slot: concurrent misses for the same key await
/// the same in-flight L2 round trip rather than issuing N of them.
type InflightMap = Mutex<HashMap<String, Arc<OnceCell<TenantConfig>>>>;

pub struct TenantManager {
    state: StateStore,
    l1: Mutex<LruCache<String, L1Entry>>,
    l1_ttl: Duration,
    inflight: InflightMap,
    cancel: CancellationToken,
}

impl TenantManager {
    pub fn new(state: StateStore, cancel: CancellationToken) -> Arc<Self> {
        Self::with_ttl_and_capacity(state, DEFAULT_L1_TTL, DEFAULT_L1_CAPACITY, cancel)
    }

    pub fn with_ttl_and_capacity(
        state: StateStore,
        l1_ttl: Duration,
        capacity: usize,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Arc::new(Self {
            state,
            l1: Mutex::new(LruCache::new(capacity)),
            l1_ttl,
            inflight: Mutex::new(HashMap::new()),
            cancel,
        })
    }

    /// Resolve tenant context for a guild, creating a free-tier default on
    /// first observation (spec §4.5 "Miss path").
    pub async fn get_context(
        &self,
        guild_id: &str,
        user_id: Option<&str>,
    ) -> anyhow::Result<TenantContext> {
        let config = self.resolve_config(guild_id).await?;
        Ok(TenantContext {
            tenant_id: guild_id.to_owned(),
            user_id: user_id.map(str::to_owned),
            tier: config.tier,
            config,
        })
    }

    async fn resolve_config(&self, guild_id: &str) -> anyhow::Result<TenantConfig> {
        let now = epoch_ms();
        if let Some(config) = self.l1_get(guild_id, now).await {
            return Ok(config);
        }

        // Singleflight: only the first concurrent miss for this guild performs
        // the L2 round trip; the rest await its result.
        let cell = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(guild_id.to_owned()).or_insert_with(|| Arc::new(OnceCell::new())))
        };

        let guild_id_owned = guild_id.to_owned();
        let config = cell
            .get_or_try_init(|| async { self.load_or_create(&guild_id_owned).await })
            .await?
            .clone();

        self.inflight.lock().await.remove(guild_id);
        self.l1_put(guild_id, config.clone(), now).await;
        Ok(config)
    }

    async fn load_or_create(&self, guild_id: &str) -> anyhow::Result<TenantConfig> {
        if let Some(json) = self.state.get_tenant_config_json(guild_id).await? {
            return Ok(serde_json::from_str(&json)?);
        }

        let default = TenantConfig::default_for(guild_id, epoch_ms());
        let json = serde_json::to_string(&default)?;
        if self.state.set_tenant_config_if_absent(guild_id, &json).await? {
            return Ok(default);
        }

        // Lost the SETNX race to a concurrent creator; read back what won.
        match self.state.get_tenant_config_json(guild_id).await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(default),
        }
    }

    async fn l1_get(&self, guild_id: &str, now_ms: u64) -> Option<TenantConfig> {
        let mut l1 = self.l1.lock().await;
        match l1.get(guild_id) {
            Some(entry) if now_ms.saturating_sub(entry.loaded_at_ms) < self.l1_ttl.as_millis() as u64 => {
                Some(entry.config.clone())
            }
            Some(_) => {
                l1.pop(guild_id);
                None
            }
            None => None,
        }
    }

    async fn l1_put(&self, guild_id: &str, config: TenantConfig, now_ms: u64) {
        self.l1.lock().await.put(guild_id.to_owned(), L1Entry { config, loaded_at_ms: now_ms });
    }

    /// Atomically upgrade a tenant's tier at L2, then publish a
    /// `tenant:reload` for that guild so every worker's L1 converges within
    /// TTL + propagation delay (spec §4.5 "Tier upgrade operation").
    pub async fn upgrade_tier(&self, guild_id: &str, tier: Tier) -> anyhow::Result<()> {
        let now = epoch_ms();
        let mut config = match self.state.get_tenant_config_json(guild_id).await? {
            Some(json) => serde_json::from_str(&json)?,
            None => TenantConfig::default_for(guild_id, now),
        };
        config.tier = tier;
        config.rate_limits = tier.default_rate_limits();
        config.features = tier.default_features();
        config.updated_at_ms = now;

        let json = serde_json::to_string(&config)?;
        self.state.set_tenant_config(guild_id, &json).await?;
        self.state.publish_reload(guild_id).await?;
        Ok(())
    }

    /// Evict a single guild from L1 (spec §4.5 "On specific").
    pub async fn invalidate(&self, guild_id: &str) {
        self.l1.lock().await.pop(guild_id);
    }

    /// Clear the entire L1 cache (spec §4.5 "On global").
    pub async fn invalidate_all(&self) {
        self.l1.lock().await.clear();
    }

    /// Run the invalidation subscriber loop until cancelled. Spawn with
    /// `tokio::spawn` on a dedicated task per spec §4.5 ("Invalidation must
    /// not block the caller; it runs on a dedicated goroutine/task").
    pub async fn run_invalidation_listener(self: Arc<Self>, redis_url: String) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            match gateway_state::ReloadSubscriber::connect(&redis_url).await {
                Ok(mut subscriber) => loop {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        msg = subscriber.recv() => match msg {
                            Ok(payload) => {
                                if payload == keys::RELOAD_ALL {
                                    self.invalidate_all().await;
                                    tracing::info!("tenant cache: global invalidation");
                                } else {
                                    self.invalidate(&payload).await;
                                    tracing::debug!(guild_id = %payload, "tenant cache: invalidated");
                                }
                            }
                            Err(e) => {
                                tracing::warn!(err = %e, "reload subscriber stream error, reconnecting");
                                break;
                            }
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(err = %e, "reload subscriber connect failed, retrying");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(2)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l1_entry_ttl_boundary_is_exclusive() {
        // ttl=60s; an entry loaded exactly 60_000ms ago is stale (age must
        // be strictly less than ttl), matching the spec's "≤1s target"
        // propagation wording read as a hard upper bound, not inclusive.
        let ttl = DEFAULT_L1_TTL.as_millis() as u64;
        let loaded_at = 1_000u64;
        let now = loaded_at + ttl;
        assert!(now.saturating_sub(loaded_at) >= ttl);
    }
}
