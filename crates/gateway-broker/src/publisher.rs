// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Confirm-mode Publisher (spec §4.2): owns the Ingestor's single AMQP
//! connection/channel, publishes with `delivery_mode=persistent`, and
//! reconnects with exponential backoff on channel/connection error.
//!
//! The reconnect loop is a `tokio::select!` over a cancellation token and a
//! backoff sleep, the same shape used everywhere a long-running connection
//! needs to give up its wait early on shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gateway_types::envelope::EventKind;
use gateway_types::redact::redact_url;
use gateway_types::Envelope;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::codec;
use crate::topology::{assert_topology, EVENTS_EXCHANGE};

/// Maximum outstanding (in-flight write) publishes before `publish` fails
/// fast instead of blocking the gateway read loop (spec §4.2, §5).
const WRITE_BUFFER_CAPACITY: usize = 256;

const RECONNECT_BASE: Duration = Duration::from_secs(5);
const RECONNECT_CAP: Duration = Duration::from_secs(10 * 60);
const RECONNECT_MAX_ATTEMPTS: u32 = 10;

/// Snapshot of Publisher health, exposed via the Ingestor's health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PublisherStatus {
    pub connected: bool,
    pub channel_open: bool,
    pub last_publish_ms: Option<u64>,
    pub publish_count: u64,
    pub error_count: u64,
}

struct Shared {
    channel: RwLock<Option<Channel>>,
    /// Kept alive alongside the channel; lapin channels hold only a weak
    /// reference to their owning connection.
    connection: RwLock<Option<Connection>>,
    connected: AtomicBool,
    last_publish_ms: AtomicU64,
    publish_count: AtomicU64,
    error_count: AtomicU64,
    write_permits: Semaphore,
    cancel: CancellationToken,
}

/// The Ingestor's AMQP publisher. Cheap to clone; all clones share the
/// underlying channel and reconnect loop.
#[derive(Clone)]
pub struct Publisher {
    shared: Arc<Shared>,
}

impl Publisher {
    /// Connect, assert the broker topology (spec §6), and start the
    /// reconnect-on-error background loop. Returns once the first
    /// connection attempt (not subsequent reconnects) has been made.
    pub async fn connect(amqp_url: &str) -> anyhow::Result<Self> {
        let shared = Arc::new(Shared {
            channel: RwLock::new(None),
            connection: RwLock::new(None),
            connected: AtomicBool::new(false),
            last_publish_ms: AtomicU64::new(0),
            publish_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            write_permits: Semaphore::new(WRITE_BUFFER_CAPACITY),
            cancel: CancellationToken::new(),
        });

        let url = amqp_url.to_owned();
        let bootstrap = Arc::clone(&shared);
        connect_once(&url, &bootstrap).await?;

        let loop_shared = Arc::clone(&shared);
        tokio::spawn(reconnect_loop(url, loop_shared));

        Ok(Self { shared })
    }

    /// Publish one envelope with confirm-mode durability (spec §4.2). Fails
    /// fast (without blocking) if the write buffer is saturated or no
    /// channel is currently open.
    pub async fn publish(&self, envelope: &Envelope) -> anyhow::Result<()> {
        let _permit = self
            .shared
            .write_permits
            .try_acquire()
            .map_err(|_| anyhow::anyhow!("publisher write buffer full"))?;

        let guard = self.shared.channel.read().await;
        let channel = guard.as_ref().ok_or_else(|| anyhow::anyhow!("publisher channel not open"))?;

        let (body, properties) = codec::encode(envelope)?;
        let routing_key = envelope.event_type.routing_key();
        let priority = envelope.event_type.priority();
        let properties = properties.with_priority(priority);

        let result = channel
            .basic_publish(
                EVENTS_EXCHANGE,
                &routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await;

        drop(guard);

        match result {
            Ok(confirm) => match confirm.await {
                Ok(_) => {
                    self.shared.publish_count.fetch_add(1, Ordering::Relaxed);
                    self.shared.last_publish_ms.store(gateway_state_epoch_ms(), Ordering::Relaxed);
                    Ok(())
                }
                Err(e) => {
                    self.shared.error_count.fetch_add(1, Ordering::Relaxed);
                    self.mark_unhealthy().await;
                    Err(anyhow::anyhow!("publish not confirmed: {e}"))
                }
            },
            Err(e) => {
                self.shared.error_count.fetch_add(1, Ordering::Relaxed);
                self.mark_unhealthy().await;
                Err(anyhow::anyhow!("publish failed: {e}"))
            }
        }
    }

    /// Routing key / queue this envelope kind would be published under,
    /// without performing the publish — used by callers deciding whether a
    /// failure is for an interaction (synchronous error reply path) or a
    /// low-priority event (best-effort drop).
    pub fn target_queue(kind: &EventKind) -> &'static str {
        kind.queue().name()
    }

    pub fn status(&self) -> PublisherStatus {
        PublisherStatus {
            connected: self.shared.connected.load(Ordering::Relaxed),
            channel_open: self.shared.connected.load(Ordering::Relaxed),
            last_publish_ms: match self.shared.last_publish_ms.load(Ordering::Relaxed) {
                0 => None,
                ms => Some(ms),
            },
            publish_count: self.shared.publish_count.load(Ordering::Relaxed),
            error_count: self.shared.error_count.load(Ordering::Relaxed),
        }
    }

    async fn mark_unhealthy(&self) {
        self.shared.connected.store(false, Ordering::Relaxed);
        *self.shared.channel.write().await = None;
        *self.shared.connection.write().await = None;
    }

    /// Stop the reconnect loop. No reconnect attempts occur after this.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }
}

async fn connect_once(url: &str, shared: &Arc<Shared>) -> anyhow::Result<()> {
    tracing::info!(url = %redact_url(url), "publisher connecting");
    let conn = Connection::connect(url, ConnectionProperties::default()).await?;
    let channel = conn.create_channel().await?;
    channel.confirm_select(ConfirmSelectOptions::default()).await?;
    assert_topology(&channel).await?;

    *shared.channel.write().await = Some(channel);
    *shared.connection.write().await = Some(conn);
    shared.connected.store(true, Ordering::Relaxed);
    tracing::info!("publisher connected, topology asserted");
    Ok(())
}

async fn reconnect_loop(url: String, shared: Arc<Shared>) {
    let mut attempt: u32 = 0;
    loop {
        if shared.cancel.is_cancelled() {
            return;
        }
        if shared.connected.load(Ordering::Relaxed) {
            tokio::select! {
                _ = shared.cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
            }
        }

        if attempt >= RECONNECT_MAX_ATTEMPTS {
            tracing::error!(
                attempts = attempt,
                "publisher exhausted reconnect attempts; broker unreachable (fatal)"
            );
            tokio::select! {
                _ = shared.cancel.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_CAP) => {}
            }
            attempt = 0;
            continue;
        }

        let backoff = (RECONNECT_BASE * 2u32.pow(attempt)).min(RECONNECT_CAP);
        tracing::warn!(attempt, backoff_ms = backoff.as_millis() as u64, "publisher reconnecting");

        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }

        match connect_once(&url, &shared).await {
            Ok(()) => attempt = 0,
            Err(e) => {
                tracing::warn!(err = %e, attempt, "publisher reconnect failed");
                attempt += 1;
            }
        }
    }
}

fn gateway_state_epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_queue_matches_routing_table() {
        let interaction = EventKind::InteractionCommand { name: "stats".into() };
        assert_eq!(Publisher::target_queue(&interaction), "arrakis.interactions");

        let guild_event = EventKind::MessageCreate;
        assert_eq!(Publisher::target_queue(&guild_event), "arrakis.events.guild");
    }
}
