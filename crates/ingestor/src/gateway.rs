// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Discord gateway session (spec §4.1): one `twilight_gateway::Shard`
//! per process, classifying every received event and handing it to the
//! Publisher. No event or entity is cached in-process — this crate never
//! depends on `twilight-cache-inmemory`, so there is nothing to configure to
//! zero capacity.
//!
//! `Shard` manages its own reconnect loop internally; this module's job is
//! to observe connection state for the health endpoint and apply the
//! publish-failure policy in spec §4.1 ("Failure semantics").

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gateway_broker::Publisher;
use gateway_types::Envelope;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use twilight_gateway::{Config, EventTypeFlags, Intents, Shard, ShardId};
use twilight_http::Client as RestClient;

/// Bounded retry for non-interaction publish failures (spec §4.1).
const PUBLISH_RETRY_ATTEMPTS: u32 = 3;
const PUBLISH_RETRY_BUDGET: Duration = Duration::from_millis(1_000);

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(60);

/// Snapshot of gateway session health, exposed via the health endpoint.
pub struct GatewayStatus {
    connected: AtomicBool,
    latency_ms: AtomicU64,
    shard_id: u32,
}

impl GatewayStatus {
    /// A not-yet-connected snapshot, for wiring into the health router
    /// before the gateway task's first event arrives.
    pub fn new(shard_id: u32) -> Arc<Self> {
        Arc::new(Self { connected: AtomicBool::new(false), latency_ms: AtomicU64::new(0), shard_id })
    }

    pub fn snapshot(&self) -> GatewaySnapshot {
        GatewaySnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            latency_ms: self.latency_ms.load(Ordering::Relaxed),
            shard_id: self.shard_id,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewaySnapshot {
    pub connected: bool,
    pub latency_ms: u64,
    pub shard_id: u32,
}

/// Run the gateway session until `shutdown` is cancelled or a fatal error
/// occurs (broker unreachable beyond its own reconnect budget is handled by
/// the Publisher; a fatal gateway error here means the Ingestor halts and
/// a process supervisor restarts it, per spec §7).
pub async fn run(
    bot_token: String,
    shard_id: u32,
    shard_count: u32,
    publisher: Publisher,
    shutdown: CancellationToken,
    status: Arc<GatewayStatus>,
) -> anyhow::Result<()> {
    run_inner(bot_token, shard_id, shard_count, publisher, shutdown, status).await
}

async fn run_inner(
    bot_token: String,
    shard_id: u32,
    shard_count: u32,
    publisher: Publisher,
    shutdown: CancellationToken,
    status: Arc<GatewayStatus>,
) -> anyhow::Result<()> {
    // Intent set per spec §4.1: Guilds, GuildMembers, GuildMessages, and
    // interaction events only. No presence, no typing.
    let intents = Intents::GUILDS | Intents::GUILD_MEMBERS | Intents::GUILD_MESSAGES;
    let rest = RestClient::new(bot_token.clone());
    let config = Config::new(bot_token.clone(), intents);
    let id = ShardId::new(shard_id, shard_count.max(1));
    let mut shard = Shard::with_config(id, config);
    let event_types = EventTypeFlags::all();

    let mut backoff = RECONNECT_BASE;

    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        let next = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            item = shard.next_event(event_types) => item,
        };

        let event = match next {
            Some(Ok(event)) => {
                status.connected.store(true, Ordering::Relaxed);
                if let Some(average) = shard.latency().average() {
                    status.latency_ms.store(average.as_millis() as u64, Ordering::Relaxed);
                }
                backoff = RECONNECT_BASE;
                event
            }
            Some(Err(source)) => {
                status.connected.store(false, Ordering::Relaxed);
                if source.is_fatal() {
                    tracing::error!(err = %source, "gateway session fatal error");
                    anyhow::bail!("gateway fatal error: {source}");
                }
                tracing::warn!(err = %source, backoff_ms = backoff.as_millis() as u64, "gateway session error, backing off");
                jittered_sleep(backoff, &shutdown).await;
                backoff = (backoff * 2).min(RECONNECT_CAP);
                continue;
            }
            None => {
                status.connected.store(false, Ordering::Relaxed);
                tracing::warn!("gateway shard closed");
                return Ok(());
            }
        };

        let Some(envelope) = crate::classify::build_envelope(shard_id, &event) else {
            continue;
        };

        publish_with_policy(&publisher, &rest, envelope).await;
    }
}

async fn jittered_sleep(base: Duration, shutdown: &CancellationToken) {
    let jitter_ms: u64 = rand::rng().random_range(0..=250);
    let delay = base + Duration::from_millis(jitter_ms);
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

/// Apply the publish-failure policy (spec §4.1): interactions get a
/// best-effort synchronous error reply if time remains; other events get a
/// bounded retry, then a silent drop with a counter increment.
async fn publish_with_policy(publisher: &Publisher, rest: &RestClient, envelope: Envelope) {
    if envelope.is_interaction() {
        if let Err(e) = publisher.publish(&envelope).await {
            tracing::error!(event_id = %envelope.event_id, err = %e, "interaction publish failed");
            crate::metrics::publish_error();
            reply_best_effort(rest, &envelope).await;
        }
        return;
    }

    let mut attempt = 0;
    let mut delay = PUBLISH_RETRY_BUDGET / PUBLISH_RETRY_ATTEMPTS;
    loop {
        match publisher.publish(&envelope).await {
            Ok(()) => return,
            Err(e) if attempt + 1 < PUBLISH_RETRY_ATTEMPTS => {
                attempt += 1;
                crate::metrics::publish_retry();
                tracing::warn!(event_id = %envelope.event_id, attempt, err = %e, "event publish failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                tracing::error!(event_id = %envelope.event_id, err = %e, "event publish failed, dropping");
                crate::metrics::publish_error();
                return;
            }
        }
    }
}

/// Best-effort error reply over the interaction's REST surface when a
/// publish fails and the 2.5s defer budget may still have time left. Never
/// surfaces its own failure; this is a courtesy, not a guarantee.
async fn reply_best_effort(rest: &RestClient, envelope: &Envelope) {
    let (Some(interaction_id), Some(token)) = (envelope.interaction_id.as_deref(), envelope.interaction_token.as_deref()) else {
        return;
    };
    if envelope.defer_deadline_remaining_ms(super::now_ms()) == 0 {
        return;
    }
    let Ok(id) = interaction_id.parse::<u64>() else { return };
    let response = twilight_model::http::interaction::InteractionResponse {
        kind: twilight_model::http::interaction::InteractionResponseType::ChannelMessageWithSource,
        data: Some(twilight_model::http::interaction::InteractionResponseData {
            content: Some("Something went wrong. Please try again.".to_owned()),
            ..Default::default()
        }),
    };
    let application_id = match rest.current_user_application().await {
        Ok(resp) => match resp.model().await {
            Ok(app) => app.id,
            Err(_) => return,
        },
        Err(_) => return,
    };
    let interaction_id = twilight_model::id::Id::new(id);
    let _ = rest.interaction(application_id).create_response(interaction_id, token, &response).await;
}
