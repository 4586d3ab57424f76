// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Worker's Consumer (spec §4.3): binds the two primary queues with a
//! configurable prefetch, decodes deliveries, and exposes ack/nack/DLQ
//! routing plus graceful drain-on-shutdown.

use std::time::Duration;

use futures_util::StreamExt;
use gateway_types::redact::redact_url;
use gateway_types::Envelope;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio_util::sync::CancellationToken;

use crate::codec::{self, REDELIVERY_COUNT_HEADER};
use crate::topology::{EVENTS_EXCHANGE, EVENTS_GUILD_QUEUE, INTERACTIONS_QUEUE};

/// Default per-consumer in-flight message cap (spec §4.3).
pub const DEFAULT_PREFETCH: u16 = 10;

/// Default cap on requeue-nack attempts before a delivery is routed to the
/// DLQ (spec §4.3 step 5).
pub const DEFAULT_MAX_REDELIVERIES: u32 = 5;

/// Default graceful-shutdown drain deadline (spec §4.3 "Shutdown").
pub const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub prefetch: u16,
    pub max_redeliveries: u32,
    pub drain_deadline: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
            max_redeliveries: DEFAULT_MAX_REDELIVERIES,
            drain_deadline: DEFAULT_DRAIN_DEADLINE,
        }
    }
}

/// One decoded delivery, plus everything needed to ack/nack it.
pub struct Delivery {
    pub envelope: Envelope,
    pub redelivery_count: u32,
    acker: Acker,
    channel: Channel,
}

impl Delivery {
    pub async fn ack(&self) -> anyhow::Result<()> {
        self.acker.ack(BasicAckOptions::default()).await.map_err(Into::into)
    }

    /// Retry this delivery, subject to the caller having already checked the
    /// redelivery cap (spec §4.3 step 5).
    ///
    /// A plain AMQP nack-requeue redelivers the original message verbatim —
    /// the broker doesn't let a consumer rewrite headers on redelivery, and
    /// exposes no hop count of its own. So instead this republishes the
    /// envelope with `x-arakis-redelivery-count` incremented, then acks the
    /// original delivery once the republish is confirmed. If the republish
    /// fails, falls back to a plain requeue-nack so the message isn't lost,
    /// at the cost of under-counting that one attempt.
    pub async fn nack_requeue(&self) -> anyhow::Result<()> {
        let (body, properties) =
            codec::encode_with_redelivery_count(&self.envelope, self.redelivery_count + 1)?;
        let routing_key = self.envelope.event_type.routing_key();

        let republished = self
            .channel
            .basic_publish(EVENTS_EXCHANGE, &routing_key, BasicPublishOptions::default(), &body, properties)
            .await;

        match republished {
            Ok(confirm) if confirm.await.is_ok() => {
                self.acker.ack(BasicAckOptions::default()).await.map_err(Into::into)
            }
            _ => self
                .acker
                .nack(BasicNackOptions { requeue: true, ..Default::default() })
                .await
                .map_err(Into::into),
        }
    }

    /// Nack without requeue — routes to the DLQ via the queue's
    /// dead-letter-exchange binding.
    pub async fn nack_dlq(&self) -> anyhow::Result<()> {
        self.acker
            .nack(BasicNackOptions { requeue: false, ..Default::default() })
            .await
            .map_err(Into::into)
    }

    /// Whether this delivery has exceeded the redelivery cap and must be
    /// dead-lettered instead of requeued again.
    pub fn exceeds_redelivery_cap(&self, max: u32) -> bool {
        self.redelivery_count >= max
    }
}

/// The Worker's AMQP consumer. Connects to the broker, binds both primary
/// queues, and yields decoded deliveries (or malformed-delivery errors,
/// which the caller nacks without requeue).
pub struct Consumer {
    connection: Connection,
    channel: Channel,
    config: ConsumerConfig,
}

/// Result of decoding one raw AMQP delivery.
pub enum DecodedDelivery {
    Ok(Delivery),
    /// Envelope body failed to decode; caller must nack-without-requeue and
    /// record a malformed-event metric (spec §4.3 step 1).
    Malformed(Acker),
}

impl Consumer {
    pub async fn connect(amqp_url: &str, config: ConsumerConfig) -> anyhow::Result<Self> {
        tracing::info!(url = %redact_url(amqp_url), "consumer connecting");
        let connection = Connection::connect(amqp_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(config.prefetch, BasicQosOptions::default())
            .await?;
        Ok(Self { connection, channel, config })
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Subscribe to both primary queues, merging their deliveries into a
    /// single stream decoded into [`DecodedDelivery`]. `shutdown` stops
    /// pulling new deliveries (existing ones remain available to drain).
    pub async fn deliveries(
        &self,
        shutdown: CancellationToken,
    ) -> anyhow::Result<impl futures_util::Stream<Item = DecodedDelivery> + Send> {
        let interactions = self
            .channel
            .basic_consume(
                INTERACTIONS_QUEUE,
                "arakis-worker-interactions",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let events = self
            .channel
            .basic_consume(
                EVENTS_GUILD_QUEUE,
                "arakis-worker-events",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let merged = futures_util::stream::select(interactions, events);
        let gated = merged.take_while(move |_| {
            let cancelled = shutdown.is_cancelled();
            async move { !cancelled }
        });
        let channel = self.channel.clone();

        Ok(gated.filter_map(move |delivery| {
            let channel = channel.clone();
            async move {
                match delivery {
                    Ok(delivery) => {
                        // Authoritative: stamped by `Delivery::nack_requeue`'s
                        // republish, not the broker's own `redelivered` flag,
                        // which never reflects a hop count past the first retry.
                        let redelivery_count =
                            codec::redelivery_count(delivery.properties.headers().as_ref());
                        match codec::decode(&delivery.data) {
                            Ok(envelope) => Some(DecodedDelivery::Ok(Delivery {
                                envelope,
                                redelivery_count,
                                acker: delivery.acker,
                                channel,
                            })),
                            Err(e) => {
                                tracing::warn!(err = %e, "malformed envelope, routing to DLQ");
                                Some(DecodedDelivery::Malformed(delivery.acker))
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(err = %e, "delivery stream error");
                        None
                    }
                }
            }
        }))
    }

    /// Close the channel then the connection (spec §4.3 "Shutdown": close
    /// channel then connection, in that order, after the drain deadline).
    pub async fn close(self) -> anyhow::Result<()> {
        self.channel.close(200, "graceful shutdown").await?;
        self.connection.close(200, "graceful shutdown").await?;
        Ok(())
    }
}

/// Custom header name re-exported for callers that need to stamp it
/// directly (e.g. tests constructing synthetic deliveries).
pub const REDELIVERY_HEADER: &str = REDELIVERY_COUNT_HEADER;
