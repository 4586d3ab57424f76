// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker topology assertion (spec §6). Idempotent: safe to call on every
//! Ingestor start-up, mirroring `queue_declare`'s idempotent semantics.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};

pub const EVENTS_EXCHANGE: &str = "arrakis.events";
pub const DLX_EXCHANGE: &str = "arrakis.dlx";
pub const INTERACTIONS_QUEUE: &str = "arrakis.interactions";
pub const EVENTS_GUILD_QUEUE: &str = "arrakis.events.guild";
pub const DLQ_QUEUE: &str = "arrakis.dlq";

const INTERACTIONS_BINDINGS: &[&str] = &[
    "interaction.*",
    "interaction.command.*",
    "interaction.button.*",
    "interaction.modal.*",
    "interaction.autocomplete.*",
];

const EVENTS_GUILD_BINDINGS: &[&str] = &["guild.*", "member.*", "message.*"];

/// Declare exchanges, queues, and bindings. Run once at start-up before the
/// gateway connects (spec §4.1: "Never start the gateway before the broker
/// is publish-ready").
pub async fn assert_topology(channel: &Channel) -> anyhow::Result<()> {
    channel
        .exchange_declare(
            EVENTS_EXCHANGE,
            ExchangeKind::Topic,
            ExchangeDeclareOptions { durable: true, ..Default::default() },
            FieldTable::default(),
        )
        .await?;

    channel
        .exchange_declare(
            DLX_EXCHANGE,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions { durable: true, ..Default::default() },
            FieldTable::default(),
        )
        .await?;

    let mut dlq_args = FieldTable::default();
    dlq_args.insert("x-message-ttl".into(), (7 * 24 * 3600 * 1000_i64).into());
    channel
        .queue_declare(DLQ_QUEUE, QueueDeclareOptions { durable: true, ..Default::default() }, dlq_args)
        .await?;
    channel
        .queue_bind(DLQ_QUEUE, DLX_EXCHANGE, "", QueueBindOptions::default(), FieldTable::default())
        .await?;

    let mut interactions_args = FieldTable::default();
    interactions_args.insert("x-max-priority".into(), 10_i16.into());
    interactions_args.insert("x-dead-letter-exchange".into(), DLX_EXCHANGE.into());
    channel
        .queue_declare(
            INTERACTIONS_QUEUE,
            QueueDeclareOptions { durable: true, ..Default::default() },
            interactions_args,
        )
        .await?;
    for binding in INTERACTIONS_BINDINGS {
        channel
            .queue_bind(
                INTERACTIONS_QUEUE,
                EVENTS_EXCHANGE,
                binding,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    let mut guild_args = FieldTable::default();
    guild_args.insert("x-dead-letter-exchange".into(), DLX_EXCHANGE.into());
    channel
        .queue_declare(
            EVENTS_GUILD_QUEUE,
            QueueDeclareOptions { durable: true, ..Default::default() },
            guild_args,
        )
        .await?;
    for binding in EVENTS_GUILD_BINDINGS {
        channel
            .queue_bind(
                EVENTS_GUILD_QUEUE,
                EVENTS_EXCHANGE,
                binding,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
    }

    tracing::info!("broker topology asserted");
    Ok(())
}
