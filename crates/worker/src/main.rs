// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Worker binary (spec §4.3, §4.4): drains the broker's two primary
//! queues, runs every delivery through the Dispatcher, and turns its
//! disposition into an ack/nack/DLQ decision. Never opens a gateway
//! session (spec §6 "Worker environment").

mod config;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use futures_util::StreamExt;
use gateway_broker::consumer::DecodedDelivery;
use gateway_broker::{Consumer, ConsumerConfig, Delivery};
use gateway_dispatch::rest::{shared, TwilightRestReplier};
use gateway_dispatch::{DispatchOutcome, Dispatcher, HandlerRegistry, UnknownCommandHandler};
use gateway_state::StateStore;
use gateway_tenant::{RateLimiter, TenantManager};
use gateway_types::Disposition;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

/// TTL floor for idempotency markers: the broker's DLQ retention (spec §6)
/// plus a safety margin (spec §3 "Idempotency Marker").
const IDEMPOTENCY_TTL_SECS: u64 = 7 * 24 * 3600 + 3600;

static PROM_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let config = WorkerConfig::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e:#}");
        std::process::exit(2);
    }

    init_tracing(&config);

    if let Err(e) = run(config).await {
        tracing::error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(config: &WorkerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if config.is_production() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let state = StateStore::connect(config.state_url()?)?;

    let tenant_manager = TenantManager::new(state.clone(), shutdown.clone());
    tokio::spawn(Arc::clone(&tenant_manager).run_invalidation_listener(config.state_url()?.to_owned()));

    let rate_limiter = Arc::new(RateLimiter::new(state.clone()));

    let rest = shared(TwilightRestReplier::new(config.bot_token()?.to_owned(), config.application_id()?));

    let mut registry = HandlerRegistry::new();
    registry.register_default(Arc::new(UnknownCommandHandler));
    tracing::info!(handlers = ?registry.registered_kinds(), "handler registry populated");

    let dispatcher = Arc::new(Dispatcher::new(tenant_manager, rate_limiter, registry, rest, state.clone()));

    if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
        let _ = PROM_HANDLE.set(handle);
    }

    let health_shutdown = shutdown.clone();
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "worker health endpoint listening");
    let router = Router::new().route("/health", get(|| async { "ok" })).route("/metrics", get(metrics_handler));
    let server = tokio::spawn(async move {
        axum::serve(listener, router).with_graceful_shutdown(health_shutdown.cancelled_owned()).await
    });

    let consumer = Consumer::connect(
        config.broker_url()?,
        ConsumerConfig { prefetch: config.prefetch, max_redeliveries: config.max_redeliveries, drain_deadline: config.drain_deadline() },
    )
    .await?;

    let max_redeliveries = consumer.config().max_redeliveries;
    let mut deliveries = Box::pin(consumer.deliveries(shutdown.clone()).await?);

    let permits = Arc::new(Semaphore::new(config.prefetch as usize));
    let mut in_flight = JoinSet::new();

    // A single signal watcher cancels `shutdown`; the Consumer's delivery
    // stream is gated on that same token and ends on its own once
    // cancelled (spec §4.3 "Shutdown": stop consuming first).
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        tracing::info!("shutdown signal received, draining in-flight handlers");
        signal_shutdown.cancel();
    });

    tracing::info!("worker consuming from arrakis.interactions and arrakis.events.guild");

    while let Some(decoded) = deliveries.next().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            tracing::warn!("delivery semaphore closed unexpectedly, stopping consumption");
            break;
        };
        let dispatcher = Arc::clone(&dispatcher);
        let state = state.clone();
        in_flight.spawn(async move {
            handle_delivery(decoded, &dispatcher, &state, max_redeliveries).await;
            drop(permit);
        });
    }

    tracing::info!(deadline_ms = config.drain_deadline_ms, "draining in-flight handlers");
    let drain = tokio::time::timeout(config.drain_deadline(), async {
        while in_flight.join_next().await.is_some() {}
    });
    if drain.await.is_err() {
        tracing::warn!("drain deadline exceeded, abandoning remaining in-flight handlers");
        in_flight.shutdown().await;
    }

    consumer.close().await?;
    let _ = server.await;
    Ok(())
}

/// Decode → idempotency check → dispatch → ack/nack disposition (spec
/// §4.3 steps 1-6).
async fn handle_delivery(decoded: DecodedDelivery, dispatcher: &Dispatcher, state: &StateStore, max_redeliveries: u32) {
    let delivery = match decoded {
        DecodedDelivery::Malformed(acker) => {
            gateway_dispatch::metrics::malformed_event();
            let _ = acker.nack(lapin_nack_without_requeue()).await;
            return;
        }
        DecodedDelivery::Ok(delivery) => delivery,
    };

    match state.is_processed(&delivery.envelope.event_id).await {
        Ok(true) => {
            let _ = delivery.ack().await;
            return;
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(err = %e, "idempotency check failed, treating as retriable");
            nack_for_retry(&delivery, max_redeliveries).await;
            return;
        }
    }

    let outcome: DispatchOutcome = dispatcher.dispatch(&delivery.envelope).await;

    match outcome.disposition {
        Disposition::Ack => {
            if let Err(e) = state.mark_processed(&delivery.envelope.event_id, IDEMPOTENCY_TTL_SECS).await {
                tracing::warn!(err = %e, "failed to set idempotency marker");
            }
            let _ = delivery.ack().await;
        }
        Disposition::Drop => {
            let _ = delivery.ack().await;
        }
        Disposition::DropDlq => {
            let _ = delivery.nack_dlq().await;
        }
        Disposition::Retry => {
            nack_for_retry(&delivery, max_redeliveries).await;
        }
    }
}

async fn nack_for_retry(delivery: &Delivery, max_redeliveries: u32) {
    if delivery.exceeds_redelivery_cap(max_redeliveries) {
        let _ = delivery.nack_dlq().await;
    } else {
        let _ = delivery.nack_requeue().await;
    }
}

fn lapin_nack_without_requeue() -> lapin::options::BasicNackOptions {
    lapin::options::BasicNackOptions { requeue: false, ..Default::default() }
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut int = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => return,
        };
        tokio::select! {
            _ = term.recv() => {}
            _ = int.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn metrics_handler() -> String {
    PROM_HANDLE.get().map(PrometheusHandle::render).unwrap_or_default()
}
