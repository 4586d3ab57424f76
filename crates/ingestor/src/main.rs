// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Ingestor binary (spec §4.1): holds the Discord gateway session open,
//! classifies every event, and publishes it to the broker. Never opens a
//! database connection, never caches an entity, never talks to the State
//! Store — this process's whole job ends at `Publisher::publish`.

mod classify;
mod config;
mod gateway;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use gateway_broker::Publisher;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sysinfo::{Pid, System};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::IngestorConfig;
use crate::gateway::GatewayStatus;

static PROM_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

struct AppState {
    config: IngestorConfig,
    gateway_status: Arc<GatewayStatus>,
    publisher: Publisher,
    sys: Mutex<System>,
    pid: Pid,
}

#[tokio::main]
async fn main() {
    let config = IngestorConfig::parse();

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

/// Human-readable output in development, JSON in production, gated on
/// `NODE_ENV` per SPEC_FULL §6.
fn init_tracing(config: &IngestorConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if config.is_production() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Connect to the broker first, asserting topology, then start the gateway
/// session — never the other way around (spec §4.1 "Start-up").
async fn run(config: IngestorConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    tracing::info!(
        url = %gateway_types::redact::redact_url(config.broker_url()?),
        "connecting to broker"
    );
    let publisher = Publisher::connect(config.broker_url()?).await?;
    tracing::info!("broker ready, starting gateway session");

    if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
        let _ = PROM_HANDLE.set(handle);
    }

    let gateway_status = GatewayStatus::new(config.shard_id);

    let mut sys = System::new();
    sys.refresh_memory();
    let pid = Pid::from_u32(std::process::id());

    let state = Arc::new(AppState {
        config: config.clone(),
        gateway_status: Arc::clone(&gateway_status),
        publisher: publisher.clone(),
        sys: Mutex::new(sys),
        pid,
    });

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::clone(&state));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "health endpoint listening");

    let serve_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router).with_graceful_shutdown(serve_shutdown.cancelled_owned()).await
    });

    let bot_token = config.bot_token()?.to_owned();
    let gateway_result = gateway::run(
        bot_token,
        config.shard_id,
        config.shard_count,
        publisher.clone(),
        shutdown.clone(),
        gateway_status,
    );

    tokio::select! {
        _ = wait_for_termination() => {
            tracing::info!("shutdown signal received");
        }
        result = gateway_result => {
            match result {
                Ok(()) => tracing::info!("gateway session exited cleanly"),
                Err(e) => tracing::error!(err = %e, "gateway session exited fatally, halting for restart"),
            }
        }
    }

    shutdown.cancel();
    publisher.shutdown();
    let _ = server.await;
    Ok(())
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

/// The health endpoint's JSON body (spec §6): `{status, checks:{discord,
/// rabbitmq, memory}}`, 200 iff every check passes, 503 otherwise.
async fn health_handler(State(state): State<Arc<AppState>>) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    let gateway = state.gateway_status.snapshot();
    let publisher_status = state.publisher.status();

    let mut sys = state.sys.lock().await;
    sys.refresh_memory();
    let rss_mb = sys.process(state.pid).map(|p| p.memory() / 1024 / 1024).unwrap_or(0);
    let total_mb = sys.total_memory() / 1024 / 1024;
    let below_threshold = rss_mb < state.config.memory_threshold_mb;

    let discord_ok = gateway.connected;
    let rabbitmq_ok = publisher_status.connected && publisher_status.channel_open;
    let all_ok = discord_ok && rabbitmq_ok && below_threshold;

    let body = serde_json::json!({
        "status": if all_ok { "ok" } else { "degraded" },
        "checks": {
            "discord": {
                "connected": gateway.connected,
                "latency": gateway.latency_ms,
                "shardId": gateway.shard_id,
            },
            "rabbitmq": {
                "connected": publisher_status.connected,
                "channelOpen": publisher_status.channel_open,
            },
            "memory": {
                "heapUsed": rss_mb,
                "heapTotal": total_mb,
                "rss": rss_mb,
                "belowThreshold": below_threshold,
            },
        },
    });

    let status = if all_ok { axum::http::StatusCode::OK } else { axum::http::StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}

async fn metrics_handler() -> String {
    PROM_HANDLE.get().map(PrometheusHandle::render).unwrap_or_default()
}

/// Shared clock source for the best-effort error reply's deadline check
/// (`gateway::reply_best_effort`).
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_nonzero() {
        assert!(now_ms() > 0);
    }
}
