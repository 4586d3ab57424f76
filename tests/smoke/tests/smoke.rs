// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Black-box start-up smoke tests for the two binaries. Both connect to a
//! broker/state-store before serving anything (spec §4.1, §4.3
//! "Start-up"), so without live RabbitMQ/Redis/Discord these tests can only
//! exercise config validation, not the health or metrics endpoints.

use std::time::Duration;

use arakis_specs::{ingestor_binary, run_with_env, worker_binary};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn ingestor_rejects_empty_environment() -> anyhow::Result<()> {
    let output = run_with_env(&ingestor_binary(), &[], TIMEOUT).await?;

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("DISCORD_BOT_TOKEN"));
    assert!(stderr.contains("RABBITMQ_URL"));

    Ok(())
}

#[tokio::test]
async fn ingestor_rejects_invalid_shard_topology() -> anyhow::Result<()> {
    let output = run_with_env(
        &ingestor_binary(),
        &[
            ("DISCORD_BOT_TOKEN", "token"),
            ("RABBITMQ_URL", "amqp://localhost"),
            ("SHARD_ID", "5"),
            ("SHARD_COUNT", "2"),
        ],
        TIMEOUT,
    )
    .await?;

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SHARD_ID"));

    Ok(())
}

#[tokio::test]
async fn worker_rejects_empty_environment() -> anyhow::Result<()> {
    let output = run_with_env(&worker_binary(), &[], TIMEOUT).await?;

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("RABBITMQ_URL"));
    assert!(stderr.contains("REDIS_URL"));
    assert!(stderr.contains("DATABASE_URL"));
    assert!(stderr.contains("DISCORD_BOT_TOKEN"));
    assert!(stderr.contains("DISCORD_APPLICATION_ID"));

    Ok(())
}

#[tokio::test]
async fn worker_rejects_zero_prefetch() -> anyhow::Result<()> {
    let output = run_with_env(
        &worker_binary(),
        &[
            ("RABBITMQ_URL", "amqp://localhost"),
            ("REDIS_URL", "redis://localhost"),
            ("DATABASE_URL", "postgres://localhost/arakis"),
            ("DISCORD_BOT_TOKEN", "token"),
            ("DISCORD_APPLICATION_ID", "1"),
            ("PREFETCH", "0"),
        ],
        TIMEOUT,
    )
    .await?;

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("PREFETCH"));

    Ok(())
}

#[tokio::test]
async fn ingestor_rejects_out_of_range_node_env() -> anyhow::Result<()> {
    let output = run_with_env(
        &ingestor_binary(),
        &[
            ("DISCORD_BOT_TOKEN", "token"),
            ("RABBITMQ_URL", "amqp://localhost"),
            ("NODE_ENV", "not-a-real-environment"),
        ],
        TIMEOUT,
    )
    .await?;

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("NODE_ENV"));

    Ok(())
}
