// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the compiled `arakis-ingestor`/`arakis-worker` binaries as
//! subprocesses. Neither binary reaches its health endpoint without a real
//! broker/state-store/gateway connection (spec §4.1, §4.3 "Start-up" both
//! connect before serving), so these tests are limited to what's reachable
//! without live external services: config validation, and clean exit under
//! a missing-dependency start-up failure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;

/// Resolve the path to a compiled workspace binary.
pub fn workspace_binary(name: &str) -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/smoke -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join(name)
}

pub fn ingestor_binary() -> PathBuf {
    workspace_binary("arakis-ingestor")
}

pub fn worker_binary() -> PathBuf {
    workspace_binary("arakis-worker")
}

/// Run a binary with a fully-scrubbed environment plus the given overrides,
/// and return its output after it exits (or an error if it doesn't exit
/// within `timeout`).
pub async fn run_with_env(
    binary: &Path,
    env: &[(&str, &str)],
    timeout: Duration,
) -> anyhow::Result<Output> {
    anyhow::ensure!(binary.exists(), "binary not found at {}; build the workspace first", binary.display());

    let mut command = Command::new(binary);
    command.env_clear();
    let vars: HashMap<_, _> = env.iter().copied().collect();
    command.envs(vars);
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let child = command.spawn()?;
    let join = tokio::task::spawn_blocking(move || child.wait_with_output());
    let output = tokio::time::timeout(timeout, join).await???;
    Ok(output)
}
