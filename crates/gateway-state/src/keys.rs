// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key-space layout (spec §6 "State Store key space"). Centralized here so
//! the literal prefixes appear exactly once.

pub fn tenant_config(guild_id: &str) -> String {
    format!("tenant:config:{guild_id}")
}

pub fn cooldown(command: &str, user_id: &str) -> String {
    format!("cd:{command}:{user_id}")
}

pub fn session(kind: &str, user_id: &str) -> String {
    format!("sess:{kind}:{user_id}")
}

pub fn rate_bucket(tenant_id: &str, action_type: &str, window_index: u64) -> String {
    format!("rl:{tenant_id}:{action_type}:{window_index}")
}

pub fn idempotency(event_id: &str) -> String {
    format!("idem:{event_id}")
}

/// pub/sub channel for tenant-config invalidation broadcasts.
pub const TENANT_RELOAD_CHANNEL: &str = "tenant:reload";

/// Wildcard payload meaning "invalidate every tenant".
pub const RELOAD_ALL: &str = "*";
