// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types shared by the Ingestor and Worker.
//!
//! This crate has no dependency on any other workspace crate so that the
//! envelope format cannot drift between the process that publishes it and
//! the process that consumes it.

pub mod custom_id;
pub mod disposition;
pub mod envelope;
pub mod error_kind;
pub mod redact;
pub mod tenant;

pub use custom_id::CustomId;
pub use disposition::Disposition;
pub use envelope::{Envelope, EventData, EventKind, MemberDelta, MessageSummary, Trace};
pub use error_kind::ErrorKind;
pub use tenant::{FeatureFlags, RateLimitConfig, TenantConfig, Tier};
