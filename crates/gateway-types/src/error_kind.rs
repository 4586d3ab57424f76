// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Error taxonomy (spec §7) — classifies *kinds* of failure, not concrete
/// error types, so the Dispatcher can decide disposition and the metrics
/// layer can tag counters uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Broker timeout, State Store timeout, platform 5xx, rate-limit beyond
    /// retry budget. Disposition: retry.
    Transient,
    /// Decode failure, unknown event type, authorization failure,
    /// validation failure, platform 4xx (not rate-limit). Disposition:
    /// nack without requeue (routed to the DLQ).
    Permanent,
    /// Interaction deferral exceeded the 2.5s budget. Disposition: nack
    /// without requeue (no followup is attempted; the platform will reject
    /// it, but the delivery still needs dead-lettering for inspection).
    DeadlineMiss,
    /// L1 cache served config older than its TTL. Not itself a failure;
    /// recorded for observability only.
    Degraded,
    /// Broker unreachable past the reconnection budget. The Ingestor halts
    /// and restarts.
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::DeadlineMiss => "deadline_miss",
            Self::Degraded => "degraded",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
