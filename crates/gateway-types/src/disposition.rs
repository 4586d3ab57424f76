// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// What the Consumer should do with a delivery once the Dispatcher (or a
/// handler) has finished with it. This is the single seam through which
/// broker disposition decisions flow (Design Notes §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Set the idempotency marker and ack.
    Ack,
    /// Nack with requeue, subject to the retry cap.
    Retry,
    /// Ack without setting the idempotency marker (no-op event).
    Drop,
    /// Nack without requeue: routed to the DLQ. Used for a missed deferral
    /// deadline and other permanent failures, as distinct from `Drop`'s
    /// plain ack — the platform will never see a late reply either way,
    /// but this one still needs dead-lettering for inspection.
    DropDlq,
}
