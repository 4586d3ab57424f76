// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Counters emitted by the Ingestor side of the pipeline (SPEC_FULL §6
//! `/metrics` supplement), paired with `gateway-dispatch`'s Worker-side
//! counters under the same `arakis_` prefix.

pub fn publish_error() {
    metrics::counter!("arakis_publish_error_total").increment(1);
}

pub fn publish_retry() {
    metrics::counter!("arakis_publish_retry_total").increment(1);
}
