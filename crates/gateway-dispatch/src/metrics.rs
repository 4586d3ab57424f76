// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Counters named throughout spec §7/§8 (SPEC_FULL §6 supplement: a
//! `/metrics` Prometheus-text endpoint), grounded in the pack's
//! `amqp-lapin-helper` reference's `register_int_gauge_vec!` pattern,
//! generalized to the `metrics`/`metrics-exporter-prometheus` pairing the
//! rest of the pack uses.

use gateway_types::ErrorKind;

pub fn admin_denied() {
    metrics::counter!("arakis_admin_denied_total").increment(1);
}

pub fn deadline_miss() {
    metrics::counter!("arakis_deadline_miss_total").increment(1);
}

pub fn malformed_event() {
    metrics::counter!("arakis_malformed_event_total").increment(1);
}

pub fn dispatch_error(kind: ErrorKind) {
    metrics::counter!("arakis_dispatch_error_total", "kind" => kind.as_str()).increment(1);
}

pub fn rate_limited(action_type: &str) {
    metrics::counter!("arakis_rate_limited_total", "action" => action_type.to_owned()).increment(1);
}

pub fn handler_invoked(event_type: &str) {
    metrics::counter!("arakis_handler_invoked_total", "event_type" => event_type.to_owned()).increment(1);
}
