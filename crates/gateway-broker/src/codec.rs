// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Envelope wire encoding: JSON body plus the headers the Publisher and
//! Consumer both rely on (spec §4.2, §4.3).

use gateway_types::Envelope;
use lapin::protocol::basic::AMQPProperties;
use lapin::types::{AMQPValue, FieldTable, ShortString};

/// Custom header tracking requeue-nack count, independent of the broker's
/// own `redelivered` flag (spec §4.3 step 5).
pub const REDELIVERY_COUNT_HEADER: &str = "x-arakis-redelivery-count";

pub fn encode(envelope: &Envelope) -> anyhow::Result<(Vec<u8>, AMQPProperties)> {
    encode_with_redelivery_count(envelope, 0)
}

/// Encode with an explicit `x-arakis-redelivery-count`. Used by the
/// Consumer to republish a retried delivery with the count incremented,
/// since a plain AMQP nack-requeue redelivers the original message
/// unmodified and the broker does not expose a hop count of its own
/// (spec §4.3 step 5).
pub fn encode_with_redelivery_count(
    envelope: &Envelope,
    redelivery_count: u32,
) -> anyhow::Result<(Vec<u8>, AMQPProperties)> {
    let body = serde_json::to_vec(envelope)?;

    let mut headers = FieldTable::default();
    headers.insert("shardId".into(), AMQPValue::LongLongInt(envelope.shard_id as i64));
    headers.insert("guildId".into(), AMQPValue::LongString(envelope.guild_id.as_str().into()));
    headers.insert(REDELIVERY_COUNT_HEADER.into(), AMQPValue::LongLongInt(redelivery_count as i64));

    let properties = AMQPProperties::default()
        .with_content_type(ShortString::from("application/json"))
        .with_delivery_mode(2) // persistent
        .with_message_id(envelope.event_id.clone().into())
        .with_timestamp(envelope.timestamp / 1000)
        .with_headers(headers);

    Ok((body, properties))
}

pub fn decode(body: &[u8]) -> anyhow::Result<Envelope> {
    serde_json::from_slice(body).map_err(|e| anyhow::anyhow!("invalid envelope JSON: {e}"))
}

/// Read the redelivery count header, defaulting to 0 for first delivery.
pub fn redelivery_count(headers: Option<&FieldTable>) -> u32 {
    headers
        .and_then(|h| h.inner().get(REDELIVERY_COUNT_HEADER))
        .and_then(|v| match v {
            AMQPValue::LongLongInt(n) => Some(*n as u32),
            AMQPValue::LongInt(n) => Some(*n as u32),
            AMQPValue::ShortInt(n) => Some(*n as u32),
            _ => None,
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::envelope::{EventData, EventKind};
    use gateway_types::Trace;

    fn sample() -> Envelope {
        Envelope {
            event_id: "evt-1".to_owned(),
            event_type: EventKind::MessageCreate,
            timestamp: 1_700_000_000_000,
            shard_id: 2,
            guild_id: "g1".to_owned(),
            channel_id: Some("c1".to_owned()),
            user_id: Some("u1".to_owned()),
            interaction_id: None,
            interaction_token: None,
            trace: Trace { trace_id: "t1".into(), span_id: "s1".into(), parent_span_id: None },
            data: EventData::Empty,
        }
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let envelope = sample();
        let (body, _props) = encode(&envelope).unwrap();
        let decoded = decode(&body).unwrap();
        assert_eq!(decoded.event_id, envelope.event_id);
    }

    #[test]
    fn malformed_body_fails_to_decode() {
        assert!(decode(b"not json").is_err());
    }

    #[test]
    fn missing_header_defaults_to_zero_redeliveries() {
        assert_eq!(redelivery_count(None), 0);
    }
}
