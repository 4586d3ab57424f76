// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The broker payload: a closed, strongly-typed envelope for every Discord
//! gateway event Arakis forwards downstream.

use serde::{Deserialize, Serialize};

/// Discord's `ADMINISTRATOR` permission bit (see `data.member.permissions`).
pub const ADMINISTRATOR_BIT: u64 = 0x0000_0000_0000_0008;

/// The broker queue an envelope is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Queue {
    /// `arrakis.interactions` — slash commands, buttons, modals, autocomplete.
    Interactions,
    /// `arrakis.events.guild` — member/guild/message events.
    EventsGuild,
}

impl Queue {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Interactions => "arrakis.interactions",
            Self::EventsGuild => "arrakis.events.guild",
        }
    }
}

/// The closed set of event kinds Arakis forwards. Each variant's `Display`
/// impl (via [`EventKind::routing_key`]) reproduces the dotted routing key
/// from the spec, including the dynamic tail for interaction kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    InteractionCommand { name: String },
    InteractionButton { custom_id: String },
    InteractionModal { custom_id: String },
    InteractionAutocomplete { name: String },
    MemberJoin,
    MemberLeave,
    MemberUpdate,
    GuildJoin,
    GuildLeave,
    MessageCreate,
}

impl EventKind {
    /// The dotted routing key this kind publishes under, e.g.
    /// `interaction.command.stats`.
    pub fn routing_key(&self) -> String {
        match self {
            Self::InteractionCommand { name } => format!("interaction.command.{name}"),
            Self::InteractionButton { custom_id } => format!("interaction.button.{custom_id}"),
            Self::InteractionModal { custom_id } => format!("interaction.modal.{custom_id}"),
            Self::InteractionAutocomplete { name } => {
                format!("interaction.autocomplete.{name}")
            }
            Self::MemberJoin => "member.join".to_owned(),
            Self::MemberLeave => "member.leave".to_owned(),
            Self::MemberUpdate => "member.update".to_owned(),
            Self::GuildJoin => "guild.join".to_owned(),
            Self::GuildLeave => "guild.leave".to_owned(),
            Self::MessageCreate => "message.create".to_owned(),
        }
    }

    /// The broker queue this kind is bound to (spec §4.1 routing table).
    pub fn queue(&self) -> Queue {
        match self {
            Self::InteractionCommand { .. }
            | Self::InteractionButton { .. }
            | Self::InteractionModal { .. }
            | Self::InteractionAutocomplete { .. } => Queue::Interactions,
            Self::MemberJoin
            | Self::MemberLeave
            | Self::MemberUpdate
            | Self::GuildJoin
            | Self::GuildLeave
            | Self::MessageCreate => Queue::EventsGuild,
        }
    }

    /// The broker priority this kind publishes with (spec §4.1 routing table,
    /// 0-10, higher delivers first within a priority queue).
    pub fn priority(&self) -> u8 {
        match self {
            Self::InteractionCommand { .. } => 10,
            Self::InteractionButton { .. } | Self::InteractionModal { .. } => 8,
            Self::InteractionAutocomplete { .. } => 6,
            Self::MemberJoin | Self::MemberLeave => 5,
            Self::GuildJoin | Self::GuildLeave => 4,
            Self::MemberUpdate => 3,
            Self::MessageCreate => 1,
        }
    }

    /// True for any interaction kind (subject to the 2.5s deferral deadline).
    pub fn is_interaction(&self) -> bool {
        matches!(
            self,
            Self::InteractionCommand { .. }
                | Self::InteractionButton { .. }
                | Self::InteractionModal { .. }
                | Self::InteractionAutocomplete { .. }
        )
    }
}

/// Correlation context propagated from the Ingestor into the Worker's span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
}

/// Delta carried by `member.update` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberDelta {
    pub added_roles: Vec<String>,
    pub removed_roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
}

/// Summary carried by `message.create` events. Arakis never caches message
/// content; this is the minimal projection handlers act on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSummary {
    pub author_id: String,
    pub has_attachments: bool,
    pub content_len: u32,
}

/// Member info carried by interaction events, used for authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionMember {
    pub user_id: String,
    /// Decimal-string permission bitmask, per Discord's wire format.
    pub permissions: String,
}

impl InteractionMember {
    /// Parse [`Self::permissions`] and test the administrator bit.
    pub fn is_administrator(&self) -> bool {
        self.permissions
            .parse::<u64>()
            .map(|bits| bits & ADMINISTRATOR_BIT != 0)
            .unwrap_or(false)
    }
}

/// The closed, typed payload carried by an envelope. One variant per
/// [`EventKind`] family; `Unknown` exists only to tolerate event kinds
/// introduced by Discord after this code is deployed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventData {
    Command {
        options: serde_json::Value,
        member: Option<InteractionMember>,
    },
    Button {
        member: Option<InteractionMember>,
    },
    Modal {
        components: serde_json::Value,
        member: Option<InteractionMember>,
    },
    Autocomplete {
        focused_option: Option<String>,
        options: serde_json::Value,
    },
    MemberUpdate(MemberDelta),
    Message(MessageSummary),
    Empty,
    Unknown(serde_json::Value),
}

/// The broker payload. Immutable from the moment the Ingestor publishes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event_id: String,
    pub event_type: EventKind,
    /// Milliseconds since epoch at Ingestor receipt.
    pub timestamp: u64,
    pub shard_id: u32,
    /// Tenant key. Required for all tenant-scoped events; DMs are rejected
    /// at the Ingestor, so this is always present in a published envelope.
    pub guild_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_token: Option<String>,
    pub trace: Trace,
    pub data: EventData,
}

impl Envelope {
    /// True iff this envelope carries an interaction (both id and token
    /// are always present together).
    pub fn is_interaction(&self) -> bool {
        self.interaction_id.is_some() && self.interaction_token.is_some()
    }

    /// Milliseconds remaining until the hard 2.5s deferral deadline, as
    /// measured from `now_ms`. Saturates at zero once the deadline has
    /// passed.
    pub fn defer_deadline_remaining_ms(&self, now_ms: u64) -> u64 {
        let deadline = self.timestamp.saturating_add(2_500);
        deadline.saturating_sub(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_key_matches_dynamic_tail() {
        let kind = EventKind::InteractionCommand { name: "leaderboard".to_owned() };
        assert_eq!(kind.routing_key(), "interaction.command.leaderboard");
        assert_eq!(kind.queue(), Queue::Interactions);
        assert_eq!(kind.priority(), 10);
    }

    #[test]
    fn message_create_is_low_priority_guild_queue() {
        let kind = EventKind::MessageCreate;
        assert_eq!(kind.routing_key(), "message.create");
        assert_eq!(kind.queue(), Queue::EventsGuild);
        assert_eq!(kind.priority(), 1);
        assert!(!kind.is_interaction());
    }

    #[test]
    fn administrator_bit_detection() {
        let admin = InteractionMember { user_id: "u1".into(), permissions: "8".into() };
        assert!(admin.is_administrator());

        let send_messages_only =
            InteractionMember { user_id: "u1".into(), permissions: "2048".into() };
        assert!(!send_messages_only.is_administrator());
    }

    #[test]
    fn interaction_requires_both_id_and_token() {
        let mut envelope = sample_envelope();
        envelope.interaction_id = Some("int-1".into());
        envelope.interaction_token = None;
        assert!(!envelope.is_interaction());

        envelope.interaction_token = Some("tok-1".into());
        assert!(envelope.is_interaction());
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = sample_envelope();
        let json = serde_json::to_string(&envelope).expect("serialize");
        let decoded: Envelope = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded.event_id, envelope.event_id);
        assert_eq!(decoded.event_type, envelope.event_type);
    }

    fn sample_envelope() -> Envelope {
        Envelope {
            event_id: "evt-1".into(),
            event_type: EventKind::InteractionCommand { name: "stats".into() },
            timestamp: 1_000,
            shard_id: 0,
            guild_id: "g1".into(),
            channel_id: Some("c1".into()),
            user_id: Some("u1".into()),
            interaction_id: None,
            interaction_token: None,
            trace: Trace { trace_id: "t1".into(), span_id: "s1".into(), parent_span_id: None },
            data: EventData::Empty,
        }
    }
}
