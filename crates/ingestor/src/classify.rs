// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event classification (spec §4.1): turns one `twilight_model::gateway::
//! event::Event` into a closed [`Envelope`], or `None` when the event is out
//! of scope (DMs, presence/typing, anything uninteresting). This is the only
//! place that looks at Discord's wire shape; everything downstream sees the
//! typed envelope only (Design Notes "duck-typed payloads ... closed at the
//! boundary").

use gateway_types::envelope::{EventData, InteractionMember, MemberDelta, MessageSummary};
use gateway_types::{Envelope, EventKind, Trace};
use twilight_model::application::interaction::{Interaction, InteractionData};
use twilight_model::gateway::event::Event;

/// Build the typed envelope for one gateway event, or `None` if it's out of
/// scope for forwarding. DMs (no `guild_id`) are rejected here (spec §9).
pub fn build_envelope(shard_id: u32, event: &Event) -> Option<Envelope> {
    let timestamp = epoch_ms();
    let trace = new_trace();

    match event {
        Event::InteractionCreate(boxed) => build_interaction_envelope(shard_id, timestamp, trace, &boxed.0),
        Event::MemberAdd(member) => Some(Envelope {
            event_id: new_event_id(),
            event_type: EventKind::MemberJoin,
            timestamp,
            shard_id,
            guild_id: member.guild_id.to_string(),
            channel_id: None,
            user_id: Some(member.member.user.id.to_string()),
            interaction_id: None,
            interaction_token: None,
            trace,
            data: EventData::Empty,
        }),
        Event::MemberRemove(member) => Some(Envelope {
            event_id: new_event_id(),
            event_type: EventKind::MemberLeave,
            timestamp,
            shard_id,
            guild_id: member.guild_id.to_string(),
            channel_id: None,
            user_id: Some(member.user.id.to_string()),
            interaction_id: None,
            interaction_token: None,
            trace,
            data: EventData::Empty,
        }),
        Event::MemberUpdate(member) => Some(Envelope {
            event_id: new_event_id(),
            event_type: EventKind::MemberUpdate,
            timestamp,
            shard_id,
            guild_id: member.guild_id.to_string(),
            channel_id: None,
            user_id: Some(member.user.id.to_string()),
            interaction_id: None,
            interaction_token: None,
            trace,
            data: EventData::MemberUpdate(MemberDelta {
                added_roles: member.roles.iter().map(ToString::to_string).collect(),
                removed_roles: Vec::new(),
                nick: member.nick.clone(),
            }),
        }),
        Event::GuildCreate(guild) => Some(Envelope {
            event_id: new_event_id(),
            event_type: EventKind::GuildJoin,
            timestamp,
            shard_id,
            guild_id: guild.id().to_string(),
            channel_id: None,
            user_id: None,
            interaction_id: None,
            interaction_token: None,
            trace,
            data: EventData::Empty,
        }),
        Event::GuildDelete(guild) if !guild.unavailable => Some(Envelope {
            event_id: new_event_id(),
            event_type: EventKind::GuildLeave,
            timestamp,
            shard_id,
            guild_id: guild.id.to_string(),
            channel_id: None,
            user_id: None,
            interaction_id: None,
            interaction_token: None,
            trace,
            data: EventData::Empty,
        }),
        Event::MessageCreate(message) => {
            let guild_id = message.guild_id?;
            Some(Envelope {
                event_id: new_event_id(),
                event_type: EventKind::MessageCreate,
                timestamp,
                shard_id,
                guild_id: guild_id.to_string(),
                channel_id: Some(message.channel_id.to_string()),
                user_id: Some(message.author.id.to_string()),
                interaction_id: None,
                interaction_token: None,
                trace,
                data: EventData::Message(MessageSummary {
                    author_id: message.author.id.to_string(),
                    has_attachments: !message.attachments.is_empty(),
                    content_len: message.content.len() as u32,
                }),
            })
        }
        _ => None,
    }
}

fn build_interaction_envelope(shard_id: u32, timestamp: u64, trace: Trace, interaction: &Interaction) -> Option<Envelope> {
    let guild_id = interaction.guild_id?;
    let user_id = interaction.author_id().map(|id| id.to_string());
    let member = interaction_member(interaction);

    use twilight_model::application::interaction::InteractionType;

    let (event_type, data) = match (interaction.kind, interaction.data.as_ref()?) {
        (InteractionType::ApplicationCommandAutocomplete, InteractionData::ApplicationCommand(command)) => (
            EventKind::InteractionAutocomplete { name: command.name.clone() },
            EventData::Autocomplete {
                focused_option: focused_option_name(command),
                options: serde_json::to_value(&command.options).unwrap_or(serde_json::Value::Null),
            },
        ),
        (InteractionType::ApplicationCommand, InteractionData::ApplicationCommand(command)) => (
            EventKind::InteractionCommand { name: command.name.clone() },
            EventData::Command {
                options: serde_json::to_value(&command.options).unwrap_or(serde_json::Value::Null),
                member,
            },
        ),
        (InteractionType::MessageComponent, InteractionData::MessageComponent(component)) => {
            (EventKind::InteractionButton { custom_id: component.custom_id.clone() }, EventData::Button { member })
        }
        (InteractionType::ModalSubmit, InteractionData::ModalSubmit(modal)) => (
            EventKind::InteractionModal { custom_id: modal.custom_id.clone() },
            EventData::Modal {
                components: serde_json::to_value(&modal.components).unwrap_or(serde_json::Value::Null),
                member,
            },
        ),
        _ => return None,
    };

    Some(Envelope {
        event_id: new_event_id(),
        event_type,
        timestamp,
        shard_id,
        guild_id: guild_id.to_string(),
        channel_id: interaction.channel.as_ref().map(|c| c.id.to_string()),
        user_id,
        interaction_id: Some(interaction.id.to_string()),
        interaction_token: Some(interaction.token.clone()),
        trace,
        data,
    })
}

/// Find the option currently being typed, for autocomplete routing.
fn focused_option_name(command: &twilight_model::application::interaction::application_command::CommandData) -> Option<String> {
    fn search(options: &[twilight_model::application::interaction::application_command::CommandDataOption]) -> Option<String> {
        use twilight_model::application::interaction::application_command::CommandOptionValue;
        for option in options {
            match &option.value {
                CommandOptionValue::Focused(_, _) => return Some(option.name.clone()),
                CommandOptionValue::SubCommand(nested) | CommandOptionValue::SubCommandGroup(nested) => {
                    if let Some(found) = search(nested) {
                        return Some(found);
                    }
                }
                _ => {}
            }
        }
        None
    }
    search(&command.options)
}

fn interaction_member(interaction: &Interaction) -> Option<InteractionMember> {
    let member = interaction.member.as_ref()?;
    let user_id = member.user.as_ref().map(|u| u.id.to_string()).unwrap_or_default();
    Some(InteractionMember { user_id, permissions: member.permissions.unwrap_or_default().bits().to_string() })
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(std::time::Duration::ZERO)
        .as_millis() as u64
}

fn new_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn new_trace() -> Trace {
    Trace { trace_id: uuid::Uuid::new_v4().to_string(), span_id: uuid::Uuid::new_v4().to_string(), parent_span_id: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twilight_model::gateway::payload::incoming::MemberAdd;
    use twilight_model::guild::{Member, MemberFlags};
    use twilight_model::id::Id;
    use twilight_model::user::User;

    fn sample_user(id: u64) -> User {
        User {
            accent_color: None,
            avatar: None,
            avatar_decoration: None,
            banner: None,
            bot: false,
            discriminator: 0,
            email: None,
            flags: None,
            global_name: None,
            id: Id::new(id),
            locale: None,
            mfa_enabled: None,
            name: "tester".to_owned(),
            premium_type: None,
            public_flags: None,
            system: None,
            verified: None,
        }
    }

    #[test]
    fn member_add_classifies_to_member_join() {
        let event = Event::MemberAdd(Box::new(MemberAdd {
            guild_id: Id::new(1),
            member: Member {
                avatar: None,
                communication_disabled_until: None,
                deaf: false,
                flags: MemberFlags::empty(),
                joined_at: None,
                mute: false,
                nick: None,
                pending: false,
                premium_since: None,
                roles: Vec::new(),
                user: sample_user(2),
            },
        }));

        let envelope = build_envelope(0, &event).expect("classified");
        assert_eq!(envelope.event_type, EventKind::MemberJoin);
        assert_eq!(envelope.guild_id, "1");
        assert_eq!(envelope.user_id.as_deref(), Some("2"));
    }
}
