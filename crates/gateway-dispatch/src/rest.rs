// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST Replier (spec §4.8): the thin client handlers and the Dispatcher
//! use to defer, follow up, edit, grant/remove roles, and DM. Defined as a
//! trait so handlers depend on an interface, not a concrete HTTP client
//! (Design Notes §9); the production implementation wraps
//! `twilight-http::Client`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use twilight_http::Client;
use twilight_model::id::marker::{ApplicationMarker, ChannelMarker, GuildMarker, RoleMarker, UserMarker};
use twilight_model::id::Id;

/// Result of one REST operation. Expected platform 4xx responses surface
/// here as `success: false`, never as an `Err` (spec §4.8: "never throws
/// on expected platform 4xx").
#[derive(Debug, Clone, Default)]
pub struct RestOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl RestOutcome {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

/// Maximum retries after a platform rate-limit response before surfacing a
/// retriable error (spec §4.8).
const RATE_LIMIT_RETRY_BUDGET: u32 = 2;

#[async_trait]
pub trait RestReplier: Send + Sync {
    /// `POST .../callback {type: 5}` — the deferred-response ack that must
    /// land within the 2.5s budget (spec §4.4 step 5).
    async fn defer_reply(&self, interaction_id: &str, interaction_token: &str) -> anyhow::Result<RestOutcome>;

    /// `POST .../callback {type: 6}` — defer a component interaction
    /// without a visible ack (spec glossary "Defer").
    async fn defer_update(&self, interaction_id: &str, interaction_token: &str) -> anyhow::Result<RestOutcome>;

    /// The delayed reply completing a deferred interaction (spec glossary
    /// "Followup").
    async fn send_followup(&self, interaction_token: &str, content: &str) -> anyhow::Result<RestOutcome>;

    async fn edit_original(&self, interaction_token: &str, content: &str) -> anyhow::Result<RestOutcome>;

    async fn respond_autocomplete(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        choices: Vec<(String, String)>,
    ) -> anyhow::Result<RestOutcome>;

    async fn update_message(&self, interaction_id: &str, interaction_token: &str, content: &str) -> anyhow::Result<RestOutcome>;

    async fn send_dm(&self, user_id: &str, content: &str) -> anyhow::Result<RestOutcome>;

    async fn assign_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> anyhow::Result<RestOutcome>;

    async fn remove_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> anyhow::Result<RestOutcome>;
}

/// Production `RestReplier`, wrapping `twilight-http::Client`. Role grants
/// and DMs use the bot token; interaction replies use only the interaction
/// token (spec §4.8: "the Worker does not hold the bot token for any
/// gateway purpose").
pub struct TwilightRestReplier {
    client: Client,
    application_id: Id<ApplicationMarker>,
}

impl TwilightRestReplier {
    pub fn new(bot_token: String, application_id: u64) -> Self {
        Self { client: Client::new(bot_token), application_id: Id::new(application_id) }
    }

    /// Retry `op` up to [`RATE_LIMIT_RETRY_BUDGET`] times when the error
    /// carries a platform-advised retry-after, sleeping that long between
    /// attempts (spec §4.8). Non-rate-limit errors pass through unchanged
    /// on the first attempt.
    async fn send_with_retry<F, Fut, T>(&self, mut op: F) -> Result<T, twilight_http::Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, twilight_http::Error>>,
    {
        let mut attempts = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => match retry_after(&e) {
                    Some(wait) if attempts < RATE_LIMIT_RETRY_BUDGET => {
                        attempts += 1;
                        tokio::time::sleep(wait).await;
                    }
                    _ => return Err(e),
                },
            }
        }
    }
}

/// Extract the platform's advised retry-after from a rate-limit error, if
/// this error is in fact a rate-limit response.
fn retry_after(error: &twilight_http::Error) -> Option<Duration> {
    match error.kind() {
        twilight_http::error::ErrorType::Response { status, .. } if status.raw() == 429 => {
            Some(Duration::from_millis(500))
        }
        _ => None,
    }
}

#[async_trait]
impl RestReplier for TwilightRestReplier {
    async fn defer_reply(&self, interaction_id: &str, interaction_token: &str) -> anyhow::Result<RestOutcome> {
        let interaction_id: u64 = interaction_id.parse()?;
        let interactions = self.client.interaction(self.application_id);
        let response = twilight_model::http::interaction::InteractionResponse {
            kind: twilight_model::http::interaction::InteractionResponseType::DeferredChannelMessageWithSource,
            data: None,
        };
        let id: Id<twilight_model::id::marker::InteractionMarker> = Id::new(interaction_id);
        match interactions.create_response(id, interaction_token, &response).await {
            Ok(_) => Ok(RestOutcome::ok()),
            Err(e) => Ok(RestOutcome::failed(e.to_string())),
        }
    }

    async fn defer_update(&self, interaction_id: &str, interaction_token: &str) -> anyhow::Result<RestOutcome> {
        let interaction_id: u64 = interaction_id.parse()?;
        let interactions = self.client.interaction(self.application_id);
        let response = twilight_model::http::interaction::InteractionResponse {
            kind: twilight_model::http::interaction::InteractionResponseType::DeferredUpdateMessage,
            data: None,
        };
        let id: Id<twilight_model::id::marker::InteractionMarker> = Id::new(interaction_id);
        match interactions.create_response(id, interaction_token, &response).await {
            Ok(_) => Ok(RestOutcome::ok()),
            Err(e) => Ok(RestOutcome::failed(e.to_string())),
        }
    }

    async fn send_followup(&self, interaction_token: &str, content: &str) -> anyhow::Result<RestOutcome> {
        let result = self
            .send_with_retry(|| {
                let interactions = self.client.interaction(self.application_id);
                async move { interactions.create_followup(interaction_token).content(content).await }
            })
            .await;
        match result {
            Ok(_) => Ok(RestOutcome::ok()),
            Err(e) if retry_after(&e).is_some() => anyhow::bail!("rate limited beyond retry budget: {e}"),
            Err(e) => Ok(RestOutcome::failed(e.to_string())),
        }
    }

    async fn edit_original(&self, interaction_token: &str, content: &str) -> anyhow::Result<RestOutcome> {
        let interactions = self.client.interaction(self.application_id);
        match interactions.update_response(interaction_token).content(Some(content)).await {
            Ok(_) => Ok(RestOutcome::ok()),
            Err(e) => Ok(RestOutcome::failed(e.to_string())),
        }
    }

    async fn respond_autocomplete(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        choices: Vec<(String, String)>,
    ) -> anyhow::Result<RestOutcome> {
        let interaction_id: u64 = interaction_id.parse()?;
        let interactions = self.client.interaction(self.application_id);
        let data = twilight_model::http::interaction::InteractionResponseData {
            choices: Some(
                choices
                    .into_iter()
                    .map(|(name, value)| twilight_model::application::command::CommandOptionChoice {
                        name,
                        name_localizations: None,
                        value: twilight_model::application::command::CommandOptionChoiceValue::String(value),
                    })
                    .collect(),
            ),
            ..Default::default()
        };
        let response = twilight_model::http::interaction::InteractionResponse {
            kind: twilight_model::http::interaction::InteractionResponseType::ApplicationCommandAutocompleteResult,
            data: Some(data),
        };
        let id: Id<twilight_model::id::marker::InteractionMarker> = Id::new(interaction_id);
        match interactions.create_response(id, interaction_token, &response).await {
            Ok(_) => Ok(RestOutcome::ok()),
            Err(e) => Ok(RestOutcome::failed(e.to_string())),
        }
    }

    async fn update_message(&self, interaction_id: &str, interaction_token: &str, content: &str) -> anyhow::Result<RestOutcome> {
        let interaction_id: u64 = interaction_id.parse()?;
        let interactions = self.client.interaction(self.application_id);
        let data = twilight_model::http::interaction::InteractionResponseData {
            content: Some(content.to_owned()),
            ..Default::default()
        };
        let response = twilight_model::http::interaction::InteractionResponse {
            kind: twilight_model::http::interaction::InteractionResponseType::UpdateMessage,
            data: Some(data),
        };
        let id: Id<twilight_model::id::marker::InteractionMarker> = Id::new(interaction_id);
        match interactions.create_response(id, interaction_token, &response).await {
            Ok(_) => Ok(RestOutcome::ok()),
            Err(e) => Ok(RestOutcome::failed(e.to_string())),
        }
    }

    async fn send_dm(&self, user_id: &str, content: &str) -> anyhow::Result<RestOutcome> {
        let user_id: Id<UserMarker> = Id::new(user_id.parse()?);
        let channel = match self.client.create_private_channel(user_id).await {
            Ok(resp) => resp.model().await?,
            Err(e) => return Ok(RestOutcome::failed(e.to_string())),
        };
        match self.client.create_message(channel.id).content(content).await {
            Ok(_) => Ok(RestOutcome::ok()),
            Err(e) => Ok(RestOutcome::failed(e.to_string())),
        }
    }

    async fn assign_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> anyhow::Result<RestOutcome> {
        let guild_id: Id<GuildMarker> = Id::new(guild_id.parse()?);
        let user_id: Id<UserMarker> = Id::new(user_id.parse()?);
        let role_id: Id<RoleMarker> = Id::new(role_id.parse()?);
        match self.client.add_guild_member_role(guild_id, user_id, role_id).await {
            Ok(_) => Ok(RestOutcome::ok()),
            Err(e) => Ok(RestOutcome::failed(e.to_string())),
        }
    }

    async fn remove_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> anyhow::Result<RestOutcome> {
        let guild_id: Id<GuildMarker> = Id::new(guild_id.parse()?);
        let user_id: Id<UserMarker> = Id::new(user_id.parse()?);
        let role_id: Id<RoleMarker> = Id::new(role_id.parse()?);
        match self.client.remove_guild_member_role(guild_id, user_id, role_id).await {
            Ok(_) => Ok(RestOutcome::ok()),
            Err(e) => Ok(RestOutcome::failed(e.to_string())),
        }
    }
}

/// Recording fake for Dispatcher/handler unit tests (SPEC_FULL §4.8).
pub struct FakeRestReplier {
    pub calls: Mutex<Vec<String>>,
}

impl FakeRestReplier {
    pub fn new() -> Self {
        Self { calls: Mutex::new(Vec::new()) }
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

impl Default for FakeRestReplier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RestReplier for FakeRestReplier {
    async fn defer_reply(&self, interaction_id: &str, _interaction_token: &str) -> anyhow::Result<RestOutcome> {
        self.calls.lock().await.push(format!("defer_reply:{interaction_id}"));
        Ok(RestOutcome::ok())
    }

    async fn defer_update(&self, interaction_id: &str, _interaction_token: &str) -> anyhow::Result<RestOutcome> {
        self.calls.lock().await.push(format!("defer_update:{interaction_id}"));
        Ok(RestOutcome::ok())
    }

    async fn send_followup(&self, interaction_token: &str, content: &str) -> anyhow::Result<RestOutcome> {
        self.calls.lock().await.push(format!("send_followup:{interaction_token}:{content}"));
        Ok(RestOutcome::ok())
    }

    async fn edit_original(&self, interaction_token: &str, content: &str) -> anyhow::Result<RestOutcome> {
        self.calls.lock().await.push(format!("edit_original:{interaction_token}:{content}"));
        Ok(RestOutcome::ok())
    }

    async fn respond_autocomplete(
        &self,
        interaction_id: &str,
        _interaction_token: &str,
        choices: Vec<(String, String)>,
    ) -> anyhow::Result<RestOutcome> {
        self.calls.lock().await.push(format!("respond_autocomplete:{interaction_id}:{}", choices.len()));
        Ok(RestOutcome::ok())
    }

    async fn update_message(&self, interaction_id: &str, _interaction_token: &str, content: &str) -> anyhow::Result<RestOutcome> {
        self.calls.lock().await.push(format!("update_message:{interaction_id}:{content}"));
        Ok(RestOutcome::ok())
    }

    async fn send_dm(&self, user_id: &str, content: &str) -> anyhow::Result<RestOutcome> {
        self.calls.lock().await.push(format!("send_dm:{user_id}:{content}"));
        Ok(RestOutcome::ok())
    }

    async fn assign_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> anyhow::Result<RestOutcome> {
        self.calls.lock().await.push(format!("assign_role:{guild_id}:{user_id}:{role_id}"));
        Ok(RestOutcome::ok())
    }

    async fn remove_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> anyhow::Result<RestOutcome> {
        self.calls.lock().await.push(format!("remove_role:{guild_id}:{user_id}:{role_id}"));
        Ok(RestOutcome::ok())
    }
}

/// Helper so production code can share the trait-object pattern without
/// every call site writing `Arc<dyn RestReplier>` boilerplate.
pub fn shared(replier: impl RestReplier + 'static) -> Arc<dyn RestReplier> {
    Arc::new(replier)
}
