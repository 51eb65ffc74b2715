//! Posting collaborator: post, edit, and react on chat notifications.

pub mod discord;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ChannelError;
use crate::tracker::model::{ChannelId, NotificationId};

pub use discord::DiscordNotifier;

/// A named value inside an embed.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Rich card content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    pub colour: u32,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Embed {
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// What gets posted: plain text, an embed, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notification {
    pub content: Option<String>,
    pub embed: Option<Embed>,
}

impl Notification {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embed: None,
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            content: None,
            embed: Some(embed),
        }
    }
}

/// Chat surface used for lifecycle notifications. Failures are per channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post(
        &self,
        channel: ChannelId,
        notification: &Notification,
    ) -> Result<NotificationId, ChannelError>;

    async fn edit(
        &self,
        channel: ChannelId,
        notification_id: NotificationId,
        notification: &Notification,
    ) -> Result<(), ChannelError>;

    async fn react(
        &self,
        channel: ChannelId,
        notification_id: NotificationId,
        emoji: &str,
    ) -> Result<(), ChannelError>;
}
