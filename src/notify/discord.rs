//! Discord notifier: talks to the REST API directly with a bot token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::notify::{Embed, Notification, Notifier};
use crate::tracker::model::{ChannelId, NotificationId};

const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

pub struct DiscordNotifier {
    token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
}

impl DiscordNotifier {
    pub fn new(token: SecretString) -> Self {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    pub fn with_api_base(token: SecretString, api_base: impl Into<String>) -> Self {
        Self {
            token,
            api_base: api_base.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ChannelError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| ChannelError::Http(format!("api base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ChannelError::Http("api base cannot be a base url".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        channel: ChannelId,
        notification: Option<NotificationId>,
        body: Option<Value>,
    ) -> Result<reqwest::Response, ChannelError> {
        let mut req = self
            .client
            .request(method, url)
            .header(
                "Authorization",
                format!("Bot {}", self.token.expose_secret()),
            );
        req = match body {
            Some(body) => req.json(&body),
            None => req.header("Content-Length", "0"),
        };

        let resp = req.send().await.map_err(|e| ChannelError::SendFailed {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let header_secs = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<f64>().ok());
                let body_secs = resp
                    .json::<RateLimitBody>()
                    .await
                    .ok()
                    .and_then(|b| b.retry_after);
                let retry_after = body_secs
                    .or(header_secs)
                    .filter(|s| s.is_finite() && *s >= 0.0)
                    .map(Duration::from_secs_f64);
                warn!(%channel, ?retry_after, "Discord rate limited");
                Err(ChannelError::RateLimited {
                    channel: channel.to_string(),
                    retry_after,
                })
            }
            StatusCode::NOT_FOUND => Err(ChannelError::NotFound {
                channel: channel.to_string(),
                notification: notification
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".into()),
            }),
            _ => {
                let text = resp.text().await.unwrap_or_default();
                Err(ChannelError::SendFailed {
                    channel: channel.to_string(),
                    reason: format!("HTTP {status}: {text}"),
                })
            }
        }
    }
}

/// Discord message payload for a notification.
pub fn message_payload(notification: &Notification) -> Value {
    let mut payload = serde_json::Map::new();
    payload.insert(
        "content".into(),
        notification
            .content
            .as_ref()
            .map(|c| Value::String(c.clone()))
            .unwrap_or(Value::Null),
    );
    payload.insert(
        "embeds".into(),
        Value::Array(notification.embed.iter().map(embed_json).collect()),
    );
    Value::Object(payload)
}

fn embed_json(embed: &Embed) -> Value {
    let mut value = json!({
        "title": embed.title,
        "description": embed.description,
        "color": embed.colour,
        "fields": embed.fields.iter().map(|f| json!({
            "name": f.name,
            "value": f.value,
            "inline": f.inline,
        })).collect::<Vec<_>>(),
    });
    if let Some(url) = &embed.url {
        value["url"] = json!(url);
    }
    if let Some(footer) = &embed.footer {
        value["footer"] = json!({ "text": footer });
    }
    if let Some(ts) = &embed.timestamp {
        value["timestamp"] = json!(ts.to_rfc3339());
    }
    value
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn post(
        &self,
        channel: ChannelId,
        notification: &Notification,
    ) -> Result<NotificationId, ChannelError> {
        let url = self.endpoint(&["channels", &channel.to_string(), "messages"])?;
        let resp = self
            .send(Method::POST, url, channel, None, Some(message_payload(notification)))
            .await?;

        let msg: MessageResponse = resp
            .json()
            .await
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;
        let id = msg
            .id
            .parse::<NotificationId>()
            .map_err(|e| ChannelError::InvalidResponse(format!("message id '{}': {e}", msg.id)))?;

        debug!(%channel, notification = %id, "Posted notification");
        Ok(id)
    }

    async fn edit(
        &self,
        channel: ChannelId,
        notification_id: NotificationId,
        notification: &Notification,
    ) -> Result<(), ChannelError> {
        let url = self.endpoint(&[
            "channels",
            &channel.to_string(),
            "messages",
            &notification_id.to_string(),
        ])?;
        self.send(
            Method::PATCH,
            url,
            channel,
            Some(notification_id),
            Some(message_payload(notification)),
        )
        .await?;
        debug!(%channel, notification = %notification_id, "Edited notification");
        Ok(())
    }

    async fn react(
        &self,
        channel: ChannelId,
        notification_id: NotificationId,
        emoji: &str,
    ) -> Result<(), ChannelError> {
        let url = self.endpoint(&[
            "channels",
            &channel.to_string(),
            "messages",
            &notification_id.to_string(),
            "reactions",
            emoji,
            "@me",
        ])?;
        self.send(Method::PUT, url, channel, Some(notification_id), None)
            .await?;
        Ok(())
    }
}
