//! Notification delivery channels
//!
//! Thin wrappers over outsourced delivery gateways. Each channel posts the
//! intent to its gateway and reports success or failure; an unconfigured
//! gateway URL disables the channel.

use serde_json::json;
use uuid::Uuid;

/// Channel bit flags in `notification_preferences.channel_mask`
pub const CHANNEL_PUSH: i32 = 1;
pub const CHANNEL_MESSENGER: i32 = 2;
pub const CHANNEL_SMS: i32 = 4;
pub const CHANNEL_EMAIL: i32 = 8;

/// One deliverable message for a single recipient
#[derive(Debug, Clone)]
pub struct ChannelMessage<'a> {
    pub user_id: Uuid,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub title: &'a str,
    pub body: &'a str,
    pub target_url: Option<&'a str>,
}

/// The configured channel set
#[derive(Clone)]
pub struct Channels {
    http: reqwest::Client,
    push_url: Option<String>,
    messenger_url: Option<String>,
    sms_url: Option<String>,
    email_url: Option<String>,
    api_key: String,
    email_from: String,
}

impl Channels {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: reqwest::Client,
        push_url: Option<String>,
        messenger_url: Option<String>,
        sms_url: Option<String>,
        email_url: Option<String>,
        api_key: String,
        email_from: String,
    ) -> Self {
        Self {
            http,
            push_url,
            messenger_url,
            sms_url,
            email_url,
            api_key,
            email_from,
        }
    }

    /// Attempt delivery over every channel enabled in `mask`; returns true if
    /// at least one channel accepted the message.
    pub async fn deliver(&self, mask: i32, message: &ChannelMessage<'_>) -> bool {
        let mut delivered = false;

        if mask & CHANNEL_PUSH != 0 {
            delivered |= self.send_push(message).await;
        }
        if mask & CHANNEL_MESSENGER != 0 {
            delivered |= self.send_messenger(message).await;
        }
        if mask & CHANNEL_SMS != 0 {
            delivered |= self.send_sms(message).await;
        }
        if mask & CHANNEL_EMAIL != 0 {
            delivered |= self.send_email(message).await;
        }

        delivered
    }

    async fn send_push(&self, message: &ChannelMessage<'_>) -> bool {
        let Some(url) = &self.push_url else {
            return false;
        };
        let body = json!({
            "user_id": message.user_id,
            "title": message.title,
            "body": message.body,
            "url": message.target_url,
        });
        self.post(url, body, "push").await
    }

    async fn send_messenger(&self, message: &ChannelMessage<'_>) -> bool {
        let Some(url) = &self.messenger_url else {
            return false;
        };
        let body = json!({
            "user_id": message.user_id,
            "text": format!("{}\n{}", message.title, message.body),
        });
        self.post(url, body, "messenger").await
    }

    async fn send_sms(&self, message: &ChannelMessage<'_>) -> bool {
        let Some(url) = &self.sms_url else {
            return false;
        };
        let Some(phone) = message.phone else {
            return false;
        };
        let body = json!({
            "to": phone,
            "text": format!("{}: {}", message.title, message.body),
        });
        self.post(url, body, "sms").await
    }

    async fn send_email(&self, message: &ChannelMessage<'_>) -> bool {
        let Some(url) = &self.email_url else {
            return false;
        };
        let Some(email) = message.email else {
            return false;
        };
        let body = json!({
            "from": self.email_from,
            "to": email,
            "subject": message.title,
            "text": message.body,
        });
        self.post(url, body, "email").await
    }

    async fn post(&self, url: &str, body: serde_json::Value, channel: &str) -> bool {
        let result = self
            .http
            .post(url)
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(
                    channel = channel,
                    status = %response.status(),
                    "Notification channel rejected delivery"
                );
                false
            }
            Err(e) => {
                tracing::warn!(channel = channel, error = %e, "Notification channel failed");
                false
            }
        }
    }
}
