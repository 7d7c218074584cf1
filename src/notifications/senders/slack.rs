use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{NotificationSender, SenderError, ensure_success};
use crate::notifications::models::{AlertMessage, ChannelConfig};

/// Posts alerts to a Slack incoming webhook.
pub struct SlackSender {
    client: Client,
}

impl Default for SlackSender {
    fn default() -> Self {
        Self::new()
    }
}

impl SlackSender {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[derive(Serialize)]
struct SlackMessage<'a> {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

#[async_trait]
impl NotificationSender for SlackSender {
    async fn send(&self, config: &ChannelConfig, message: &AlertMessage) -> Result<(), SenderError> {
        let ChannelConfig::Slack {
            webhook_url,
            channel,
            username,
        } = config
        else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Slack config, but found a different type.".to_string(),
            ));
        };

        let payload = SlackMessage {
            text: format!("*{}*\n{}", message.subject, message.body),
            channel: channel.as_deref(),
            username: username.as_deref(),
        };
        let response = self.client.post(webhook_url).json(&payload).send().await?;
        ensure_success(response, "Slack").await
    }
}
