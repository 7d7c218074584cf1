use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{NotificationSender, RelaySettings, SenderError, ensure_success};
use crate::notifications::models::{AlertMessage, ChannelConfig};

/// Sends alerts through an HTTP email relay (`POST {api_url}` with a JSON body).
pub struct EmailSender {
    client: Client,
    relay: Option<RelaySettings>,
}

impl EmailSender {
    pub fn new(relay: Option<RelaySettings>) -> Self {
        Self {
            client: Client::new(),
            relay,
        }
    }
}

#[derive(Serialize)]
struct EmailPayload<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    text: &'a str,
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(&self, config: &ChannelConfig, message: &AlertMessage) -> Result<(), SenderError> {
        let ChannelConfig::Email { recipients } = config else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Email config, but found a different type.".to_string(),
            ));
        };
        let relay = self.relay.as_ref().ok_or_else(|| {
            SenderError::InvalidConfiguration("Email relay is not configured.".to_string())
        })?;

        let payload = EmailPayload {
            from: &relay.from,
            to: recipients,
            subject: &message.subject,
            text: &message.body,
        };

        let mut request = self.client.post(&relay.api_url).json(&payload);
        if let Some(key) = &relay.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        ensure_success(response, "Email relay").await
    }
}
