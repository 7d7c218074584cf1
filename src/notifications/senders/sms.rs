use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{NotificationSender, RelaySettings, SenderError, ensure_success};
use crate::notifications::models::{AlertMessage, ChannelConfig};

const MAX_SMS_CHARS: usize = 480;

/// Sends alerts through an HTTP SMS provider.
pub struct SmsSender {
    client: Client,
    relay: Option<RelaySettings>,
}

impl SmsSender {
    pub fn new(relay: Option<RelaySettings>) -> Self {
        Self {
            client: Client::new(),
            relay,
        }
    }

    fn compose(message: &AlertMessage) -> String {
        let text = format!("{}: {}", message.subject, message.body);
        text.chars().take(MAX_SMS_CHARS).collect()
    }
}

#[derive(Serialize)]
struct SmsPayload<'a> {
    from: &'a str,
    to: &'a [String],
    body: &'a str,
}

#[async_trait]
impl NotificationSender for SmsSender {
    async fn send(&self, config: &ChannelConfig, message: &AlertMessage) -> Result<(), SenderError> {
        let ChannelConfig::Sms { recipients } = config else {
            return Err(SenderError::InvalidConfiguration(
                "Expected SMS config, but found a different type.".to_string(),
            ));
        };
        let relay = self.relay.as_ref().ok_or_else(|| {
            SenderError::InvalidConfiguration("SMS provider is not configured.".to_string())
        })?;

        let body = Self::compose(message);
        let payload = SmsPayload {
            from: &relay.from,
            to: recipients,
            body: &body,
        };

        let mut request = self.client.post(&relay.api_url).json(&payload);
        if let Some(key) = &relay.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        ensure_success(response, "SMS provider").await
    }
}
