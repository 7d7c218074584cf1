use async_trait::async_trait;
use thiserror::Error;

use super::models::{AlertMessage, ChannelConfig};

pub mod email;
pub mod slack;
pub mod sms;
pub mod webhook;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Templating error: {0}")]
    TemplatingError(String),
}

/// Delivers an alert to one channel type.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Sends `message` using the decrypted `config` of the target channel.
    async fn send(&self, config: &ChannelConfig, message: &AlertMessage) -> Result<(), SenderError>;
}

/// Connection settings for an HTTP relay (email or SMS provider).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub from: String,
}

/// Turns a non-success relay response into a `SendFailed` error.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    provider: &str,
) -> Result<(), SenderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let error_body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error body".to_string());
    Err(SenderError::SendFailed(format!(
        "{provider} returned non-success status: {status}. Body: {error_body}"
    )))
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Records every message; fails the first `failures` attempts.
    #[derive(Default)]
    pub struct RecordingSender {
        pub sent: Mutex<Vec<(ChannelConfig, AlertMessage)>>,
        pub attempts: AtomicU32,
        pub failures: AtomicU32,
    }

    impl RecordingSender {
        pub fn failing_first(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<(ChannelConfig, AlertMessage)> {
            self.sent.lock().unwrap().clone()
        }

        pub fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        async fn send(&self, config: &ChannelConfig, message: &AlertMessage) -> Result<(), SenderError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(SenderError::SendFailed("provider unavailable".to_string()));
            }
            self.sent.lock().unwrap().push((config.clone(), message.clone()));
            Ok(())
        }
    }

    /// Always fails, like a provider that is down.
    #[derive(Default)]
    pub struct FailingSender {
        pub attempts: AtomicU32,
    }

    #[async_trait]
    impl NotificationSender for FailingSender {
        async fn send(&self, _config: &ChannelConfig, _message: &AlertMessage) -> Result<(), SenderError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SenderError::SendFailed("SMS provider error".to_string()))
        }
    }
}
