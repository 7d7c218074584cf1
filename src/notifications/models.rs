use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::monitoring::error::ConfigValidationError;

/// Type-specific channel settings. Serialized to JSON and encrypted before
/// being stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ChannelConfig {
    Email {
        recipients: Vec<String>,
    },
    Sms {
        recipients: Vec<String>,
    },
    Webhook {
        url: String,
        method: String, // "GET" or "POST"
        headers: Option<HashMap<String, String>>,
        body_template: Option<String>, // Tera template for POST bodies
    },
    Slack {
        webhook_url: String,
        channel: Option<String>,
        username: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Sms,
    Webhook,
    Slack,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "email",
            ChannelType::Sms => "sms",
            ChannelType::Webhook => "webhook",
            ChannelType::Slack => "slack",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(ChannelType::Email),
            "sms" => Ok(ChannelType::Sms),
            "webhook" => Ok(ChannelType::Webhook),
            "slack" => Ok(ChannelType::Slack),
            other => Err(format!("unsupported channel type '{other}'")),
        }
    }
}

fn validate_http_url(field: &str, raw: &str) -> Result<(), ConfigValidationError> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| ConfigValidationError::new(field, format!("'{raw}' is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigValidationError::new(
            field,
            format!("unsupported scheme '{scheme}'"),
        )),
    }
}

impl ChannelConfig {
    pub fn channel_type(&self) -> ChannelType {
        match self {
            ChannelConfig::Email { .. } => ChannelType::Email,
            ChannelConfig::Sms { .. } => ChannelType::Sms,
            ChannelConfig::Webhook { .. } => ChannelType::Webhook,
            ChannelConfig::Slack { .. } => ChannelType::Slack,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        match self {
            ChannelConfig::Email { recipients } => {
                if recipients.is_empty() {
                    return Err(ConfigValidationError::new("recipients", "at least one recipient is required"));
                }
                for r in recipients {
                    let valid = r
                        .split_once('@')
                        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
                    if !valid {
                        return Err(ConfigValidationError::new(
                            "recipients",
                            format!("'{r}' is not an email address"),
                        ));
                    }
                }
                Ok(())
            }
            ChannelConfig::Sms { recipients } => {
                if recipients.is_empty() {
                    return Err(ConfigValidationError::new("recipients", "at least one recipient is required"));
                }
                for r in recipients {
                    let digits = r.strip_prefix('+').unwrap_or(r);
                    if digits.len() < 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
                        return Err(ConfigValidationError::new(
                            "recipients",
                            format!("'{r}' is not a phone number"),
                        ));
                    }
                }
                Ok(())
            }
            ChannelConfig::Webhook { url, method, .. } => {
                validate_http_url("url", url)?;
                match method.to_uppercase().as_str() {
                    "GET" | "POST" => Ok(()),
                    other => Err(ConfigValidationError::new(
                        "method",
                        format!("unsupported HTTP method '{other}'"),
                    )),
                }
            }
            ChannelConfig::Slack { webhook_url, .. } => validate_http_url("webhookUrl", webhook_url),
        }
    }
}

/// A configured alert destination, with its config already decrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationChannel {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub enabled: bool,
    pub config: ChannelConfig,
}

impl NotificationChannel {
    pub fn channel_type(&self) -> ChannelType {
        self.config.channel_type()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Opened,
    Resolved,
    Escalated,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Opened => "opened",
            AlertKind::Resolved => "resolved",
            AlertKind::Escalated => "escalated",
        }
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opened" => Ok(AlertKind::Opened),
            "resolved" => Ok(AlertKind::Resolved),
            "escalated" => Ok(AlertKind::Escalated),
            other => Err(format!("unknown alert kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status '{other}'")),
        }
    }
}

/// Audit record of one delivery (after retries) to one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub channel_id: i32,
    pub kind: AlertKind,
    pub sent_at: DateTime<Utc>,
    pub delivery_status: DeliveryStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

/// A rendered alert handed to a sender.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
    /// Values available to templated channels (e.g. `monitor_name`).
    pub context: HashMap<String, String>,
}

impl AlertMessage {
    pub fn plain(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            context: HashMap::new(),
        }
    }
}

/// Defines the structure for a field in a channel template for the frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelTemplateField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String, // e.g., "text", "textarea", "password"
    pub required: bool,
    pub label: String,
    pub help_text: Option<String>,
}

/// Defines the template for a channel type, used to dynamically generate UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelTemplate {
    pub channel_type: ChannelType,
    pub name: String,
    pub fields: Vec<ChannelTemplateField>,
}

/// API request body for creating a new notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    pub name: String,
    pub config: ChannelConfig,
    pub enabled: Option<bool>,
}

/// API request body for updating an existing notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateChannelRequest {
    pub name: Option<String>,
    pub config: Option<ChannelConfig>,
    pub enabled: Option<bool>,
}

/// API response for a single notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResponse {
    pub id: i32,
    pub name: String,
    pub channel_type: ChannelType,
    pub enabled: bool,
    pub config: ChannelConfig,
}

impl From<NotificationChannel> for ChannelResponse {
    fn from(channel: NotificationChannel) -> Self {
        Self {
            id: channel.id,
            name: channel.name,
            channel_type: channel.config.channel_type(),
            enabled: channel.enabled,
            config: channel.config,
        }
    }
}

/// API request for sending a test notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestChannelRequest {
    pub message: Option<String>,
}
