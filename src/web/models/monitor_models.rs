use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitoring::models::{MonitorStatus, NotificationConfig};

// Model for creating a new monitor
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateMonitorRequest {
    pub name: String,
    pub url: String,
    pub interval_seconds: u32,
    pub timeout_ms: Option<u64>,
    pub locations: Option<Vec<String>>,
    pub notification_config: Option<NotificationConfig>,
    pub is_active: Option<bool>,
}

// Model for updating an existing monitor
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMonitorRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub interval_seconds: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub locations: Option<Vec<String>>,
    pub notification_config: Option<NotificationConfig>,
    pub is_active: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MonitorResponse {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub url: String,
    pub interval_seconds: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub locations: Vec<String>,
    pub notification_config: NotificationConfig,
    pub status: MonitorStatus,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ResultsQuery {
    pub limit: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct TimelineQuery {
    pub days: Option<u32>,
}
