//! Persistence seam for the monitoring pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use thiserror::Error;

use super::models::{CheckResult, Incident, Monitor, MonitorStatus};
use crate::notifications::encryption::EncryptionError;
use crate::notifications::models::{AlertEvent, NotificationChannel};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn active_monitors(&self) -> Result<Vec<Monitor>, StoreError>;

    async fn monitor(&self, id: i32) -> Result<Option<Monitor>, StoreError>;

    /// Writes the monitor's current status and the time of its latest check.
    async fn update_monitor_status(
        &self,
        monitor_id: i32,
        status: MonitorStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn record_check(&self, result: &CheckResult) -> Result<(), StoreError>;

    /// Inserts the incident or overwrites the stored copy with the same id.
    async fn save_incident(&self, incident: &Incident) -> Result<(), StoreError>;

    async fn incident(&self, id: uuid::Uuid) -> Result<Option<Incident>, StoreError>;

    async fn open_incidents(&self) -> Result<Vec<Incident>, StoreError>;

    /// Channels a monitor is subscribed to, decrypted. Unknown ids are skipped.
    async fn channels_for_monitor(
        &self,
        monitor: &Monitor,
    ) -> Result<Vec<NotificationChannel>, StoreError>;

    async fn record_alert_event(&self, event: &AlertEvent) -> Result<(), StoreError>;

    /// Alert events already written for incidents that are still open.
    async fn alert_events_for_open_incidents(&self) -> Result<Vec<AlertEvent>, StoreError>;
}
