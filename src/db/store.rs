//! [`MonitorStore`] backed by the relational database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::services::{
    alert_event_service, channel_service, check_result_service, incident_service, monitor_service,
};
use crate::monitoring::models::{CheckResult, Incident, Monitor, MonitorStatus};
use crate::monitoring::store::{MonitorStore, StoreError};
use crate::notifications::encryption::EncryptionService;
use crate::notifications::models::{AlertEvent, NotificationChannel};

#[derive(Clone)]
pub struct DbStore {
    db: DatabaseConnection,
    encryption: Arc<EncryptionService>,
}

impl DbStore {
    pub fn new(db: DatabaseConnection, encryption: Arc<EncryptionService>) -> Self {
        Self { db, encryption }
    }
}

#[async_trait]
impl MonitorStore for DbStore {
    async fn active_monitors(&self) -> Result<Vec<Monitor>, StoreError> {
        let models = monitor_service::get_active_monitors(&self.db).await?;
        let mut monitors = Vec::with_capacity(models.len());
        for model in models {
            let id = model.id;
            match monitor_service::to_domain(model) {
                Ok(monitor) => monitors.push(monitor),
                Err(e) => warn!(monitor_id = id, error = %e, "Skipping unreadable monitor."),
            }
        }
        Ok(monitors)
    }

    async fn monitor(&self, id: i32) -> Result<Option<Monitor>, StoreError> {
        monitor_service::get_monitor(&self.db, id)
            .await?
            .map(monitor_service::to_domain)
            .transpose()
    }

    async fn update_monitor_status(
        &self,
        monitor_id: i32,
        status: MonitorStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        monitor_service::update_monitor_status(&self.db, monitor_id, status, checked_at).await?;
        Ok(())
    }

    async fn record_check(&self, result: &CheckResult) -> Result<(), StoreError> {
        check_result_service::record_check_result(&self.db, result).await?;
        Ok(())
    }

    async fn save_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        incident_service::save_incident(&self.db, incident).await
    }

    async fn incident(&self, id: Uuid) -> Result<Option<Incident>, StoreError> {
        incident_service::get_incident(&self.db, id).await
    }

    async fn open_incidents(&self) -> Result<Vec<Incident>, StoreError> {
        incident_service::get_open_incidents(&self.db).await
    }

    async fn channels_for_monitor(
        &self,
        monitor: &Monitor,
    ) -> Result<Vec<NotificationChannel>, StoreError> {
        let ids: Vec<i32> = monitor
            .notification_config
            .channels
            .iter()
            .map(|sub| sub.channel_id)
            .collect();
        let models = channel_service::get_channel_models(&self.db, monitor.user_id, &ids).await?;

        let mut channels = Vec::with_capacity(models.len());
        for model in models {
            let channel_id = model.id;
            match channel_service::to_domain(&self.encryption, model) {
                Ok(channel) => channels.push(channel),
                Err(e) => warn!(
                    monitor_id = monitor.id,
                    channel_id,
                    error = %e,
                    "Skipping notification channel that could not be decrypted."
                ),
            }
        }
        Ok(channels)
    }

    async fn record_alert_event(&self, event: &AlertEvent) -> Result<(), StoreError> {
        alert_event_service::record_alert_event(&self.db, event).await
    }

    async fn alert_events_for_open_incidents(&self) -> Result<Vec<AlertEvent>, StoreError> {
        alert_event_service::get_alert_events_for_open_incidents(&self.db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entities::notification_channel;
    use crate::db::testing::memory_db;
    use crate::monitoring::models::{
        ChannelSubscription, IncidentStatus, NotificationConfig, ProbeCause,
    };
    use crate::notifications::models::{ChannelConfig, CreateChannelRequest};
    use crate::web::models::monitor_models::CreateMonitorRequest;
    use sea_orm::{ActiveModelTrait, Set};

    fn encryption() -> Arc<EncryptionService> {
        Arc::new(EncryptionService::new(&[9u8; 32]).unwrap())
    }

    fn webhook(name: &str) -> CreateChannelRequest {
        CreateChannelRequest {
            name: name.to_string(),
            config: ChannelConfig::Webhook {
                url: "https://hooks.example.com/alert".to_string(),
                method: "POST".to_string(),
                headers: None,
                body_template: None,
            },
            enabled: None,
        }
    }

    #[tokio::test]
    async fn test_store_round_trips_pipeline_state() {
        let db = memory_db().await;
        let enc = encryption();
        let store = DbStore::new(db.clone(), enc.clone());

        let channel = channel_service::create_channel(&db, &enc, 1, webhook("hook")).await.unwrap();
        let model = monitor_service::create_monitor(
            &db,
            1,
            CreateMonitorRequest {
                name: "shop".to_string(),
                url: "https://shop.example.com".to_string(),
                interval_seconds: 30,
                timeout_ms: Some(2000),
                locations: None,
                notification_config: Some(NotificationConfig {
                    channels: vec![ChannelSubscription::new(channel.id)],
                    failure_threshold: Some(3),
                }),
                is_active: None,
            },
        )
        .await
        .unwrap();

        let monitors = store.active_monitors().await.unwrap();
        assert_eq!(monitors.len(), 1);
        let monitor = &monitors[0];
        assert_eq!(monitor.notification_config.failure_threshold, Some(3));

        let now = Utc::now();
        store
            .record_check(&CheckResult::down(model.id, now, 2000, ProbeCause::Timeout))
            .await
            .unwrap();
        store
            .update_monitor_status(model.id, MonitorStatus::Down, now)
            .await
            .unwrap();
        assert_eq!(
            store.monitor(model.id).await.unwrap().unwrap().status,
            MonitorStatus::Down
        );

        let incident = Incident {
            id: Uuid::new_v4(),
            monitor_id: model.id,
            start_time: now,
            end_time: None,
            status: IncidentStatus::Open,
            cause: ProbeCause::Timeout,
            duration_seconds: None,
            failed_checks: 3,
            last_failure_at: now,
            last_response_time_ms: 2000,
        };
        store.save_incident(&incident).await.unwrap();
        assert_eq!(store.open_incidents().await.unwrap().len(), 1);
        assert!(store.incident(incident.id).await.unwrap().is_some());

        let channels = store.channels_for_monitor(monitor).await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].id, channel.id);
    }

    #[tokio::test]
    async fn test_undecryptable_channel_is_skipped() {
        let db = memory_db().await;
        let enc = encryption();
        let store = DbStore::new(db.clone(), enc.clone());

        let good = channel_service::create_channel(&db, &enc, 1, webhook("good")).await.unwrap();
        let now = Utc::now();
        let broken = notification_channel::ActiveModel {
            user_id: Set(1),
            name: Set("broken".to_string()),
            channel_type: Set("webhook".to_string()),
            enabled: Set(true),
            config: Set(vec![0u8; 40]),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&db)
        .await
        .unwrap();

        let monitor = Monitor {
            id: 1,
            user_id: 1,
            name: "m".to_string(),
            url: "https://example.com".to_string(),
            interval_seconds: 60,
            timeout_ms: None,
            locations: Vec::new(),
            notification_config: NotificationConfig {
                channels: vec![
                    ChannelSubscription::new(good.id),
                    ChannelSubscription::new(broken.id),
                    ChannelSubscription::new(404),
                ],
                failure_threshold: None,
            },
            status: MonitorStatus::Unknown,
            is_active: true,
            created_at: now,
        };
        let channels = store.channels_for_monitor(&monitor).await.unwrap();
        let ids: Vec<i32> = channels.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![good.id]);
    }
}
