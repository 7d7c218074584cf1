//! Routes every check result through persistence, incident tracking and
//! alert dispatch.

use std::sync::Arc;
use tracing::{debug, error, warn};

use super::incident::{IncidentTracker, IncidentTransition};
use super::models::{CheckResult, Monitor};
use super::store::{MonitorStore, StoreError};
use crate::notifications::service::Notifier;

pub struct CheckPipeline {
    store: Arc<dyn MonitorStore>,
    tracker: Arc<IncidentTracker>,
    notifier: Arc<Notifier>,
}

impl CheckPipeline {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        tracker: Arc<IncidentTracker>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            store,
            tracker,
            notifier,
        }
    }

    pub fn tracker(&self) -> &Arc<IncidentTracker> {
        &self.tracker
    }

    /// Loads incidents left open by a previous run into the tracker, and the
    /// alerts already sent for them into the notifier.
    pub async fn restore_open_incidents(&self) -> Result<usize, StoreError> {
        let open = self.store.open_incidents().await?;
        let count = open.len();
        for incident in open {
            self.tracker.restore(incident).await;
        }
        let events = self.store.alert_events_for_open_incidents().await?;
        let alerts = self.notifier.restore(&events);
        debug!(incidents = count, alerts, "Restored incident state.");
        Ok(count)
    }

    /// Storage failures are logged and do not stop the result from reaching
    /// the tracker. Notification happens in the background.
    pub async fn handle_result(
        &self,
        monitor: &Monitor,
        result: CheckResult,
    ) -> Option<IncidentTransition> {
        if let Err(e) = self.store.record_check(&result).await {
            error!(monitor_id = monitor.id, error = %e, "Failed to persist check result.");
        }

        let (status, transition) = self
            .tracker
            .record_check_with_threshold(
                monitor.id,
                &result,
                monitor.notification_config.failure_threshold,
            )
            .await;

        if let Some(transition) = &transition {
            if let Err(e) = self.store.save_incident(transition.incident()).await {
                error!(
                    monitor_id = monitor.id,
                    incident_id = %transition.incident().id,
                    error = %e,
                    "Failed to persist incident."
                );
            }
        }

        if let Err(e) = self
            .store
            .update_monitor_status(monitor.id, status, result.timestamp)
            .await
        {
            warn!(monitor_id = monitor.id, error = %e, "Failed to update monitor status.");
        }

        if let Some(transition) = &transition {
            self.notifier.spawn_dispatch(monitor.clone(), transition.clone());
        }
        transition
    }
}
