//! Incident tracking.
//!
//! The debounce logic lives in [`evaluate`], a pure function over
//! `(state, check result)`. [`IncidentTracker`] owns one state per monitor
//! behind its own lock, so results for one monitor are applied one at a time
//! while different monitors never contend.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{CheckResult, CheckStatus, Incident, IncidentStatus, MonitorStatus, ProbeCause};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "incident", rename_all = "lowercase")]
pub enum IncidentTransition {
    Opened(Incident),
    /// Another failing check was observed while the incident was open.
    Updated(Incident),
    Resolved(Incident),
}

impl IncidentTransition {
    pub fn incident(&self) -> &Incident {
        match self {
            IncidentTransition::Opened(i)
            | IncidentTransition::Updated(i)
            | IncidentTransition::Resolved(i) => i,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorState {
    pub status: MonitorStatus,
    pub down_streak: u32,
    pub streak_started_at: Option<DateTime<Utc>>,
    pub streak_cause: Option<ProbeCause>,
    pub open_incident: Option<Incident>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl MonitorState {
    /// State for a monitor that already has an open incident in storage.
    pub fn with_open_incident(incident: Incident) -> Self {
        Self {
            status: MonitorStatus::Down,
            down_streak: incident.failed_checks,
            streak_started_at: Some(incident.start_time),
            streak_cause: Some(incident.cause),
            last_timestamp: Some(incident.last_failure_at),
            open_incident: Some(incident),
        }
    }
}

/// Applies one check result to a monitor's state.
///
/// `up → down` needs `threshold` consecutive failures and the incident starts at
/// the first failure of the streak. `down → up` happens on the first success.
pub fn evaluate(
    state: &MonitorState,
    result: &CheckResult,
    threshold: u32,
) -> (MonitorState, Option<IncidentTransition>) {
    if state.last_timestamp.is_some_and(|last| result.timestamp < last) {
        return (state.clone(), None);
    }

    let threshold = threshold.max(1);
    let mut next = state.clone();
    next.last_timestamp = Some(result.timestamp);

    match result.status {
        CheckStatus::Up => {
            next.status = MonitorStatus::Up;
            next.down_streak = 0;
            next.streak_started_at = None;
            next.streak_cause = None;

            let transition = next.open_incident.take().map(|mut incident| {
                let end = result.timestamp.max(incident.start_time);
                incident.end_time = Some(end);
                incident.duration_seconds = Some((end - incident.start_time).num_seconds());
                incident.status = IncidentStatus::Resolved;
                IncidentTransition::Resolved(incident)
            });
            (next, transition)
        }
        CheckStatus::Down => {
            let cause = result.cause.unwrap_or(ProbeCause::ProbeError);
            next.down_streak = next.down_streak.saturating_add(1);
            if next.streak_started_at.is_none() {
                next.streak_started_at = Some(result.timestamp);
                next.streak_cause = Some(cause);
            }

            if let Some(incident) = next.open_incident.as_mut() {
                incident.failed_checks = incident.failed_checks.saturating_add(1);
                incident.last_failure_at = result.timestamp;
                incident.last_response_time_ms = result.response_time_ms;
                let updated = incident.clone();
                return (next, Some(IncidentTransition::Updated(updated)));
            }

            if next.down_streak < threshold {
                return (next, None);
            }

            let incident = Incident {
                id: Uuid::new_v4(),
                monitor_id: result.monitor_id,
                start_time: next.streak_started_at.unwrap_or(result.timestamp),
                end_time: None,
                status: IncidentStatus::Open,
                cause: next.streak_cause.unwrap_or(cause),
                duration_seconds: None,
                failed_checks: next.down_streak,
                last_failure_at: result.timestamp,
                last_response_time_ms: result.response_time_ms,
            };
            next.status = MonitorStatus::Down;
            next.open_incident = Some(incident.clone());
            (next, Some(IncidentTransition::Opened(incident)))
        }
    }
}

pub struct IncidentTracker {
    states: DashMap<i32, Arc<Mutex<MonitorState>>>,
    default_threshold: u32,
}

impl Default for IncidentTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl IncidentTracker {
    pub fn new(default_threshold: u32) -> Self {
        Self {
            states: DashMap::new(),
            default_threshold: default_threshold.max(1),
        }
    }

    fn state_for(&self, monitor_id: i32) -> Arc<Mutex<MonitorState>> {
        self.states
            .entry(monitor_id)
            .or_insert_with(|| Arc::new(Mutex::new(MonitorState::default())))
            .clone()
    }

    pub async fn record_check(
        &self,
        monitor_id: i32,
        result: &CheckResult,
    ) -> Option<IncidentTransition> {
        self.record_check_with_threshold(monitor_id, result, None)
            .await
            .1
    }

    /// Applies `result` under the monitor's lock and returns the resulting
    /// monitor status alongside any transition.
    pub async fn record_check_with_threshold(
        &self,
        monitor_id: i32,
        result: &CheckResult,
        threshold: Option<u32>,
    ) -> (MonitorStatus, Option<IncidentTransition>) {
        let threshold = threshold.unwrap_or(self.default_threshold);
        let state = self.state_for(monitor_id);
        let mut guard = state.lock().await;

        if guard.last_timestamp.is_some_and(|last| result.timestamp < last) {
            debug!(monitor_id, timestamp = %result.timestamp, "Ignoring out-of-order check result.");
            return (guard.status, None);
        }

        let (next, transition) = evaluate(&guard, result, threshold);
        *guard = next;

        match &transition {
            Some(IncidentTransition::Opened(incident)) => {
                info!(monitor_id, incident_id = %incident.id, cause = %incident.cause, "Incident opened.");
            }
            Some(IncidentTransition::Resolved(incident)) => {
                info!(
                    monitor_id,
                    incident_id = %incident.id,
                    duration_seconds = incident.duration_seconds,
                    "Incident resolved."
                );
            }
            _ => {}
        }
        (guard.status, transition)
    }

    /// Seeds the tracker with an incident that is still open in storage.
    pub async fn restore(&self, incident: Incident) {
        if !incident.is_open() {
            return;
        }
        let state = self.state_for(incident.monitor_id);
        let mut guard = state.lock().await;
        if guard.open_incident.is_none() {
            *guard = MonitorState::with_open_incident(incident);
        }
    }

    pub fn forget(&self, monitor_id: i32) {
        self.states.remove(&monitor_id);
    }

    pub async fn open_incident(&self, monitor_id: i32) -> Option<Incident> {
        let state = self.states.get(&monitor_id).map(|s| s.value().clone())?;
        let guard = state.lock().await;
        guard.open_incident.clone()
    }

    pub async fn status(&self, monitor_id: i32) -> MonitorStatus {
        match self.states.get(&monitor_id).map(|s| s.value().clone()) {
            Some(state) => state.lock().await.status,
            None => MonitorStatus::Unknown,
        }
    }
}
