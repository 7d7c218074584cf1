//! Incident alert dispatch.
//!
//! Every incident transition fans out to the monitor's enabled channels. Each
//! channel is delivered independently with retries, and each (incident,
//! channel, kind) triple is delivered at most once.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::models::{
    AlertEvent, AlertKind, AlertMessage, ChannelType, DeliveryStatus, NotificationChannel,
};
use super::senders::{
    NotificationSender, RelaySettings, SenderError, email::EmailSender, slack::SlackSender,
    sms::SmsSender, webhook::WebhookSender,
};
use crate::monitoring::incident::IncidentTransition;
use crate::monitoring::models::{ChannelSubscription, Incident, Monitor};
use crate::monitoring::store::{MonitorStore, StoreError};

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Sender error: {0}")]
    Sender(#[from] SenderError),
    #[error("No sender registered for channel type {0}")]
    UnsupportedChannel(ChannelType),
    #[error("Channel {0} is disabled")]
    ChannelDisabled(i32),
    #[error("Incident {0} is not open")]
    IncidentNotOpen(Uuid),
}

#[derive(Debug, Clone)]
pub struct NotifierSettings {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on every further retry.
    pub backoff: Duration,
    /// Incidents open longer than this get one "escalated" alert per channel.
    pub escalation_after: Option<Duration>,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
            escalation_after: None,
        }
    }
}

pub struct Notifier {
    store: Arc<dyn MonitorStore>,
    senders: HashMap<ChannelType, Arc<dyn NotificationSender>>,
    settings: NotifierSettings,
    delivered: DashMap<(Uuid, i32), HashSet<AlertKind>>,
    /// Completion signal of the latest queued dispatch per incident.
    dispatch_tails: DashMap<Uuid, oneshot::Receiver<()>>,
}

impl Notifier {
    pub fn new(store: Arc<dyn MonitorStore>, settings: NotifierSettings) -> Self {
        Self {
            store,
            senders: HashMap::new(),
            settings,
            delivered: DashMap::new(),
            dispatch_tails: DashMap::new(),
        }
    }

    pub fn with_sender(mut self, channel_type: ChannelType, sender: Arc<dyn NotificationSender>) -> Self {
        self.senders.insert(channel_type, sender);
        self
    }

    /// Registers the HTTP-backed senders for every channel type.
    pub fn with_default_senders(
        self,
        email_relay: Option<RelaySettings>,
        sms_relay: Option<RelaySettings>,
    ) -> Self {
        self.with_sender(ChannelType::Email, Arc::new(EmailSender::new(email_relay)))
            .with_sender(ChannelType::Sms, Arc::new(SmsSender::new(sms_relay)))
            .with_sender(ChannelType::Webhook, Arc::new(WebhookSender::new()))
            .with_sender(ChannelType::Slack, Arc::new(SlackSender::new()))
    }

    /// Seeds the suppression ledger from alerts already written for open
    /// incidents, so a restart does not repeat them.
    pub fn restore(&self, events: &[AlertEvent]) -> usize {
        let mut restored = 0;
        for event in events {
            if self.claim(event.incident_id, event.channel_id, event.kind) {
                restored += 1;
            }
        }
        restored
    }

    /// Dispatches in the background; the caller never waits on delivery.
    /// Transitions of the same incident are delivered in the order they were
    /// queued.
    pub fn spawn_dispatch(
        self: &Arc<Self>,
        monitor: Monitor,
        transition: IncidentTransition,
    ) -> JoinHandle<Vec<AlertEvent>> {
        let notifier = Arc::clone(self);
        let incident_id = transition.incident().id;
        let (done, tail) = oneshot::channel();
        let previous = self.dispatch_tails.insert(incident_id, tail);

        tokio::spawn(async move {
            if let Some(previous) = previous {
                // An error only means the earlier task is gone.
                let _ = previous.await;
            }
            let events = match notifier.dispatch(&monitor, &transition).await {
                Ok(events) => events,
                Err(e) => {
                    error!(monitor_id = monitor.id, error = %e, "Failed to dispatch incident notifications.");
                    Vec::new()
                }
            };
            if matches!(transition, IncidentTransition::Resolved(_)) {
                notifier.dispatch_tails.remove(&incident_id);
            }
            let _ = done.send(());
            events
        })
    }

    pub async fn dispatch(
        &self,
        monitor: &Monitor,
        transition: &IncidentTransition,
    ) -> Result<Vec<AlertEvent>, NotificationError> {
        let outcome = self.plan_and_deliver(monitor, transition).await;
        if let IncidentTransition::Resolved(incident) = transition {
            self.delivered.retain(|(incident_id, _), _| *incident_id != incident.id);
        }
        outcome
    }

    async fn plan_and_deliver(
        &self,
        monitor: &Monitor,
        transition: &IncidentTransition,
    ) -> Result<Vec<AlertEvent>, NotificationError> {
        let incident = transition.incident();
        let targets = self.subscribed_channels(monitor).await?;

        let mut planned = Vec::new();
        for (subscription, channel) in targets {
            if let Some(kind) = self.select_kind(transition, &subscription, channel.id) {
                planned.push((channel, kind));
            }
        }

        if planned.is_empty() {
            debug!(monitor_id = monitor.id, incident_id = %incident.id, "No notifications due for transition.");
            return Ok(Vec::new());
        }

        Ok(self.deliver_all(monitor, incident, planned).await)
    }

    /// Re-notifies every enabled channel about an open incident, bypassing
    /// suppression once.
    pub async fn escalate(
        &self,
        monitor: &Monitor,
        incident: &Incident,
    ) -> Result<Vec<AlertEvent>, NotificationError> {
        if !incident.is_open() {
            return Err(NotificationError::IncidentNotOpen(incident.id));
        }
        let planned: Vec<_> = self
            .subscribed_channels(monitor)
            .await?
            .into_iter()
            .map(|(_, channel)| {
                self.delivered
                    .entry((incident.id, channel.id))
                    .or_default()
                    .insert(AlertKind::Escalated);
                (channel, AlertKind::Escalated)
            })
            .collect();
        info!(monitor_id = monitor.id, incident_id = %incident.id, channels = planned.len(), "Escalating incident.");
        Ok(self.deliver_all(monitor, incident, planned).await)
    }

    /// Sends a one-off test message to a channel. Not recorded as an alert event.
    pub async fn send_test(
        &self,
        channel: &NotificationChannel,
        message: &str,
    ) -> Result<(), NotificationError> {
        let channel_type = channel.channel_type();
        let sender = self
            .senders
            .get(&channel_type)
            .ok_or(NotificationError::UnsupportedChannel(channel_type))?;
        let message = AlertMessage::plain(format!("Test notification: {}", channel.name), message);
        sender.send(&channel.config, &message).await?;
        Ok(())
    }

    async fn subscribed_channels(
        &self,
        monitor: &Monitor,
    ) -> Result<Vec<(ChannelSubscription, NotificationChannel)>, NotificationError> {
        let mut channels: HashMap<i32, NotificationChannel> = self
            .store
            .channels_for_monitor(monitor)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        Ok(monitor
            .notification_config
            .channels
            .iter()
            .filter_map(|sub| {
                let channel = channels.remove(&sub.channel_id)?;
                channel.enabled.then(|| (sub.clone(), channel))
            })
            .collect())
    }

    fn already_delivered(&self, incident_id: Uuid, channel_id: i32, kind: AlertKind) -> bool {
        self.delivered
            .get(&(incident_id, channel_id))
            .is_some_and(|kinds| kinds.contains(&kind))
    }

    /// Marks the triple as delivered; returns false when it already was.
    fn claim(&self, incident_id: Uuid, channel_id: i32, kind: AlertKind) -> bool {
        self.delivered
            .entry((incident_id, channel_id))
            .or_default()
            .insert(kind)
    }

    fn select_kind(
        &self,
        transition: &IncidentTransition,
        subscription: &ChannelSubscription,
        channel_id: i32,
    ) -> Option<AlertKind> {
        let incident = transition.incident();
        let opened_sent = self.already_delivered(incident.id, channel_id, AlertKind::Opened);

        let kind = match transition {
            IncidentTransition::Opened(_) | IncidentTransition::Updated(_) if !opened_sent => {
                thresholds_met(subscription, incident).then_some(AlertKind::Opened)
            }
            IncidentTransition::Updated(_) => {
                let limit = self.settings.escalation_after?;
                let downtime = (incident.last_failure_at - incident.start_time)
                    .to_std()
                    .unwrap_or_default();
                (downtime >= limit).then_some(AlertKind::Escalated)
            }
            IncidentTransition::Opened(_) => None,
            IncidentTransition::Resolved(_) => {
                (opened_sent && subscription.notify_on_resolve).then_some(AlertKind::Resolved)
            }
        }?;

        if self.claim(incident.id, channel_id, kind) {
            Some(kind)
        } else {
            debug!(incident_id = %incident.id, channel_id, kind = kind.as_str(), "Suppressing repeated alert.");
            None
        }
    }

    async fn deliver_all(
        &self,
        monitor: &Monitor,
        incident: &Incident,
        planned: Vec<(NotificationChannel, AlertKind)>,
    ) -> Vec<AlertEvent> {
        let deliveries = planned.into_iter().map(|(channel, kind)| async move {
            let message = render_alert(monitor, incident, kind);
            let (delivery_status, attempts, error) = self.deliver(&channel, &message).await;
            let event = AlertEvent {
                id: Uuid::new_v4(),
                incident_id: incident.id,
                channel_id: channel.id,
                kind,
                sent_at: Utc::now(),
                delivery_status,
                attempts,
                error,
            };
            if let Err(e) = self.store.record_alert_event(&event).await {
                error!(alert_event_id = %event.id, error = %e, "Failed to record alert event.");
            }
            event
        });
        join_all(deliveries).await
    }

    async fn deliver(
        &self,
        channel: &NotificationChannel,
        message: &AlertMessage,
    ) -> (DeliveryStatus, u32, Option<String>) {
        let Some(sender) = self.senders.get(&channel.channel_type()) else {
            let e = NotificationError::UnsupportedChannel(channel.channel_type());
            error!(channel_id = channel.id, error = %e, "Cannot deliver alert.");
            return (DeliveryStatus::Failed, 0, Some(e.to_string()));
        };

        let mut attempts = 0;
        let mut delay = self.settings.backoff;
        loop {
            attempts += 1;
            match sender.send(&channel.config, message).await {
                Ok(()) => {
                    info!(channel_id = channel.id, attempts, subject = %message.subject, "Alert delivered.");
                    return (DeliveryStatus::Sent, attempts, None);
                }
                Err(e) if attempts > self.settings.max_retries => {
                    error!(channel_id = channel.id, attempts, error = %e, "Alert delivery failed; giving up.");
                    return (DeliveryStatus::Failed, attempts, Some(e.to_string()));
                }
                Err(e) => {
                    warn!(channel_id = channel.id, attempts, error = %e, "Alert delivery failed; retrying.");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
}

fn thresholds_met(subscription: &ChannelSubscription, incident: &Incident) -> bool {
    let downtime_ok = subscription.min_downtime_seconds.is_none_or(|min| {
        incident.last_failure_at - incident.start_time >= ChronoDuration::seconds(min as i64)
    });
    let latency_ok = subscription
        .min_response_time_ms
        .is_none_or(|min| incident.last_response_time_ms > min);
    downtime_ok && latency_ok
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn render_alert(monitor: &Monitor, incident: &Incident, kind: AlertKind) -> AlertMessage {
    let (subject, body) = match kind {
        AlertKind::Opened => (
            format!("[DOWN] {}", monitor.name),
            format!(
                "Monitor '{}' ({}) is down since {} (cause: {}).",
                monitor.name,
                monitor.url,
                format_time(incident.start_time),
                incident.cause
            ),
        ),
        AlertKind::Resolved => (
            format!("[UP] {}", monitor.name),
            format!(
                "Monitor '{}' ({}) recovered at {} after {} seconds of downtime.",
                monitor.name,
                monitor.url,
                incident.end_time.map(format_time).unwrap_or_default(),
                incident.duration_seconds.unwrap_or_default()
            ),
        ),
        AlertKind::Escalated => (
            format!("[STILL DOWN] {}", monitor.name),
            format!(
                "Monitor '{}' ({}) has been down since {} with {} failed checks (cause: {}).",
                monitor.name,
                monitor.url,
                format_time(incident.start_time),
                incident.failed_checks,
                incident.cause
            ),
        ),
    };

    let mut context = HashMap::from([
        ("kind".to_string(), kind.as_str().to_string()),
        ("monitor_id".to_string(), monitor.id.to_string()),
        ("monitor_name".to_string(), monitor.name.clone()),
        ("monitor_url".to_string(), monitor.url.clone()),
        ("incident_id".to_string(), incident.id.to_string()),
        ("cause".to_string(), incident.cause.to_string()),
        ("start_time".to_string(), incident.start_time.to_rfc3339()),
        ("failed_checks".to_string(), incident.failed_checks.to_string()),
    ]);
    if let Some(end) = incident.end_time {
        context.insert("end_time".to_string(), end.to_rfc3339());
    }
    if let Some(duration) = incident.duration_seconds {
        context.insert("duration_seconds".to_string(), duration.to_string());
    }

    AlertMessage {
        subject,
        body,
        context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::models::{
        IncidentStatus, MonitorStatus, NotificationConfig, ProbeCause,
    };
    use crate::monitoring::store::memory::MemoryStore;
    use crate::notifications::models::ChannelConfig;
    use crate::notifications::senders::testing::{FailingSender, RecordingSender};
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + ChronoDuration::seconds(seconds)
    }

    fn monitor(subscriptions: Vec<ChannelSubscription>) -> Monitor {
        Monitor {
            id: 7,
            user_id: 1,
            name: "api".to_string(),
            url: "https://api.example.com/health".to_string(),
            interval_seconds: 60,
            timeout_ms: None,
            locations: Vec::new(),
            notification_config: NotificationConfig {
                channels: subscriptions,
                failure_threshold: None,
            },
            status: MonitorStatus::Down,
            is_active: true,
            created_at: at(0),
        }
    }

    fn incident(start: i64, last_failure: i64) -> Incident {
        Incident {
            id: Uuid::new_v4(),
            monitor_id: 7,
            start_time: at(start),
            end_time: None,
            status: IncidentStatus::Open,
            cause: ProbeCause::ConnectionRefused,
            duration_seconds: None,
            failed_checks: 2,
            last_failure_at: at(last_failure),
            last_response_time_ms: 40,
        }
    }

    fn resolved(mut incident: Incident, end: i64) -> Incident {
        incident.end_time = Some(at(end));
        incident.duration_seconds = Some((at(end) - incident.start_time).num_seconds());
        incident.status = IncidentStatus::Resolved;
        incident
    }

    fn sms_channel(id: i32) -> NotificationChannel {
        NotificationChannel {
            id,
            user_id: 1,
            name: format!("sms-{id}"),
            enabled: true,
            config: ChannelConfig::Sms {
                recipients: vec!["+15550001111".to_string()],
            },
        }
    }

    fn webhook_channel(id: i32) -> NotificationChannel {
        NotificationChannel {
            id,
            user_id: 1,
            name: format!("hook-{id}"),
            enabled: true,
            config: ChannelConfig::Webhook {
                url: "https://example.com/hook".to_string(),
                method: "POST".to_string(),
                headers: None,
                body_template: None,
            },
        }
    }

    fn settings() -> NotifierSettings {
        NotifierSettings {
            max_retries: 2,
            backoff: Duration::from_millis(1),
            escalation_after: None,
        }
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_block_others() {
        let store = Arc::new(MemoryStore::default());
        store.add_channel(sms_channel(1));
        store.add_channel(webhook_channel(2));
        let failing = Arc::new(FailingSender::default());
        let recording = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(store.clone(), settings())
            .with_sender(ChannelType::Sms, failing.clone())
            .with_sender(ChannelType::Webhook, recording.clone());

        let m = monitor(vec![ChannelSubscription::new(1), ChannelSubscription::new(2)]);
        let events = notifier
            .dispatch(&m, &IncidentTransition::Opened(incident(0, 60)))
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(recording.sent().len(), 1);
        assert_eq!(failing.attempts.load(std::sync::atomic::Ordering::SeqCst), 3);

        let failed = events.iter().find(|e| e.channel_id == 1).unwrap();
        assert_eq!(failed.delivery_status, DeliveryStatus::Failed);
        assert_eq!(failed.attempts, 3);
        assert!(failed.error.as_deref().unwrap().contains("SMS provider error"));
        let sent = events.iter().find(|e| e.channel_id == 2).unwrap();
        assert_eq!(sent.delivery_status, DeliveryStatus::Sent);
        assert_eq!(store.events().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let store = Arc::new(MemoryStore::default());
        store.add_channel(webhook_channel(2));
        let flaky = Arc::new(RecordingSender::failing_first(2));
        let notifier = Notifier::new(store.clone(), settings()).with_sender(ChannelType::Webhook, flaky.clone());

        let events = notifier
            .dispatch(
                &monitor(vec![ChannelSubscription::new(2)]),
                &IncidentTransition::Opened(incident(0, 60)),
            )
            .await
            .unwrap();
        assert_eq!(events[0].delivery_status, DeliveryStatus::Sent);
        assert_eq!(events[0].attempts, 3);
        assert_eq!(flaky.attempts(), 3);
    }

    #[tokio::test]
    async fn test_repeated_opened_is_suppressed() {
        let store = Arc::new(MemoryStore::default());
        store.add_channel(webhook_channel(2));
        let recording = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(store.clone(), settings()).with_sender(ChannelType::Webhook, recording.clone());
        let m = monitor(vec![ChannelSubscription::new(2)]);
        let open = incident(0, 60);

        notifier.dispatch(&m, &IncidentTransition::Opened(open.clone())).await.unwrap();
        notifier.dispatch(&m, &IncidentTransition::Opened(open.clone())).await.unwrap();
        notifier.dispatch(&m, &IncidentTransition::Updated(incident_with_id(&open, 120))).await.unwrap();

        assert_eq!(recording.sent().len(), 1);
        assert_eq!(store.events().len(), 1);
    }

    fn incident_with_id(base: &Incident, last_failure: i64) -> Incident {
        Incident {
            last_failure_at: at(last_failure),
            failed_checks: base.failed_checks + 1,
            ..base.clone()
        }
    }

    #[tokio::test]
    async fn test_downtime_threshold_delays_opened_alert() {
        let store = Arc::new(MemoryStore::default());
        store.add_channel(webhook_channel(2));
        let recording = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(store.clone(), settings()).with_sender(ChannelType::Webhook, recording.clone());
        let mut sub = ChannelSubscription::new(2);
        sub.min_downtime_seconds = Some(300);
        let m = monitor(vec![sub]);
        let open = incident(0, 60);

        notifier.dispatch(&m, &IncidentTransition::Opened(open.clone())).await.unwrap();
        assert!(recording.sent().is_empty());

        notifier.dispatch(&m, &IncidentTransition::Updated(incident_with_id(&open, 240))).await.unwrap();
        assert!(recording.sent().is_empty());

        notifier.dispatch(&m, &IncidentTransition::Updated(incident_with_id(&open, 300))).await.unwrap();
        let sent = recording.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.subject, "[DOWN] api");
    }

    #[tokio::test]
    async fn test_resolve_only_reaches_channels_that_saw_opened() {
        let store = Arc::new(MemoryStore::default());
        store.add_channel(webhook_channel(2));
        store.add_channel(webhook_channel(3));
        let recording = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(store.clone(), settings()).with_sender(ChannelType::Webhook, recording.clone());
        let mut slow_only = ChannelSubscription::new(3);
        slow_only.min_response_time_ms = Some(1000);
        let m = monitor(vec![ChannelSubscription::new(2), slow_only]);
        let open = incident(0, 60);

        notifier.dispatch(&m, &IncidentTransition::Opened(open.clone())).await.unwrap();
        let events = notifier
            .dispatch(&m, &IncidentTransition::Resolved(resolved(open.clone(), 180)))
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel_id, 2);
        assert_eq!(events[0].kind, AlertKind::Resolved);
        let subjects: Vec<String> = recording.sent().into_iter().map(|(_, m)| m.subject).collect();
        assert_eq!(subjects, vec!["[DOWN] api".to_string(), "[UP] api".to_string()]);

        // A duplicate resolve after cleanup sends nothing.
        let events = notifier
            .dispatch(&m, &IncidentTransition::Resolved(resolved(open, 180)))
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_channel_is_skipped() {
        let store = Arc::new(MemoryStore::default());
        let mut channel = webhook_channel(2);
        channel.enabled = false;
        store.add_channel(channel);
        let recording = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(store.clone(), settings()).with_sender(ChannelType::Webhook, recording.clone());

        let events = notifier
            .dispatch(
                &monitor(vec![ChannelSubscription::new(2)]),
                &IncidentTransition::Opened(incident(0, 60)),
            )
            .await
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(recording.attempts(), 0);
    }

    #[tokio::test]
    async fn test_automatic_and_manual_escalation() {
        let store = Arc::new(MemoryStore::default());
        store.add_channel(webhook_channel(2));
        let recording = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(
            store.clone(),
            NotifierSettings {
                escalation_after: Some(Duration::from_secs(600)),
                ..settings()
            },
        )
        .with_sender(ChannelType::Webhook, recording.clone());
        let m = monitor(vec![ChannelSubscription::new(2)]);
        let open = incident(0, 60);

        notifier.dispatch(&m, &IncidentTransition::Opened(open.clone())).await.unwrap();
        notifier.dispatch(&m, &IncidentTransition::Updated(incident_with_id(&open, 600))).await.unwrap();
        notifier.dispatch(&m, &IncidentTransition::Updated(incident_with_id(&open, 660))).await.unwrap();
        assert_eq!(recording.sent().len(), 2);
        assert_eq!(recording.sent()[1].1.subject, "[STILL DOWN] api");

        let events = notifier.escalate(&m, &open).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::Escalated);
        assert_eq!(recording.sent().len(), 3);

        let err = notifier.escalate(&m, &resolved(open, 700)).await.unwrap_err();
        assert!(matches!(err, NotificationError::IncidentNotOpen(_)));
    }

    #[tokio::test]
    async fn test_missing_sender_records_failure() {
        let store = Arc::new(MemoryStore::default());
        store.add_channel(sms_channel(1));
        let notifier = Notifier::new(store.clone(), settings());

        let events = notifier
            .dispatch(
                &monitor(vec![ChannelSubscription::new(1)]),
                &IncidentTransition::Opened(incident(0, 60)),
            )
            .await
            .unwrap();
        assert_eq!(events[0].delivery_status, DeliveryStatus::Failed);
        assert_eq!(events[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_resolve_waits_for_slow_opened_dispatch() {
        let store = Arc::new(MemoryStore::default());
        store.add_channel(webhook_channel(2));
        store
            .channel_lookup_delays
            .lock()
            .unwrap()
            .extend([Duration::from_millis(50), Duration::ZERO]);
        let recording = Arc::new(RecordingSender::default());
        let notifier = Arc::new(
            Notifier::new(store.clone(), settings()).with_sender(ChannelType::Webhook, recording.clone()),
        );
        let m = monitor(vec![ChannelSubscription::new(2)]);
        let open = incident(0, 60);

        let opened = notifier.spawn_dispatch(m.clone(), IncidentTransition::Opened(open.clone()));
        let resolve = notifier.spawn_dispatch(m, IncidentTransition::Resolved(resolved(open, 180)));
        assert_eq!(opened.await.unwrap().len(), 1);
        assert_eq!(resolve.await.unwrap().len(), 1);

        let subjects: Vec<String> = recording.sent().into_iter().map(|(_, m)| m.subject).collect();
        assert_eq!(subjects, vec!["[DOWN] api".to_string(), "[UP] api".to_string()]);
        assert!(notifier.delivered.is_empty());
        assert!(notifier.dispatch_tails.is_empty());
    }

    #[tokio::test]
    async fn test_failed_resolve_still_clears_ledger() {
        let store = Arc::new(MemoryStore::default());
        store.add_channel(webhook_channel(2));
        let recording = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(store.clone(), settings()).with_sender(ChannelType::Webhook, recording.clone());
        let m = monitor(vec![ChannelSubscription::new(2)]);
        let open = incident(0, 60);

        notifier.dispatch(&m, &IncidentTransition::Opened(open.clone())).await.unwrap();
        assert!(!notifier.delivered.is_empty());

        store
            .fail_channel_lookups
            .store(1, std::sync::atomic::Ordering::SeqCst);
        let err = notifier
            .dispatch(&m, &IncidentTransition::Resolved(resolved(open, 180)))
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::Store(_)));
        assert!(notifier.delivered.is_empty());
    }

    #[tokio::test]
    async fn test_restored_ledger_suppresses_opened() {
        let store = Arc::new(MemoryStore::default());
        store.add_channel(webhook_channel(2));
        let recording = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(store.clone(), settings()).with_sender(ChannelType::Webhook, recording.clone());
        let m = monitor(vec![ChannelSubscription::new(2)]);
        let open = incident(0, 60);

        let earlier = AlertEvent {
            id: Uuid::new_v4(),
            incident_id: open.id,
            channel_id: 2,
            kind: AlertKind::Opened,
            sent_at: at(60),
            delivery_status: DeliveryStatus::Sent,
            attempts: 1,
            error: None,
        };
        assert_eq!(notifier.restore(&[earlier.clone(), earlier]), 1);

        let events = notifier
            .dispatch(&m, &IncidentTransition::Updated(incident_with_id(&open, 120)))
            .await
            .unwrap();
        assert!(events.is_empty());

        let events = notifier
            .dispatch(&m, &IncidentTransition::Resolved(resolved(open, 180)))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertKind::Resolved);
        let subjects: Vec<String> = recording.sent().into_iter().map(|(_, m)| m.subject).collect();
        assert_eq!(subjects, vec!["[UP] api".to_string()]);
    }

    #[test]
    fn test_render_resolved_alert() {
        let m = monitor(Vec::new());
        let message = render_alert(&m, &resolved(incident(60, 120), 180), AlertKind::Resolved);
        assert_eq!(message.subject, "[UP] api");
        assert!(message.body.contains("after 120 seconds"));
        assert_eq!(message.context["duration_seconds"], "120");
        assert_eq!(message.context["cause"], "connection_refused");
    }
}
