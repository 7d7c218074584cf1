//! Core data types shared by the scheduler, prober, incident tracker and notifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound for a probe timeout derived from the monitor interval.
const DERIVED_TIMEOUT_CAP_MS: u64 = 10_000;
const DERIVED_TIMEOUT_FLOOR_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Up => "up",
            MonitorStatus::Down => "down",
            MonitorStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for MonitorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(MonitorStatus::Up),
            "down" => Ok(MonitorStatus::Down),
            "unknown" => Ok(MonitorStatus::Unknown),
            other => Err(format!("unknown monitor status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Up => "up",
            CheckStatus::Down => "down",
        }
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(CheckStatus::Up),
            "down" => Ok(CheckStatus::Down),
            other => Err(format!("unknown check status '{other}'")),
        }
    }
}

/// Diagnostic reason attached to a `down` check result and carried into incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeCause {
    Timeout,
    DnsFailure,
    ConnectionRefused,
    TlsError,
    NetworkError,
    InvalidResponse,
    ProbeError,
}

impl ProbeCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeCause::Timeout => "timeout",
            ProbeCause::DnsFailure => "dns_failure",
            ProbeCause::ConnectionRefused => "connection_refused",
            ProbeCause::TlsError => "tls_error",
            ProbeCause::NetworkError => "network_error",
            ProbeCause::InvalidResponse => "invalid_response",
            ProbeCause::ProbeError => "probe_error",
        }
    }
}

impl fmt::Display for ProbeCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeCause {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(ProbeCause::Timeout),
            "dns_failure" => Ok(ProbeCause::DnsFailure),
            "connection_refused" => Ok(ProbeCause::ConnectionRefused),
            "tls_error" => Ok(ProbeCause::TlsError),
            "network_error" => Ok(ProbeCause::NetworkError),
            "invalid_response" => Ok(ProbeCause::InvalidResponse),
            "probe_error" => Ok(ProbeCause::ProbeError),
            other => Err(format!("unknown probe cause '{other}'")),
        }
    }
}

/// Per-channel subscription of a monitor, including alert thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSubscription {
    pub channel_id: i32,
    /// Hold back the "opened" alert until the incident has lasted this long.
    #[serde(default)]
    pub min_downtime_seconds: Option<u64>,
    /// Only alert when the triggering check was slower than this.
    #[serde(default)]
    pub min_response_time_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub notify_on_resolve: bool,
}

fn default_true() -> bool {
    true
}

impl ChannelSubscription {
    pub fn new(channel_id: i32) -> Self {
        Self {
            channel_id,
            min_downtime_seconds: None,
            min_response_time_ms: None,
            notify_on_resolve: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    #[serde(default)]
    pub channels: Vec<ChannelSubscription>,
    /// Overrides the global number of consecutive failures needed to open an incident.
    #[serde(default)]
    pub failure_threshold: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub url: String,
    pub interval_seconds: u32,
    pub timeout_ms: Option<u64>,
    pub locations: Vec<String>,
    pub notification_config: NotificationConfig,
    pub status: MonitorStatus,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Monitor {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_seconds.max(1)))
    }

    /// The configured timeout, or half the interval clamped to `[1s, 10s]`.
    pub fn probe_timeout(&self) -> Duration {
        let ms = self.timeout_ms.unwrap_or_else(|| {
            (u64::from(self.interval_seconds) * 1000 / 2)
                .clamp(DERIVED_TIMEOUT_FLOOR_MS, DERIVED_TIMEOUT_CAP_MS)
        });
        Duration::from_millis(ms.max(1))
    }

    /// Whether a prober running at `location` is responsible for this monitor.
    pub fn probed_from(&self, location: Option<&str>) -> bool {
        match location {
            None => true,
            Some(_) if self.locations.is_empty() => true,
            Some(loc) => self.locations.iter().any(|l| l == loc),
        }
    }
}

/// The outcome of a single probe. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub monitor_id: i32,
    pub timestamp: DateTime<Utc>,
    pub status: CheckStatus,
    pub response_time_ms: u64,
    pub http_status_code: Option<u16>,
    pub ssl_valid: Option<bool>,
    pub ssl_days_until_expiry: Option<i64>,
    pub dns_ok: Option<bool>,
    pub cause: Option<ProbeCause>,
    pub warning: Option<String>,
    pub location: Option<String>,
}

impl CheckResult {
    pub fn up(monitor_id: i32, timestamp: DateTime<Utc>, response_time_ms: u64) -> Self {
        Self {
            monitor_id,
            timestamp,
            status: CheckStatus::Up,
            response_time_ms,
            http_status_code: None,
            ssl_valid: None,
            ssl_days_until_expiry: None,
            dns_ok: None,
            cause: None,
            warning: None,
            location: None,
        }
    }

    pub fn down(
        monitor_id: i32,
        timestamp: DateTime<Utc>,
        response_time_ms: u64,
        cause: ProbeCause,
    ) -> Self {
        Self {
            status: CheckStatus::Down,
            cause: Some(cause),
            ..Self::up(monitor_id, timestamp, response_time_ms)
        }
    }

    pub fn is_up(&self) -> bool {
        self.status == CheckStatus::Up
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(IncidentStatus::Open),
            "resolved" => Ok(IncidentStatus::Resolved),
            other => Err(format!("unknown incident status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: Uuid,
    pub monitor_id: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: IncidentStatus,
    pub cause: ProbeCause,
    pub duration_seconds: Option<i64>,
    /// Number of failing checks observed while this incident was open.
    pub failed_checks: u32,
    pub last_failure_at: DateTime<Utc>,
    /// Response time of the most recent check attributed to this incident.
    pub last_response_time_ms: u64,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.status == IncidentStatus::Open
    }

    /// How long the incident has lasted as of `now` (or in total, once resolved).
    pub fn downtime(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.end_time.unwrap_or(now) - self.start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(interval_seconds: u32, timeout_ms: Option<u64>) -> Monitor {
        Monitor {
            id: 1,
            user_id: 1,
            name: "example".to_string(),
            url: "https://example.com".to_string(),
            interval_seconds,
            timeout_ms,
            locations: Vec::new(),
            notification_config: NotificationConfig::default(),
            status: MonitorStatus::Unknown,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_probe_timeout_derived_from_interval() {
        assert_eq!(monitor(60, None).probe_timeout(), Duration::from_secs(10));
        assert_eq!(monitor(10, None).probe_timeout(), Duration::from_secs(5));
        assert_eq!(monitor(1, None).probe_timeout(), Duration::from_secs(1));
        assert_eq!(
            monitor(60, Some(5000)).probe_timeout(),
            Duration::from_millis(5000)
        );
    }

    #[test]
    fn test_probed_from_location() {
        let mut m = monitor(60, None);
        assert!(m.probed_from(None));
        assert!(m.probed_from(Some("eu-west")));
        m.locations = vec!["us-east".to_string()];
        assert!(!m.probed_from(Some("eu-west")));
        assert!(m.probed_from(Some("us-east")));
        assert!(m.probed_from(None));
    }

    #[test]
    fn test_cause_string_roundtrip_matches_serde() {
        let json = serde_json::to_string(&ProbeCause::ConnectionRefused).unwrap();
        assert_eq!(json, "\"connection_refused\"");
        assert_eq!(
            "dns_failure".parse::<ProbeCause>().unwrap(),
            ProbeCause::DnsFailure
        );
        assert!("bogus".parse::<ProbeCause>().is_err());
    }

    #[test]
    fn test_subscription_defaults_notify_on_resolve() {
        let sub: ChannelSubscription = serde_json::from_str(r#"{"channelId": 3}"#).unwrap();
        assert_eq!(sub, ChannelSubscription::new(3));
    }
}
