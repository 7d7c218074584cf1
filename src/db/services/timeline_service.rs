//! CSV export of a monitor's recent history: every check plus incident
//! open/resolve markers, in time order.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;

use super::{ServiceError, check_result_service, incident_service};
use crate::monitoring::error::ConfigValidationError;
use crate::monitoring::models::{CheckResult, Incident};

pub const DEFAULT_TIMELINE_DAYS: u32 = 7;
pub const MAX_TIMELINE_DAYS: u32 = 90;

#[derive(Serialize)]
struct TimelineRow<'a> {
    timestamp: String,
    event: &'static str,
    status: &'a str,
    response_time_ms: Option<u64>,
    http_status_code: Option<u16>,
    cause: Option<&'a str>,
    location: Option<&'a str>,
    detail: Option<String>,
}

pub fn timeline_window(days: Option<u32>) -> Result<u32, ConfigValidationError> {
    let days = days.unwrap_or(DEFAULT_TIMELINE_DAYS);
    if !(1..=MAX_TIMELINE_DAYS).contains(&days) {
        return Err(ConfigValidationError::new(
            "days",
            format!("must be between 1 and {MAX_TIMELINE_DAYS}"),
        ));
    }
    Ok(days)
}

pub async fn export_timeline_csv(
    db: &DatabaseConnection,
    monitor_id: i32,
    days: Option<u32>,
    now: DateTime<Utc>,
) -> Result<String, ServiceError> {
    let days = timeline_window(days)?;
    let since = now - Duration::days(i64::from(days));
    let checks = check_result_service::get_results_since(db, monitor_id, since).await?;
    let incidents = incident_service::get_incidents_overlapping(db, monitor_id, since).await?;
    build_timeline(&checks, &incidents, since).map_err(|e| ServiceError::Export(e.to_string()))
}

pub fn build_timeline(
    checks: &[CheckResult],
    incidents: &[Incident],
    since: DateTime<Utc>,
) -> Result<String, csv::Error> {
    let mut rows: Vec<(DateTime<Utc>, TimelineRow<'_>)> = Vec::new();

    for check in checks.iter().filter(|c| c.timestamp >= since) {
        rows.push((
            check.timestamp,
            TimelineRow {
                timestamp: format_time(check.timestamp),
                event: "check",
                status: check.status.as_str(),
                response_time_ms: Some(check.response_time_ms),
                http_status_code: check.http_status_code,
                cause: check.cause.map(|c| c.as_str()),
                location: check.location.as_deref(),
                detail: check.warning.clone(),
            },
        ));
    }

    for incident in incidents {
        if incident.start_time >= since {
            rows.push((
                incident.start_time,
                TimelineRow {
                    timestamp: format_time(incident.start_time),
                    event: "incident_opened",
                    status: "down",
                    response_time_ms: None,
                    http_status_code: None,
                    cause: Some(incident.cause.as_str()),
                    location: None,
                    detail: Some(format!("incident {}", incident.id)),
                },
            ));
        }
        if let Some(end) = incident.end_time.filter(|end| *end >= since) {
            rows.push((
                end,
                TimelineRow {
                    timestamp: format_time(end),
                    event: "incident_resolved",
                    status: "up",
                    response_time_ms: None,
                    http_status_code: None,
                    cause: Some(incident.cause.as_str()),
                    location: None,
                    detail: Some(format!(
                        "incident {} lasted {}s",
                        incident.id,
                        incident.duration_seconds.unwrap_or_default()
                    )),
                },
            ));
        }
    }

    // Stable: a check and an incident marker at the same instant keep check first.
    rows.sort_by_key(|(at, _)| *at);

    let mut writer = csv::Writer::from_writer(Vec::new());
    if rows.is_empty() {
        writer.write_record([
            "timestamp",
            "event",
            "status",
            "response_time_ms",
            "http_status_code",
            "cause",
            "location",
            "detail",
        ])?;
    }
    for (_, row) in &rows {
        writer.serialize(row)?;
    }
    let bytes = writer.into_inner().map_err(|e| {
        csv::Error::from(std::io::Error::new(e.error().kind(), e.error().to_string()))
    })?;
    String::from_utf8(bytes).map_err(|e| {
        csv::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}
