use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};

use super::{signed, unsigned};
use crate::db::entities::check_result;
use crate::monitoring::models::{CheckResult, CheckStatus, ProbeCause};
use crate::monitoring::store::StoreError;

pub const DEFAULT_RESULTS_LIMIT: u64 = 100;
pub const MAX_RESULTS_LIMIT: u64 = 1000;

pub async fn record_check_result(db: &DatabaseConnection, result: &CheckResult) -> Result<(), DbErr> {
    let row = check_result::ActiveModel {
        monitor_id: Set(result.monitor_id),
        checked_at: Set(result.timestamp),
        status: Set(result.status.as_str().to_string()),
        response_time_ms: Set(signed(result.response_time_ms)),
        http_status_code: Set(result.http_status_code.map(i32::from)),
        ssl_valid: Set(result.ssl_valid),
        ssl_days_until_expiry: Set(result.ssl_days_until_expiry),
        dns_ok: Set(result.dns_ok),
        cause: Set(result.cause.map(|c| c.as_str().to_string())),
        warning: Set(result.warning.clone()),
        location: Set(result.location.clone()),
        ..Default::default()
    };
    row.insert(db).await?;
    Ok(())
}

/// Most recent results first.
pub async fn get_recent_results(
    db: &DatabaseConnection,
    monitor_id: i32,
    limit: Option<u64>,
) -> Result<Vec<CheckResult>, StoreError> {
    let limit = limit.unwrap_or(DEFAULT_RESULTS_LIMIT).clamp(1, MAX_RESULTS_LIMIT);
    let rows = check_result::Entity::find()
        .filter(check_result::Column::MonitorId.eq(monitor_id))
        .order_by_desc(check_result::Column::CheckedAt)
        .limit(limit)
        .all(db)
        .await?;
    rows.into_iter().map(to_domain).collect()
}

/// Results at or after `since`, oldest first.
pub async fn get_results_since(
    db: &DatabaseConnection,
    monitor_id: i32,
    since: DateTime<Utc>,
) -> Result<Vec<CheckResult>, StoreError> {
    let rows = check_result::Entity::find()
        .filter(check_result::Column::MonitorId.eq(monitor_id))
        .filter(check_result::Column::CheckedAt.gte(since))
        .order_by_asc(check_result::Column::CheckedAt)
        .all(db)
        .await?;
    rows.into_iter().map(to_domain).collect()
}

pub fn to_domain(model: check_result::Model) -> Result<CheckResult, StoreError> {
    let status = model.status.parse::<CheckStatus>().map_err(StoreError::Corrupt)?;
    let cause = model
        .cause
        .as_deref()
        .map(str::parse::<ProbeCause>)
        .transpose()
        .map_err(StoreError::Corrupt)?;
    Ok(CheckResult {
        monitor_id: model.monitor_id,
        timestamp: model.checked_at,
        status,
        response_time_ms: unsigned(model.response_time_ms),
        http_status_code: model.http_status_code.and_then(|c| u16::try_from(c).ok()),
        ssl_valid: model.ssl_valid,
        ssl_days_until_expiry: model.ssl_days_until_expiry,
        dns_ok: model.dns_ok,
        cause,
        warning: model.warning,
        location: model.location,
    })
}
