//! Monitor registry: CRUD, validation and status write-back.

use chrono::{DateTime, Utc};
use reqwest::Url;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::collections::HashSet;

use super::{ServiceError, channel_service, signed, unsigned};
use crate::db::entities::monitor;
use crate::monitoring::error::ConfigValidationError;
use crate::monitoring::models::{Monitor, MonitorStatus, NotificationConfig};
use crate::monitoring::store::StoreError;
use crate::web::models::monitor_models::{
    CreateMonitorRequest, MonitorResponse, UpdateMonitorRequest,
};

pub const MIN_INTERVAL_SECONDS: u32 = 10;
pub const MAX_INTERVAL_SECONDS: u32 = 86_400;
pub const MIN_TIMEOUT_MS: u64 = 100;
pub const MAX_FAILURE_THRESHOLD: u32 = 20;

/// The user-editable fields of a monitor, after defaults are applied.
#[derive(Debug, Clone)]
pub struct MonitorDraft {
    pub name: String,
    pub url: String,
    pub interval_seconds: u32,
    pub timeout_ms: Option<u64>,
    pub locations: Vec<String>,
    pub notification_config: NotificationConfig,
}

impl From<CreateMonitorRequest> for MonitorDraft {
    fn from(req: CreateMonitorRequest) -> Self {
        Self {
            name: req.name,
            url: req.url,
            interval_seconds: req.interval_seconds,
            timeout_ms: req.timeout_ms,
            locations: req.locations.unwrap_or_default(),
            notification_config: req.notification_config.unwrap_or_default(),
        }
    }
}

/// Checks everything that can be checked without the database.
pub fn validate_draft(draft: &MonitorDraft) -> Result<(), ConfigValidationError> {
    if draft.name.trim().is_empty() {
        return Err(ConfigValidationError::new("name", "must not be empty"));
    }

    let url = Url::parse(draft.url.trim())
        .map_err(|e| ConfigValidationError::new("url", format!("is not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigValidationError::new("url", "must use http or https"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigValidationError::new("url", "must include a host"));
    }

    if !(MIN_INTERVAL_SECONDS..=MAX_INTERVAL_SECONDS).contains(&draft.interval_seconds) {
        return Err(ConfigValidationError::new(
            "intervalSeconds",
            format!("must be between {MIN_INTERVAL_SECONDS} and {MAX_INTERVAL_SECONDS}"),
        ));
    }

    if let Some(timeout) = draft.timeout_ms {
        let max = u64::from(draft.interval_seconds) * 1000;
        if !(MIN_TIMEOUT_MS..=max).contains(&timeout) {
            return Err(ConfigValidationError::new(
                "timeoutMs",
                format!("must be between {MIN_TIMEOUT_MS} and {max} (the interval)"),
            ));
        }
    }

    if draft.locations.iter().any(|l| l.trim().is_empty()) {
        return Err(ConfigValidationError::new("locations", "must not contain blank entries"));
    }

    if let Some(threshold) = draft.notification_config.failure_threshold {
        if !(1..=MAX_FAILURE_THRESHOLD).contains(&threshold) {
            return Err(ConfigValidationError::new(
                "failureThreshold",
                format!("must be between 1 and {MAX_FAILURE_THRESHOLD}"),
            ));
        }
    }

    let mut seen = HashSet::new();
    for sub in &draft.notification_config.channels {
        if !seen.insert(sub.channel_id) {
            return Err(ConfigValidationError::new(
                "notificationConfig.channels",
                format!("channel {} is listed more than once", sub.channel_id),
            ));
        }
    }
    Ok(())
}

async fn validate(
    db: &DatabaseConnection,
    user_id: i32,
    draft: &MonitorDraft,
) -> Result<(), ServiceError> {
    validate_draft(draft)?;

    let requested: Vec<i32> = draft
        .notification_config
        .channels
        .iter()
        .map(|c| c.channel_id)
        .collect();
    let owned = channel_service::owned_channel_ids(db, user_id, &requested).await?;
    if let Some(missing) = requested.iter().find(|id| !owned.contains(id)) {
        return Err(ConfigValidationError::new(
            "notificationConfig.channels",
            format!("channel {missing} does not exist"),
        )
        .into());
    }
    Ok(())
}

pub fn to_domain(model: monitor::Model) -> Result<Monitor, StoreError> {
    let status = model.status.parse::<MonitorStatus>().map_err(StoreError::Corrupt)?;
    Ok(Monitor {
        id: model.id,
        user_id: model.user_id,
        name: model.name,
        url: model.url,
        interval_seconds: u32::try_from(model.interval_seconds).unwrap_or(MIN_INTERVAL_SECONDS),
        timeout_ms: model.timeout_ms.map(unsigned),
        locations: serde_json::from_value(model.locations)?,
        notification_config: serde_json::from_value(model.notification_config)?,
        status,
        is_active: model.is_active,
        created_at: model.created_at,
    })
}

pub fn to_response(model: monitor::Model) -> Result<MonitorResponse, StoreError> {
    let last_checked_at = model.last_checked_at;
    let updated_at = model.updated_at;
    let monitor = to_domain(model)?;
    Ok(MonitorResponse {
        id: monitor.id,
        user_id: monitor.user_id,
        name: monitor.name,
        url: monitor.url,
        interval_seconds: monitor.interval_seconds,
        timeout_ms: monitor.timeout_ms,
        locations: monitor.locations,
        notification_config: monitor.notification_config,
        status: monitor.status,
        is_active: monitor.is_active,
        last_checked_at,
        created_at: monitor.created_at,
        updated_at,
    })
}

pub async fn create_monitor(
    db: &DatabaseConnection,
    user_id: i32,
    req: CreateMonitorRequest,
) -> Result<monitor::Model, ServiceError> {
    let is_active = req.is_active.unwrap_or(true);
    let draft = MonitorDraft::from(req);
    validate(db, user_id, &draft).await?;

    let now = Utc::now();
    let new_monitor = monitor::ActiveModel {
        user_id: Set(user_id),
        name: Set(draft.name.trim().to_string()),
        url: Set(draft.url.trim().to_string()),
        interval_seconds: Set(i32::try_from(draft.interval_seconds).unwrap_or(i32::MAX)),
        timeout_ms: Set(draft.timeout_ms.map(signed)),
        locations: Set(serde_json::to_value(trimmed(&draft.locations))?),
        notification_config: Set(serde_json::to_value(&draft.notification_config)?),
        status: Set(MonitorStatus::Unknown.as_str().to_string()),
        is_active: Set(is_active),
        last_checked_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    Ok(new_monitor.insert(db).await?)
}

pub async fn get_monitors_by_user_id(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<Vec<monitor::Model>, DbErr> {
    monitor::Entity::find()
        .filter(monitor::Column::UserId.eq(user_id))
        .order_by_asc(monitor::Column::Id)
        .all(db)
        .await
}

pub async fn get_monitor_by_id(
    db: &DatabaseConnection,
    user_id: i32,
    monitor_id: i32,
) -> Result<monitor::Model, ServiceError> {
    monitor::Entity::find_by_id(monitor_id)
        .filter(monitor::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Monitor {monitor_id}")))
}

pub async fn update_monitor(
    db: &DatabaseConnection,
    user_id: i32,
    monitor_id: i32,
    req: UpdateMonitorRequest,
) -> Result<monitor::Model, ServiceError> {
    let existing = get_monitor_by_id(db, user_id, monitor_id).await?;
    let current = to_domain(existing.clone())?;

    let draft = MonitorDraft {
        name: req.name.unwrap_or(current.name),
        url: req.url.unwrap_or(current.url),
        interval_seconds: req.interval_seconds.unwrap_or(current.interval_seconds),
        timeout_ms: req.timeout_ms.or(current.timeout_ms),
        locations: req.locations.unwrap_or(current.locations),
        notification_config: req.notification_config.unwrap_or(current.notification_config),
    };
    validate(db, user_id, &draft).await?;

    let mut active: monitor::ActiveModel = existing.into();
    active.name = Set(draft.name.trim().to_string());
    active.url = Set(draft.url.trim().to_string());
    active.interval_seconds = Set(i32::try_from(draft.interval_seconds).unwrap_or(i32::MAX));
    active.timeout_ms = Set(draft.timeout_ms.map(signed));
    active.locations = Set(serde_json::to_value(trimmed(&draft.locations))?);
    active.notification_config = Set(serde_json::to_value(&draft.notification_config)?);
    if let Some(is_active) = req.is_active {
        active.is_active = Set(is_active);
    }
    active.updated_at = Set(Utc::now());
    Ok(active.update(db).await?)
}

pub async fn delete_monitor(
    db: &DatabaseConnection,
    user_id: i32,
    monitor_id: i32,
) -> Result<(), ServiceError> {
    let result = monitor::Entity::delete_many()
        .filter(monitor::Column::Id.eq(monitor_id))
        .filter(monitor::Column::UserId.eq(user_id))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!("Monitor {monitor_id}")));
    }
    Ok(())
}

pub async fn get_active_monitors(db: &DatabaseConnection) -> Result<Vec<monitor::Model>, DbErr> {
    monitor::Entity::find()
        .filter(monitor::Column::IsActive.eq(true))
        .order_by_asc(monitor::Column::Id)
        .all(db)
        .await
}

pub async fn get_monitor(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<Option<monitor::Model>, DbErr> {
    monitor::Entity::find_by_id(monitor_id).one(db).await
}

pub async fn update_monitor_status(
    db: &DatabaseConnection,
    monitor_id: i32,
    status: MonitorStatus,
    checked_at: DateTime<Utc>,
) -> Result<(), DbErr> {
    monitor::Entity::update_many()
        .col_expr(monitor::Column::Status, status.as_str().into())
        .col_expr(monitor::Column::LastCheckedAt, Some(checked_at).into())
        .filter(monitor::Column::Id.eq(monitor_id))
        .exec(db)
        .await?;
    Ok(())
}

fn trimmed(locations: &[String]) -> Vec<String> {
    locations.iter().map(|l| l.trim().to_string()).collect()
}
