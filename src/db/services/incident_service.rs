use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Condition, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    RelationTrait, Set,
};
use sea_orm::JoinType;
use uuid::Uuid;

use super::{ServiceError, signed, unsigned};
use crate::db::entities::{incident, monitor};
use crate::monitoring::models::{Incident, IncidentStatus, ProbeCause};
use crate::monitoring::store::StoreError;

/// Inserts the incident, or overwrites every mutable column of the stored copy.
pub async fn save_incident(db: &DatabaseConnection, incident: &Incident) -> Result<(), StoreError> {
    let row = incident::ActiveModel {
        id: Set(incident.id),
        monitor_id: Set(incident.monitor_id),
        start_time: Set(incident.start_time),
        end_time: Set(incident.end_time),
        status: Set(incident.status.as_str().to_string()),
        cause: Set(incident.cause.as_str().to_string()),
        duration_seconds: Set(incident.duration_seconds),
        failed_checks: Set(i32::try_from(incident.failed_checks).unwrap_or(i32::MAX)),
        last_failure_at: Set(incident.last_failure_at),
        last_response_time_ms: Set(signed(incident.last_response_time_ms)),
    };
    incident::Entity::insert(row)
        .on_conflict(
            OnConflict::column(incident::Column::Id)
                .update_columns([
                    incident::Column::EndTime,
                    incident::Column::Status,
                    incident::Column::DurationSeconds,
                    incident::Column::FailedChecks,
                    incident::Column::LastFailureAt,
                    incident::Column::LastResponseTimeMs,
                ])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

pub async fn get_incident(db: &DatabaseConnection, id: Uuid) -> Result<Option<Incident>, StoreError> {
    incident::Entity::find_by_id(id)
        .one(db)
        .await?
        .map(to_domain)
        .transpose()
}

pub async fn get_open_incidents(db: &DatabaseConnection) -> Result<Vec<Incident>, StoreError> {
    let rows = incident::Entity::find()
        .filter(incident::Column::Status.eq(IncidentStatus::Open.as_str()))
        .order_by_asc(incident::Column::StartTime)
        .all(db)
        .await?;
    rows.into_iter().map(to_domain).collect()
}

/// Newest first.
pub async fn get_incidents_for_monitor(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<Vec<Incident>, StoreError> {
    let rows = incident::Entity::find()
        .filter(incident::Column::MonitorId.eq(monitor_id))
        .order_by_desc(incident::Column::StartTime)
        .all(db)
        .await?;
    rows.into_iter().map(to_domain).collect()
}

/// Incidents of a monitor that were still open at or after `since`, oldest first.
pub async fn get_incidents_overlapping(
    db: &DatabaseConnection,
    monitor_id: i32,
    since: DateTime<Utc>,
) -> Result<Vec<Incident>, StoreError> {
    let rows = incident::Entity::find()
        .filter(incident::Column::MonitorId.eq(monitor_id))
        .filter(
            Condition::any()
                .add(incident::Column::EndTime.is_null())
                .add(incident::Column::EndTime.gte(since)),
        )
        .order_by_asc(incident::Column::StartTime)
        .all(db)
        .await?;
    rows.into_iter().map(to_domain).collect()
}

/// Every incident on the user's monitors, newest first, optionally by status.
pub async fn get_incidents_for_user(
    db: &DatabaseConnection,
    user_id: i32,
    status: Option<IncidentStatus>,
) -> Result<Vec<Incident>, StoreError> {
    let mut query = incident::Entity::find()
        .join(JoinType::InnerJoin, incident::Relation::Monitor.def())
        .filter(monitor::Column::UserId.eq(user_id));
    if let Some(status) = status {
        query = query.filter(incident::Column::Status.eq(status.as_str()));
    }
    let rows = query
        .order_by_desc(incident::Column::StartTime)
        .all(db)
        .await?;
    rows.into_iter().map(to_domain).collect()
}

pub async fn get_incident_for_user(
    db: &DatabaseConnection,
    user_id: i32,
    id: Uuid,
) -> Result<Incident, ServiceError> {
    let row = incident::Entity::find_by_id(id)
        .join(JoinType::InnerJoin, incident::Relation::Monitor.def())
        .filter(monitor::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Incident {id}")))?;
    Ok(to_domain(row)?)
}

pub fn to_domain(model: incident::Model) -> Result<Incident, StoreError> {
    Ok(Incident {
        id: model.id,
        monitor_id: model.monitor_id,
        start_time: model.start_time,
        end_time: model.end_time,
        status: model.status.parse::<IncidentStatus>().map_err(StoreError::Corrupt)?,
        cause: model.cause.parse::<ProbeCause>().map_err(StoreError::Corrupt)?,
        duration_seconds: model.duration_seconds,
        failed_checks: u32::try_from(model.failed_checks).unwrap_or(0),
        last_failure_at: model.last_failure_at,
        last_response_time_ms: unsigned(model.last_response_time_ms),
    })
}
