use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, JoinType, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, Set,
};

use crate::db::entities::{alert_event, incident, notification_channel};
use crate::monitoring::models::IncidentStatus;
use crate::monitoring::store::StoreError;
use crate::notifications::models::{AlertEvent, AlertKind, DeliveryStatus};

pub const MAX_EVENTS: u64 = 500;

pub async fn record_alert_event(db: &DatabaseConnection, event: &AlertEvent) -> Result<(), StoreError> {
    let row = alert_event::ActiveModel {
        id: Set(event.id),
        incident_id: Set(event.incident_id),
        channel_id: Set(event.channel_id),
        kind: Set(event.kind.as_str().to_string()),
        sent_at: Set(event.sent_at),
        delivery_status: Set(event.delivery_status.as_str().to_string()),
        attempts: Set(i32::try_from(event.attempts).unwrap_or(i32::MAX)),
        error: Set(event.error.clone()),
    };
    row.insert(db).await?;
    Ok(())
}

/// Audit trail for the user's channels, newest first.
pub async fn get_alert_events_for_user(
    db: &DatabaseConnection,
    user_id: i32,
    status: Option<DeliveryStatus>,
) -> Result<Vec<AlertEvent>, StoreError> {
    let mut query = alert_event::Entity::find()
        .join(JoinType::InnerJoin, alert_event::Relation::NotificationChannel.def())
        .filter(notification_channel::Column::UserId.eq(user_id));
    if let Some(status) = status {
        query = query.filter(alert_event::Column::DeliveryStatus.eq(status.as_str()));
    }
    let rows = query
        .order_by_desc(alert_event::Column::SentAt)
        .limit(MAX_EVENTS)
        .all(db)
        .await?;
    rows.into_iter().map(to_domain).collect()
}

/// Everything already sent (or attempted) for incidents that are still open.
pub async fn get_alert_events_for_open_incidents(
    db: &DatabaseConnection,
) -> Result<Vec<AlertEvent>, StoreError> {
    let rows = alert_event::Entity::find()
        .join(JoinType::InnerJoin, alert_event::Relation::Incident.def())
        .filter(incident::Column::Status.eq(IncidentStatus::Open.as_str()))
        .order_by_asc(alert_event::Column::SentAt)
        .all(db)
        .await?;
    rows.into_iter().map(to_domain).collect()
}

pub fn to_domain(model: alert_event::Model) -> Result<AlertEvent, StoreError> {
    Ok(AlertEvent {
        id: model.id,
        incident_id: model.incident_id,
        channel_id: model.channel_id,
        kind: model.kind.parse::<AlertKind>().map_err(StoreError::Corrupt)?,
        sent_at: model.sent_at,
        delivery_status: model
            .delivery_status
            .parse::<DeliveryStatus>()
            .map_err(StoreError::Corrupt)?,
        attempts: u32::try_from(model.attempts).unwrap_or(0),
        error: model.error,
    })
}
