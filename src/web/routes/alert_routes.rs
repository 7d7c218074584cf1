use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    routing::get,
};
use std::sync::Arc;

use crate::db::services::alert_event_service;
use crate::notifications::models::AlertEvent;
use crate::web::models::AuthenticatedUser;
use crate::web::models::alert_models::AlertEventsQuery;
use crate::web::{AppError, AppState};

pub fn create_alert_router() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(list_alert_events))
}

/// Delivery audit trail for the caller's channels, failed deliveries included.
async fn list_alert_events(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Query(query): Query<AlertEventsQuery>,
) -> Result<Json<Vec<AlertEvent>>, AppError> {
    let events = alert_event_service::get_alert_events_for_user(
        &app_state.db,
        authenticated_user.id,
        query.status,
    )
    .await?;
    Ok(Json(events))
}
