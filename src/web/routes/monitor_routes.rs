use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::db::services::{
    check_result_service, incident_service, monitor_service, timeline_service,
};
use crate::monitoring::models::{CheckResult, Incident};
use crate::web::models::AuthenticatedUser;
use crate::web::models::monitor_models::{
    CreateMonitorRequest, MonitorResponse, ResultsQuery, TimelineQuery, UpdateMonitorRequest,
};
use crate::web::{AppError, AppState};

pub fn create_monitor_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_monitors).post(create_monitor))
        .route(
            "/{id}",
            get(get_monitor).put(update_monitor).delete(delete_monitor),
        )
        .route("/{id}/check", post(check_now))
        .route("/{id}/results", get(get_monitor_results))
        .route("/{id}/incidents", get(get_monitor_incidents))
        .route("/{id}/timeline", get(export_timeline))
}

async fn list_monitors(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<MonitorResponse>>, AppError> {
    let monitors = monitor_service::get_monitors_by_user_id(&app_state.db, authenticated_user.id)
        .await?
        .into_iter()
        .map(monitor_service::to_response)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(monitors))
}

#[axum::debug_handler]
async fn create_monitor(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateMonitorRequest>,
) -> Result<(StatusCode, Json<MonitorResponse>), AppError> {
    let created =
        monitor_service::create_monitor(&app_state.db, authenticated_user.id, payload).await?;
    info!(monitor_id = created.id, user_id = authenticated_user.id, "Monitor created.");
    Ok((StatusCode::CREATED, Json(monitor_service::to_response(created)?)))
}

async fn get_monitor(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<MonitorResponse>, AppError> {
    let monitor = monitor_service::get_monitor_by_id(&app_state.db, authenticated_user.id, id).await?;
    Ok(Json(monitor_service::to_response(monitor)?))
}

#[axum::debug_handler]
async fn update_monitor(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateMonitorRequest>,
) -> Result<Json<MonitorResponse>, AppError> {
    let updated =
        monitor_service::update_monitor(&app_state.db, authenticated_user.id, id, payload).await?;
    Ok(Json(monitor_service::to_response(updated)?))
}

async fn delete_monitor(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    monitor_service::delete_monitor(&app_state.db, authenticated_user.id, id).await?;
    app_state.tracker.forget(id);
    info!(monitor_id = id, user_id = authenticated_user.id, "Monitor deleted.");
    Ok(StatusCode::NO_CONTENT)
}

/// Queues an immediate out-of-schedule check.
async fn check_now(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    monitor_service::get_monitor_by_id(&app_state.db, authenticated_user.id, id).await?;
    app_state.scheduler.schedule_now(id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"message": "Check scheduled."})),
    ))
}

async fn get_monitor_results(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<Vec<CheckResult>>, AppError> {
    monitor_service::get_monitor_by_id(&app_state.db, authenticated_user.id, id).await?;
    let results = check_result_service::get_recent_results(&app_state.db, id, query.limit).await?;
    Ok(Json(results))
}

async fn get_monitor_incidents(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<Incident>>, AppError> {
    monitor_service::get_monitor_by_id(&app_state.db, authenticated_user.id, id).await?;
    let incidents = incident_service::get_incidents_for_monitor(&app_state.db, id).await?;
    Ok(Json(incidents))
}

async fn export_timeline(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i32>,
    Query(query): Query<TimelineQuery>,
) -> Result<impl IntoResponse, AppError> {
    monitor_service::get_monitor_by_id(&app_state.db, authenticated_user.id, id).await?;
    let csv = timeline_service::export_timeline_csv(&app_state.db, id, query.days, Utc::now()).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"monitor-{id}-timeline.csv\""),
            ),
        ],
        csv,
    ))
}
