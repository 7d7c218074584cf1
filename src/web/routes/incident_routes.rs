use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::db::services::{incident_service, monitor_service};
use crate::monitoring::models::Incident;
use crate::notifications::models::AlertEvent;
use crate::web::models::AuthenticatedUser;
use crate::web::models::alert_models::IncidentsQuery;
use crate::web::{AppError, AppState};

pub fn create_incident_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_incidents))
        .route("/{id}", get(get_incident))
        .route("/{id}/escalate", post(escalate_incident))
}

async fn list_incidents(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Query(query): Query<IncidentsQuery>,
) -> Result<Json<Vec<Incident>>, AppError> {
    let incidents =
        incident_service::get_incidents_for_user(&app_state.db, authenticated_user.id, query.status)
            .await?;
    Ok(Json(incidents))
}

async fn get_incident(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Incident>, AppError> {
    let incident =
        incident_service::get_incident_for_user(&app_state.db, authenticated_user.id, id).await?;
    Ok(Json(incident))
}

/// Re-alerts every enabled channel of the monitor about an open incident and
/// returns the resulting delivery records.
#[axum::debug_handler]
async fn escalate_incident(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AlertEvent>>, AppError> {
    let incident =
        incident_service::get_incident_for_user(&app_state.db, authenticated_user.id, id).await?;
    let model = monitor_service::get_monitor_by_id(
        &app_state.db,
        authenticated_user.id,
        incident.monitor_id,
    )
    .await?;
    let monitor = monitor_service::to_domain(model)?;

    let events = app_state.notifier.escalate(&monitor, &incident).await?;
    info!(incident_id = %id, user_id = authenticated_user.id, deliveries = events.len(), "Incident escalated by user.");
    Ok(Json(events))
}

#[cfg(test)]
mod tests {
    use crate::db::services::{channel_service, incident_service, monitor_service};
    use crate::monitoring::models::{
        ChannelSubscription, Incident, IncidentStatus, NotificationConfig, ProbeCause,
    };
    use crate::notifications::models::{ChannelConfig, CreateChannelRequest};
    use crate::web::AppState;
    use crate::web::models::monitor_models::CreateMonitorRequest;
    use crate::web::testing::*;
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use uuid::Uuid;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn monitor_with_hook(state: &Arc<AppState>, user_id: i32, hook_url: String) -> i32 {
        let channel = channel_service::create_channel(
            &state.db,
            &state.encryption,
            user_id,
            CreateChannelRequest {
                name: "hook".to_string(),
                config: ChannelConfig::Webhook {
                    url: hook_url,
                    method: "POST".to_string(),
                    headers: None,
                    body_template: None,
                },
                enabled: None,
            },
        )
        .await
        .unwrap();
        monitor_service::create_monitor(
            &state.db,
            user_id,
            CreateMonitorRequest {
                name: "api".to_string(),
                url: "https://api.example.com/health".to_string(),
                interval_seconds: 60,
                timeout_ms: None,
                locations: None,
                notification_config: Some(NotificationConfig {
                    channels: vec![ChannelSubscription::new(channel.id)],
                    failure_threshold: None,
                }),
                is_active: None,
            },
        )
        .await
        .unwrap()
        .id
    }

    fn incident(monitor_id: i32, status: IncidentStatus) -> Incident {
        let start = Utc::now() - Duration::minutes(30);
        Incident {
            id: Uuid::new_v4(),
            monitor_id,
            start_time: start,
            end_time: (status == IncidentStatus::Resolved).then(|| start + Duration::minutes(5)),
            status,
            cause: ProbeCause::ConnectionRefused,
            duration_seconds: (status == IncidentStatus::Resolved).then_some(300),
            failed_checks: 4,
            last_failure_at: start + Duration::minutes(4),
            last_response_time_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_list_and_filter_incidents() {
        let state = test_state().await;
        let monitor_id = monitor_with_hook(&state, 1, "https://hooks.example.com/x".to_string()).await;
        let open = incident(monitor_id, IncidentStatus::Open);
        let resolved = incident(monitor_id, IncidentStatus::Resolved);
        incident_service::save_incident(&state.db, &open).await.unwrap();
        incident_service::save_incident(&state.db, &resolved).await.unwrap();

        let response = send(&state, "GET", "/api/incidents", Some(1), None).await;
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);

        let response = send(&state, "GET", "/api/incidents?status=open", Some(1), None).await;
        let only_open = body_json(response).await;
        assert_eq!(only_open.as_array().unwrap().len(), 1);
        assert_eq!(only_open[0]["id"], open.id.to_string());

        let response = send(&state, "GET", "/api/incidents", Some(2), None).await;
        assert!(body_json(response).await.as_array().unwrap().is_empty());
        let response = send(&state, "GET", &format!("/api/incidents/{}", open.id), Some(2), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_escalation_notifies_each_channel_once_per_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let state = test_state().await;
        let monitor_id = monitor_with_hook(&state, 1, format!("{}/alert", server.uri())).await;
        let open = incident(monitor_id, IncidentStatus::Open);
        incident_service::save_incident(&state.db, &open).await.unwrap();

        let response = send(&state, "POST", &format!("/api/incidents/{}/escalate", open.id), Some(1), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let events = body_json(response).await;
        assert_eq!(events.as_array().unwrap().len(), 1);
        assert_eq!(events[0]["kind"], "escalated");
        assert_eq!(events[0]["deliveryStatus"], "sent");

        let response = send(&state, "GET", "/api/alerts/events", Some(1), None).await;
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolved_incident_cannot_be_escalated() {
        let state = test_state().await;
        let monitor_id = monitor_with_hook(&state, 1, "https://hooks.example.com/x".to_string()).await;
        let resolved = incident(monitor_id, IncidentStatus::Resolved);
        incident_service::save_incident(&state.db, &resolved).await.unwrap();

        let response = send(&state, "POST", &format!("/api/incidents/{}/escalate", resolved.id), Some(1), None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
