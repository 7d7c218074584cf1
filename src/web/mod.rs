//! HTTP API: monitor registry, notification channels, incidents and the alert
//! audit trail. Everything except `/api/health` requires a JWT.

use axum::{Router, http::Method, middleware as axum_middleware, routing::get};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::monitoring::incident::IncidentTracker;
use crate::monitoring::scheduler::Scheduler;
use crate::notifications::encryption::EncryptionService;
use crate::notifications::service::Notifier;
use crate::server::config::ServerConfig;

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;

pub use error::AppError;
use middleware::auth;
use routes::{alert_routes, incident_routes, monitor_routes, notification_routes};

pub struct AppState {
    pub db: DatabaseConnection,
    pub encryption: Arc<EncryptionService>,
    pub scheduler: Arc<Scheduler>,
    pub tracker: Arc<IncidentTracker>,
    pub notifier: Arc<Notifier>,
    pub config: Arc<ServerConfig>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let authenticated = || axum_middleware::from_fn_with_state(app_state.clone(), auth::auth);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .nest(
            "/api/monitors",
            monitor_routes::create_monitor_router().route_layer(authenticated()),
        )
        .nest(
            "/api/notifications",
            notification_routes::create_notification_router().route_layer(authenticated()),
        )
        .nest(
            "/api/incidents",
            incident_routes::create_incident_router().route_layer(authenticated()),
        )
        .nest(
            "/api/alerts",
            alert_routes::create_alert_router().route_layer(authenticated()),
        )
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
