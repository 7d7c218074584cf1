pub mod alert_routes;
pub mod incident_routes;
pub mod monitor_routes;
pub mod notification_routes;
