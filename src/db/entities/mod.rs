//! SeaORM entities for the monitoring tables.

pub mod alert_event;
pub mod check_result;
pub mod incident;
pub mod monitor;
pub mod notification_channel;

pub mod prelude {
    pub use super::alert_event::Entity as AlertEvent;
    pub use super::check_result::Entity as CheckResult;
    pub use super::incident::Entity as Incident;
    pub use super::monitor::Entity as Monitor;
    pub use super::notification_channel::Entity as NotificationChannel;
}
