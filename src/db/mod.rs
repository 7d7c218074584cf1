//! Persistence: sea-orm entities, query services and the [`store::DbStore`]
//! the monitoring pipeline runs against.

pub mod entities;
pub mod services;
pub mod store;

use sea_orm::sea_query::Index;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use std::time::Duration;
use tracing::info;

use entities::{alert_event, check_result, incident, monitor, notification_channel};

pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url.to_owned());
    opt.max_connections(10)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    Database::connect(opt).await
}

/// Creates every table and index that does not exist yet.
pub async fn init_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    // Parents before children so foreign keys resolve.
    let mut tables = vec![
        schema.create_table_from_entity(monitor::Entity),
        schema.create_table_from_entity(notification_channel::Entity),
        schema.create_table_from_entity(check_result::Entity),
        schema.create_table_from_entity(incident::Entity),
        schema.create_table_from_entity(alert_event::Entity),
    ];
    for table in tables.iter_mut() {
        table.if_not_exists();
        db.execute(backend.build(&*table)).await?;
    }

    let indexes = [
        Index::create()
            .name("idx_check_results_monitor_time")
            .table(check_result::Entity)
            .col(check_result::Column::MonitorId)
            .col(check_result::Column::CheckedAt)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_incidents_monitor_status")
            .table(incident::Entity)
            .col(incident::Column::MonitorId)
            .col(incident::Column::Status)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_alert_events_incident")
            .table(alert_event::Entity)
            .col(alert_event::Column::IncidentId)
            .if_not_exists()
            .to_owned(),
    ];
    for index in &indexes {
        db.execute(backend.build(index)).await?;
    }

    info!("Database schema is up to date.");
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A fresh in-memory SQLite database with the schema applied. A single
    /// connection keeps every query on the same in-memory database.
    pub async fn memory_db() -> DatabaseConnection {
        let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
        opt.max_connections(1).min_connections(1).sqlx_logging(false);
        let db = Database::connect(opt).await.unwrap();
        init_schema(&db).await.unwrap();
        db
    }
}
