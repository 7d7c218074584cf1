use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "incidents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub monitor_id: i32,
    pub start_time: ChronoDateTimeUtc,
    pub end_time: Option<ChronoDateTimeUtc>,
    pub status: String, // "open" or "resolved"
    pub cause: String,
    pub duration_seconds: Option<i64>,
    pub failed_checks: i32,
    pub last_failure_at: ChronoDateTimeUtc,
    pub last_response_time_ms: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::monitor::Entity",
        from = "Column::MonitorId",
        to = "super::monitor::Column::Id",
        on_delete = "Cascade"
    )]
    Monitor,
    #[sea_orm(has_many = "super::alert_event::Entity")]
    AlertEvent,
}

impl Related<super::monitor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Monitor.def()
    }
}

impl Related<super::alert_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AlertEvent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
