use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "check_results")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub monitor_id: i32,
    pub checked_at: ChronoDateTimeUtc,
    pub status: String,
    pub response_time_ms: i64,
    pub http_status_code: Option<i32>,
    pub ssl_valid: Option<bool>,
    pub ssl_days_until_expiry: Option<i64>,
    pub dns_ok: Option<bool>,
    pub cause: Option<String>,
    pub warning: Option<String>,
    pub location: Option<String>,
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
}

impl Related<super::monitor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Monitor.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
