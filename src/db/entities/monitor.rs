use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "monitors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub url: String,
    pub interval_seconds: i32,
    pub timeout_ms: Option<i64>,
    #[sea_orm(column_type = "Json")]
    pub locations: Json,
    #[sea_orm(column_type = "Json")]
    pub notification_config: Json,
    pub status: String, // "up", "down" or "unknown"
    pub is_active: bool,
    pub last_checked_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::check_result::Entity")]
    CheckResult,
    #[sea_orm(has_many = "super::incident::Entity")]
    Incident,
}

impl Related<super::check_result::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CheckResult.def()
    }
}

impl Related<super::incident::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Incident.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
