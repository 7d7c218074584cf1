use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_channels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub channel_type: String, // e.g., "email", "webhook"
    pub enabled: bool,
    pub config: Vec<u8>, // Encrypted JSON blob
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::alert_event::Entity")]
    AlertEvent,
}

impl Related<super::alert_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AlertEvent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
