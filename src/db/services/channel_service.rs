//! Notification channel CRUD. Channel configs are encrypted at rest.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::collections::HashSet;

use super::ServiceError;
use crate::db::entities::notification_channel;
use crate::monitoring::error::ConfigValidationError;
use crate::monitoring::store::StoreError;
use crate::notifications::encryption::EncryptionService;
use crate::notifications::models::{
    ChannelConfig, CreateChannelRequest, NotificationChannel, UpdateChannelRequest,
};

/// Decrypts a stored channel into its domain form.
pub fn to_domain(
    encryption: &EncryptionService,
    model: notification_channel::Model,
) -> Result<NotificationChannel, StoreError> {
    let decrypted = encryption.decrypt(&model.config)?;
    let config: ChannelConfig = serde_json::from_slice(&decrypted)?;
    if config.channel_type().as_str() != model.channel_type {
        return Err(StoreError::Corrupt(format!(
            "channel {} is stored as '{}' but its config is '{}'",
            model.id,
            model.channel_type,
            config.channel_type()
        )));
    }
    Ok(NotificationChannel {
        id: model.id,
        user_id: model.user_id,
        name: model.name,
        enabled: model.enabled,
        config,
    })
}

pub async fn create_channel(
    db: &DatabaseConnection,
    encryption: &EncryptionService,
    user_id: i32,
    req: CreateChannelRequest,
) -> Result<NotificationChannel, ServiceError> {
    validate_name(&req.name)?;
    req.config.validate()?;

    let now = Utc::now();
    let encrypted_config = encryption.encrypt(&serde_json::to_vec(&req.config)?)?;
    let channel = notification_channel::ActiveModel {
        user_id: Set(user_id),
        name: Set(req.name.trim().to_string()),
        channel_type: Set(req.config.channel_type().as_str().to_string()),
        enabled: Set(req.enabled.unwrap_or(true)),
        config: Set(encrypted_config),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let saved = channel.insert(db).await?;
    Ok(to_domain(encryption, saved)?)
}

pub async fn get_all_channels_for_user(
    db: &DatabaseConnection,
    encryption: &EncryptionService,
    user_id: i32,
) -> Result<Vec<NotificationChannel>, ServiceError> {
    let models = notification_channel::Entity::find()
        .filter(notification_channel::Column::UserId.eq(user_id))
        .order_by_asc(notification_channel::Column::Id)
        .all(db)
        .await?;
    models
        .into_iter()
        .map(|m| to_domain(encryption, m).map_err(ServiceError::from))
        .collect()
}

pub async fn get_channel_by_id(
    db: &DatabaseConnection,
    encryption: &EncryptionService,
    user_id: i32,
    channel_id: i32,
) -> Result<NotificationChannel, ServiceError> {
    let model = find_owned(db, user_id, channel_id).await?;
    Ok(to_domain(encryption, model)?)
}

pub async fn update_channel(
    db: &DatabaseConnection,
    encryption: &EncryptionService,
    user_id: i32,
    channel_id: i32,
    req: UpdateChannelRequest,
) -> Result<NotificationChannel, ServiceError> {
    let existing = find_owned(db, user_id, channel_id).await?;
    let mut channel: notification_channel::ActiveModel = existing.into();

    if let Some(name) = req.name {
        validate_name(&name)?;
        channel.name = Set(name.trim().to_string());
    }
    if let Some(config) = req.config {
        config.validate()?;
        channel.channel_type = Set(config.channel_type().as_str().to_string());
        channel.config = Set(encryption.encrypt(&serde_json::to_vec(&config)?)?);
    }
    if let Some(enabled) = req.enabled {
        channel.enabled = Set(enabled);
    }
    channel.updated_at = Set(Utc::now());

    let updated = channel.update(db).await?;
    Ok(to_domain(encryption, updated)?)
}

pub async fn delete_channel(
    db: &DatabaseConnection,
    user_id: i32,
    channel_id: i32,
) -> Result<(), ServiceError> {
    let result = notification_channel::Entity::delete_many()
        .filter(notification_channel::Column::Id.eq(channel_id))
        .filter(notification_channel::Column::UserId.eq(user_id))
        .exec(db)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!("Channel {channel_id}")));
    }
    Ok(())
}

/// The subset of `channel_ids` that exists and belongs to `user_id`.
pub async fn owned_channel_ids(
    db: &DatabaseConnection,
    user_id: i32,
    channel_ids: &[i32],
) -> Result<HashSet<i32>, DbErr> {
    if channel_ids.is_empty() {
        return Ok(HashSet::new());
    }
    let models = notification_channel::Entity::find()
        .filter(notification_channel::Column::UserId.eq(user_id))
        .filter(notification_channel::Column::Id.is_in(channel_ids.to_vec()))
        .all(db)
        .await?;
    Ok(models.into_iter().map(|m| m.id).collect())
}

/// Raw rows for the given ids owned by `user_id`, still encrypted.
pub async fn get_channel_models(
    db: &DatabaseConnection,
    user_id: i32,
    channel_ids: &[i32],
) -> Result<Vec<notification_channel::Model>, DbErr> {
    if channel_ids.is_empty() {
        return Ok(Vec::new());
    }
    notification_channel::Entity::find()
        .filter(notification_channel::Column::UserId.eq(user_id))
        .filter(notification_channel::Column::Id.is_in(channel_ids.to_vec()))
        .all(db)
        .await
}

async fn find_owned(
    db: &DatabaseConnection,
    user_id: i32,
    channel_id: i32,
) -> Result<notification_channel::Model, ServiceError> {
    notification_channel::Entity::find_by_id(channel_id)
        .filter(notification_channel::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Channel {channel_id}")))
}

fn validate_name(name: &str) -> Result<(), ServiceError> {
    if name.trim().is_empty() {
        return Err(ConfigValidationError::new("name", "must not be empty").into());
    }
    Ok(())
}
