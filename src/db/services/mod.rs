//! Query services over the monitoring tables. Each sub-module owns one table;
//! HTTP handlers and [`crate::db::store::DbStore`] go through these functions
//! rather than touching entities directly.

use sea_orm::DbErr;
use thiserror::Error;

use crate::monitoring::error::ConfigValidationError;
use crate::monitoring::store::StoreError;
use crate::notifications::encryption::EncryptionError;

pub mod alert_event_service;
pub mod channel_service;
pub mod check_result_service;
pub mod incident_service;
pub mod monitor_service;
pub mod timeline_service;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Export failed: {0}")]
    Export(String),
}

impl From<DbErr> for ServiceError {
    fn from(err: DbErr) -> Self {
        ServiceError::Store(StoreError::Database(err))
    }
}

impl From<EncryptionError> for ServiceError {
    fn from(err: EncryptionError) -> Self {
        ServiceError::Store(StoreError::Encryption(err))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Store(StoreError::Serialization(err))
    }
}

/// Stored integers are signed; negative values are treated as zero.
pub(crate) fn unsigned(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

pub(crate) fn signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
