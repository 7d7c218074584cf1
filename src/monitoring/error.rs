use std::time::Duration;
use thiserror::Error;

use super::models::ProbeCause;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    Dns,
    ConnectionRefused,
    Tls,
    Other,
}

/// Everything that can go wrong while probing a target. Never escapes the
/// prober: it is always folded into a `down` check result.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("Network error ({kind:?}): {message}")]
    Network {
        kind: NetworkFailure,
        message: String,
    },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProbeError {
    pub fn network(kind: NetworkFailure, message: impl Into<String>) -> Self {
        ProbeError::Network {
            kind,
            message: message.into(),
        }
    }

    pub fn cause(&self) -> ProbeCause {
        match self {
            ProbeError::Timeout(_) => ProbeCause::Timeout,
            ProbeError::Network { kind, .. } => match kind {
                NetworkFailure::Dns => ProbeCause::DnsFailure,
                NetworkFailure::ConnectionRefused => ProbeCause::ConnectionRefused,
                NetworkFailure::Tls => ProbeCause::TlsError,
                NetworkFailure::Other => ProbeCause::NetworkError,
            },
            ProbeError::InvalidResponse(_) => ProbeCause::InvalidResponse,
        }
    }
}

/// A malformed monitor or channel definition, rejected before it is stored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {field}: {message}")]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl ConfigValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler is not running")]
    NotRunning,
    #[error("Scheduler command queue is closed")]
    QueueClosed,
}
