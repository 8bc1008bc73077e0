//! Errors surfaced by the central session engine.

use thiserror::Error;
use uuid::Uuid;

use crate::bus::{BusError, ReqError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GattError {
    #[error("characteristic {0} is not resolved")]
    NotResolved(Uuid),
    #[error("remote call failed: {0}")]
    Transport(#[source] BusError),
    #[error("invalid value length")]
    InvalidValueLength,
    #[error("operation not supported")]
    NotSupported,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("operation failed: {0}")]
    Failed(String),
    #[error("unrecognized characteristic: {0}")]
    UnrecognizedCharacteristic(Uuid),
    #[error("invalid device address: {0}")]
    InvalidAddress(String),
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("a connection to {0} is already in progress")]
    ConnectInProgress(String),
}

impl From<BusError> for GattError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Rejected(ReqError::InvalidValueLength) => Self::InvalidValueLength,
            BusError::Rejected(ReqError::NotSupported) => Self::NotSupported,
            BusError::Rejected(ReqError::NotPermitted) => Self::NotPermitted,
            BusError::Rejected(ReqError::Failed(reason)) => Self::Failed(reason),
            other => Self::Transport(other),
        }
    }
}
