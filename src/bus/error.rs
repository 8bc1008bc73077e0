//! Errors crossing the object-broker seam.

use thiserror::Error;

/// Rejection a local GATT object returns to a remote caller.
/// Each variant carries the BlueZ error name it is reported as.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReqError {
    #[error("org.freedesktop.DBus.Error.InvalidArgs")]
    InvalidArgs,
    #[error("org.bluez.Error.NotSupported")]
    NotSupported,
    #[error("org.bluez.Error.NotPermitted")]
    NotPermitted,
    #[error("org.bluez.Error.InvalidValueLength")]
    InvalidValueLength,
    #[error("org.bluez.Error.Failed: {0}")]
    Failed(String),
}

impl ReqError {
    /// The error name as it would appear on the bus.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidArgs => "org.freedesktop.DBus.Error.InvalidArgs",
            Self::NotSupported => "org.bluez.Error.NotSupported",
            Self::NotPermitted => "org.bluez.Error.NotPermitted",
            Self::InvalidValueLength => "org.bluez.Error.InvalidValueLength",
            Self::Failed(_) => "org.bluez.Error.Failed",
        }
    }
}

/// Failure of a remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("no object at {0}")]
    UnknownObject(String),
    #[error("{method} is not implemented by {path}")]
    UnknownMethod { path: String, method: &'static str },
    #[error("remote object rejected the call: {0}")]
    Rejected(#[from] ReqError),
    #[error("transport failure: {0}")]
    Transport(String),
}
