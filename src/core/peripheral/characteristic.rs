//! Local GATT objects served by the peripheral role.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::bus::ReqError;
use crate::core::gatt::CharacteristicFlags;

/// Characteristic that answers `ReadValue`.
pub trait Readable: Send + Sync {
    fn read_value(&self) -> Result<Vec<u8>, ReqError>;
}

/// Characteristic that answers `WriteValue`.
pub trait Writable: Send + Sync {
    fn write_value(&self, value: &[u8]) -> Result<(), ReqError>;
}

/// Characteristic that can push value updates to a subscriber.
/// Both calls are idempotent.
pub trait Notifiable: Send + Sync {
    fn start_notify(&self);
    fn stop_notify(&self);
    fn is_notifying(&self) -> bool;
}

/// A value pushed by a notifying characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChanged {
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

/// Sending half of an application's value-update channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<ValueChanged>,
}

impl Notifier {
    pub fn new(tx: broadcast::Sender<ValueChanged>) -> Self {
        Self { tx }
    }

    pub fn notify(&self, characteristic: Uuid, value: Vec<u8>) {
        // nobody listening is not an error
        let _ = self.tx.send(ValueChanged { characteristic, value });
    }
}

/// A characteristic assembled from optional capabilities.
/// A missing capability answers with `NotSupported`.
#[derive(Clone)]
pub struct LocalCharacteristic {
    pub uuid: Uuid,
    read: Option<Arc<dyn Readable>>,
    write: Option<Arc<dyn Writable>>,
    notify: Option<Arc<dyn Notifiable>>,
}

impl LocalCharacteristic {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            read: None,
            write: None,
            notify: None,
        }
    }

    pub fn with_read(mut self, read: Arc<dyn Readable>) -> Self {
        self.read = Some(read);
        self
    }

    pub fn with_write(mut self, write: Arc<dyn Writable>) -> Self {
        self.write = Some(write);
        self
    }

    pub fn with_notify(mut self, notify: Arc<dyn Notifiable>) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn flags(&self) -> CharacteristicFlags {
        CharacteristicFlags {
            read: self.read.is_some(),
            write: self.write.is_some(),
            notify: self.notify.is_some(),
        }
    }

    pub fn read_value(&self) -> Result<Vec<u8>, ReqError> {
        match &self.read {
            Some(read) => read.read_value(),
            None => Err(ReqError::NotSupported),
        }
    }

    pub fn write_value(&self, value: &[u8]) -> Result<(), ReqError> {
        match &self.write {
            Some(write) => write.write_value(value),
            None => Err(ReqError::NotSupported),
        }
    }

    pub fn start_notify(&self) -> Result<(), ReqError> {
        let notify = self.notify.as_ref().ok_or(ReqError::NotSupported)?;
        notify.start_notify();
        Ok(())
    }

    pub fn stop_notify(&self) -> Result<(), ReqError> {
        let notify = self.notify.as_ref().ok_or(ReqError::NotSupported)?;
        notify.stop_notify();
        Ok(())
    }

    pub fn is_notifying(&self) -> bool {
        self.notify.as_ref().is_some_and(|n| n.is_notifying())
    }
}

impl fmt::Debug for LocalCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCharacteristic")
            .field("uuid", &self.uuid)
            .field("flags", &self.flags())
            .finish()
    }
}

/// A primary or secondary service and its characteristics, in export order.
#[derive(Debug, Clone)]
pub struct LocalService {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<LocalCharacteristic>,
}

impl LocalService {
    pub fn new(uuid: Uuid, primary: bool) -> Self {
        Self {
            uuid,
            primary,
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristic(mut self, characteristic: LocalCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }
}
