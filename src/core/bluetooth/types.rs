//! Defines shared data structures for the Bluetooth module.

use std::collections::HashMap;

use log::info;
use uuid::Uuid;

use crate::core::bluetooth::constants::{UUID_LED_CHARACTERISTIC, UUID_TEMPERATURE};
use crate::core::gatt::CharacteristicFlags;

/// Connection lifecycle of a remote device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Discovered,
    Connecting,
    Connected,
    Disconnected,
}

/// Characteristics the central knows how to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownCharacteristic {
    /// Environmental Sensing temperature
    Temperature,
    /// Custom LED actuator
    Led,
}

impl KnownCharacteristic {
    pub const ALL: [KnownCharacteristic; 2] = [Self::Temperature, Self::Led];

    pub fn uuid(self) -> Uuid {
        match self {
            Self::Temperature => UUID_TEMPERATURE,
            Self::Led => UUID_LED_CHARACTERISTIC,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|known| known.uuid() == uuid)
    }
}

/// A remote characteristic bound to one of the known roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCharacteristic {
    pub kind: KnownCharacteristic,
    /// Object path of the characteristic
    pub path: String,
    /// Object path of the owning service
    pub service_path: String,
    /// Address of the device exposing it
    pub device_address: String,
    pub flags: CharacteristicFlags,
}

/// Binding of well-known UUIDs to resolved handles.
/// An absent entry means the characteristic has not been resolved yet.
#[derive(Debug, Default)]
pub struct ResolvedCharacteristicSet {
    entries: HashMap<KnownCharacteristic, ResolvedCharacteristic>,
}

impl ResolvedCharacteristicSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a characteristic, replacing any previous binding of the same kind.
    pub fn bind(&mut self, characteristic: ResolvedCharacteristic) -> Option<ResolvedCharacteristic> {
        if let Some(previous) = self.entries.get(&characteristic.kind) {
            if previous.device_address != characteristic.device_address {
                info!(
                    "{:?} rebound from {} to {}",
                    previous.kind, previous.device_address, characteristic.device_address
                );
            }
        }
        self.entries.insert(characteristic.kind, characteristic)
    }

    pub fn get(&self, kind: KnownCharacteristic) -> Option<&ResolvedCharacteristic> {
        self.entries.get(&kind)
    }

    pub fn get_by_uuid(&self, uuid: Uuid) -> Option<&ResolvedCharacteristic> {
        KnownCharacteristic::from_uuid(uuid).and_then(|kind| self.entries.get(&kind))
    }

    pub fn is_resolved(&self, uuid: Uuid) -> bool {
        self.get_by_uuid(uuid).is_some()
    }

    /// Drops every binding owned by `address`. Returns how many were dropped.
    pub fn release_device(&mut self, address: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, c| c.device_address != address);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of one resolution pass over a device's object tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    /// UUIDs of the services walked
    pub services: Vec<Uuid>,
    /// Known characteristics that were bound
    pub bound: Vec<KnownCharacteristic>,
    /// Characteristic UUIDs with no handler
    pub unrecognized: Vec<Uuid>,
}
