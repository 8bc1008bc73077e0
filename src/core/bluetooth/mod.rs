//! Central role of the GATT session engine
//! This module handles discovery, device tracking, connections, service
//! resolution and characteristic access on remote peripherals.

pub mod access;
pub mod connection;
pub mod constants;
pub mod device;
pub mod error;
pub mod manager;
pub mod notification;
pub mod resolver;
pub mod scanner;
pub mod types;

// Re-export types that should be publicly accessible
pub use access::CharacteristicAccess;
pub use connection::ConnectionManager;
pub use constants::*; // Re-export all constants
pub use device::{DeviceRecord, DeviceRegistry, Merge, device_path};
pub use error::GattError;
pub use manager::BluetoothManager;
pub use notification::NotificationHandler;
pub use resolver::GattResolver;
pub use scanner::{DiscoveryController, EventHandler};
pub use types::{
    ConnectionState, KnownCharacteristic, ResolutionReport, ResolvedCharacteristic,
    ResolvedCharacteristicSet,
};
