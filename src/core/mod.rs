//! Core functionality of the BLE GATT bridge
//! This module contains the central session engine, the simulated
//! peripheral and the GATT value types they share.

pub mod bluetooth;
pub mod gatt;
pub mod peripheral;

// Re-export commonly used types
pub use bluetooth::BluetoothManager;
pub use peripheral::PeripheralSimulator;
