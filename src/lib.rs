//! BLE GATT bridge library
//! Central and peripheral GATT sessions over a pluggable object bus.

pub mod bus;
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;

#[cfg(feature = "bluez")]
pub mod backend;
