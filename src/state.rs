//! Application state management
//! This module defines the state shared by the console and the command handlers.

use std::sync::Arc;

use log::info;
use tokio::sync::Mutex;

use crate::bus::Bus;
use crate::config::CentralConfig;
use crate::core::BluetoothManager;

/// Console application state
pub struct AppState {
    /// The Bluetooth manager instance
    pub bluetooth_manager: Arc<Mutex<BluetoothManager>>,
}

impl AppState {
    /// Creates a new AppState on top of `bus`
    pub fn new(bus: Arc<dyn Bus>, config: CentralConfig) -> Self {
        info!("Initializing BluetoothManager on {}...", config.adapter_path);
        let manager = BluetoothManager::new(bus, config);
        Self {
            bluetooth_manager: Arc::new(Mutex::new(manager)),
        }
    }

    /// Gets a reference to the Bluetooth manager
    pub fn get_bluetooth_manager_arc(&self) -> Arc<Mutex<BluetoothManager>> {
        self.bluetooth_manager.clone()
    }
}
