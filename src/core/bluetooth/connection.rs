//! Bluetooth connection handling
//! This module handles connecting to and disconnecting from remote devices
//! by address, and resolving their characteristics once connected.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};

use crate::bus::{Bus, BusError, MethodCall};
use crate::core::bluetooth::device::{DeviceRegistry, device_path, is_valid_address};
use crate::core::bluetooth::error::GattError;
use crate::core::bluetooth::resolver::GattResolver;
use crate::core::bluetooth::types::{ConnectionState, ResolutionReport, ResolvedCharacteristicSet};

/// In-flight marker of one connect attempt. Cleared on drop; an attempt
/// dropped before completing puts the device back to Discovered.
struct InFlight {
    registry: Arc<Mutex<DeviceRegistry>>,
    address: String,
    completed: bool,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap();
        if !self.completed {
            warn!("Connect to {} abandoned", self.address);
            registry.set_state(&self.address, ConnectionState::Discovered);
        }
        registry.finish_connect(&self.address);
    }
}

/// Connection manager for remote devices
#[derive(Clone)]
pub struct ConnectionManager {
    bus: Arc<dyn Bus>,
    adapter_path: String,
    registry: Arc<Mutex<DeviceRegistry>>,
    resolved: Arc<Mutex<ResolvedCharacteristicSet>>,
    resolver: GattResolver,
    max_retries: u32,
    retry_delay: u64,
}

impl ConnectionManager {
    pub fn new(
        bus: Arc<dyn Bus>,
        adapter_path: impl Into<String>,
        registry: Arc<Mutex<DeviceRegistry>>,
        resolved: Arc<Mutex<ResolvedCharacteristicSet>>,
        max_retries: u32,
        retry_delay: u64,
    ) -> Self {
        Self {
            resolver: GattResolver::new(bus.clone(), resolved.clone()),
            bus,
            adapter_path: adapter_path.into(),
            registry,
            resolved,
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    /// Connects to `address` and resolves its characteristics.
    /// On failure the device goes back to Discovered and stays registered,
    /// so the connect can be retried.
    pub async fn connect(&self, address: &str) -> Result<ResolutionReport, GattError> {
        if !is_valid_address(address) {
            return Err(GattError::InvalidAddress(address.to_string()));
        }
        if !self.registry.lock().unwrap().begin_connect(address) {
            warn!("Connection to {} already in progress", address);
            return Err(GattError::ConnectInProgress(address.to_string()));
        }

        let mut in_flight = InFlight {
            registry: self.registry.clone(),
            address: address.to_string(),
            completed: false,
        };
        let result = self.connect_and_resolve(address).await;

        {
            let mut registry = self.registry.lock().unwrap();
            match &result {
                Ok(report) => {
                    registry.set_state(address, ConnectionState::Connected);
                    info!(
                        "Connected to {}: {} service(s), {} characteristic(s) bound",
                        address,
                        report.services.len(),
                        report.bound.len()
                    );
                }
                Err(e) => {
                    registry.set_state(address, ConnectionState::Discovered);
                    error!("Failed to connect to {}: {}", address, e);
                }
            }
        }
        in_flight.completed = true;
        result
    }

    async fn connect_and_resolve(&self, address: &str) -> Result<ResolutionReport, GattError> {
        let path = device_path(&self.adapter_path, address);
        let already_connected = {
            let mut registry = self.registry.lock().unwrap();
            let connected = registry.state(address) == Some(ConnectionState::Connected);
            if !connected {
                registry.set_state(address, ConnectionState::Connecting);
            }
            connected
        };

        if already_connected {
            info!("Device {} already connected, refreshing characteristics", address);
        } else {
            info!("Initiating connection to {}...", address);
            self.connect_with_retry(&path).await?;
        }
        info!("Connection successful, discovering services...");
        self.resolver.resolve(address, &path).await
    }

    /// Invokes `Connect` on `path`, retrying with exponential backoff.
    async fn connect_with_retry(&self, path: &str) -> Result<(), BusError> {
        let mut retry_count = 0;
        let mut delay = self.retry_delay;

        loop {
            match self.bus.call(path, MethodCall::Connect).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", retry_count + 1, e);
                    retry_count += 1;
                    if retry_count >= self.max_retries {
                        return Err(e);
                    }
                    info!("Retrying connection in {} ms...", delay);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }

    /// Disconnects from `address`. On success the address leaves the active
    /// list and its resolved characteristics are released; on failure
    /// nothing changes.
    pub async fn disconnect(&self, address: &str) -> Result<(), GattError> {
        if !is_valid_address(address) {
            return Err(GattError::InvalidAddress(address.to_string()));
        }
        let path = device_path(&self.adapter_path, address);

        info!("Disconnecting from {}...", address);
        self.bus
            .call(&path, MethodCall::Disconnect)
            .await
            .inspect_err(|e| error!("Failed to disconnect {}: {}", address, e))?;

        self.registry.lock().unwrap().remove_address(address);
        let released = self.resolved.lock().unwrap().release_device(address);
        self.registry
            .lock()
            .unwrap()
            .set_state(address, ConnectionState::Disconnected);
        info!("Disconnected from {}, released {} characteristic(s)", address, released);
        Ok(())
    }

    /// Connects to every known address, in discovery order.
    pub async fn connect_all(&self) -> Vec<(String, Result<ResolutionReport, GattError>)> {
        let addresses = self.registry.lock().unwrap().addresses();
        let mut results = Vec::with_capacity(addresses.len());
        for address in addresses {
            let result = self.connect(&address).await;
            results.push((address, result));
        }
        results
    }

    /// Disconnects every known address.
    pub async fn disconnect_all(&self) -> Vec<(String, Result<(), GattError>)> {
        let addresses = self.registry.lock().unwrap().addresses();
        let mut results = Vec::with_capacity(addresses.len());
        for address in addresses {
            let result = self.disconnect(&address).await;
            results.push((address, result));
        }
        results
    }
}
