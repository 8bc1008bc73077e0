//! Bluetooth manager for the central role
//! This module provides the main interface for central operations: it owns
//! the device registry and the resolved characteristics, and wires the
//! discovery event pump to the connection manager.

use std::sync::{Arc, Mutex};

use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{Bus, DEVICE_INTERFACE, PropertiesChanged};
use crate::config::CentralConfig;
use crate::core::bluetooth::access::CharacteristicAccess;
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::constants::UUID_TEMPERATURE;
use crate::core::bluetooth::device::{DeviceRecord, DeviceRegistry, Merge};
use crate::core::bluetooth::error::GattError;
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::scanner::{DiscoveryController, EventHandler};
use crate::core::bluetooth::types::{ConnectionState, ResolutionReport, ResolvedCharacteristicSet};

/// Manages the central session
pub struct BluetoothManager {
    bus: Arc<dyn Bus>,
    config: CentralConfig,
    /// Discovered devices and the active address list
    registry: Arc<Mutex<DeviceRegistry>>,
    /// Characteristics bound by the last resolutions
    resolved: Arc<Mutex<ResolvedCharacteristicSet>>,
    connection_manager: ConnectionManager,
    scanner: DiscoveryController,
    access: CharacteristicAccess,
    notification_handler: NotificationHandler,
    shutdown: CancellationToken,
}

impl BluetoothManager {
    pub fn new(bus: Arc<dyn Bus>, config: CentralConfig) -> Self {
        let registry = Arc::new(Mutex::new(DeviceRegistry::new()));
        let resolved = Arc::new(Mutex::new(ResolvedCharacteristicSet::new()));
        let shutdown = CancellationToken::new();

        let connection_manager = ConnectionManager::new(
            bus.clone(),
            config.adapter_path.clone(),
            registry.clone(),
            resolved.clone(),
            config.max_connect_retries,
            config.connect_retry_delay_ms,
        );
        let handler = Self::event_handler(
            registry.clone(),
            resolved.clone(),
            connection_manager.clone(),
            config.auto_connect,
        );
        let scanner = DiscoveryController::new(
            bus.clone(),
            config.adapter_path.clone(),
            handler,
            shutdown.child_token(),
        );
        let access = CharacteristicAccess::new(bus.clone(), resolved.clone());
        let notification_handler =
            NotificationHandler::new(bus.clone(), resolved.clone(), shutdown.child_token());

        Self {
            bus,
            config,
            registry,
            resolved,
            connection_manager,
            scanner,
            access,
            notification_handler,
            shutdown,
        }
    }

    fn event_handler(
        registry: Arc<Mutex<DeviceRegistry>>,
        resolved: Arc<Mutex<ResolvedCharacteristicSet>>,
        connection_manager: ConnectionManager,
        auto_connect: bool,
    ) -> EventHandler {
        Arc::new(move |event: PropertiesChanged| {
            Self::handle_device_event(&registry, &resolved, &connection_manager, auto_connect, event)
        })
    }

    /// Merges one device event, reports new and changed devices, and
    /// auto-connects newly registered addresses.
    fn handle_device_event(
        registry: &Mutex<DeviceRegistry>,
        resolved: &Mutex<ResolvedCharacteristicSet>,
        connection_manager: &ConnectionManager,
        auto_connect: bool,
        event: PropertiesChanged,
    ) {
        let (record, newly_registered, report_again, link_lost) = {
            let mut registry = registry.lock().unwrap();
            let merge = registry.merge_properties(
                &event.path,
                &event.interface,
                &event.changed,
                &event.invalidated,
            );
            if merge == Merge::Ignored {
                return;
            }
            // a disconnected device comes back only when it is seen advertising again
            let resighted = event.changed.contains_key("RSSI");
            let newly_registered = match registry.get(&event.path) {
                Some(r) if r.state == ConnectionState::Disconnected && !resighted => false,
                _ => registry.register_if_new(&event.path),
            };
            if newly_registered {
                if let Some(address) = registry.get(&event.path).and_then(|r| r.address.clone()) {
                    registry.set_state(&address, ConnectionState::Discovered);
                }
            }
            let Some(record) = registry.get(&event.path).cloned() else {
                return;
            };
            let report_again = match &merge {
                Merge::Updated { previous } if previous.logged => {
                    !DeviceRegistry::skip_duplicate(previous, &record)
                }
                _ => false,
            };
            let link_lost = record.state == ConnectionState::Connected
                && event.changed.get("Connected").and_then(|c| c.as_bool()) == Some(false);
            if link_lost {
                if let Some(address) = &record.address {
                    registry.remove_address(address);
                    registry.set_state(address, ConnectionState::Disconnected);
                }
            }
            (record, newly_registered, report_again, link_lost)
        };

        let Some(address) = record.address.clone() else {
            return;
        };

        if link_lost {
            let released = resolved.lock().unwrap().release_device(&address);
            warn!("Lost connection to {}, released {} characteristic(s)", address, released);
        }

        if newly_registered {
            info!("New device {}\n{}", event.path, record);
            if auto_connect {
                let connection_manager = connection_manager.clone();
                tokio::spawn(async move {
                    if let Err(e) = connection_manager.connect(&address).await {
                        error!("Auto-connect to {} failed: {}", address, e);
                    }
                });
            }
        } else if report_again {
            info!("Device changed {}\n{}", event.path, record);
        }
    }

    /// Seeds the registry with the devices the adapter already knows.
    /// Their addresses are not registered until they are seen again.
    pub async fn load_known_devices(&self) -> Result<usize, GattError> {
        let objects = self.bus.managed_objects().await?;
        let mut registry = self.registry.lock().unwrap();
        let mut loaded = 0;
        for (path, interfaces) in &objects {
            if let Some(properties) = interfaces.get(DEVICE_INTERFACE) {
                registry.merge_properties(path, DEVICE_INTERFACE, properties, &[]);
                loaded += 1;
            }
        }
        info!("Loaded {} known device(s)", loaded);
        Ok(loaded)
    }

    /// Starts discovery with the configured service filter.
    pub async fn start_scan(&mut self) -> Result<(), GattError> {
        let filter = self.config.discovery_filter.clone();
        self.scanner.start(&filter).await?;
        Ok(())
    }

    /// Stops discovery and returns the addresses found so far.
    pub async fn stop_scan(&mut self) -> Result<Vec<String>, GattError> {
        self.scanner.stop().await?;
        let addresses = self.known_addresses();
        info!("Discovery stopped, {} device(s) known", addresses.len());
        Ok(addresses)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    pub async fn connect(&self, address: &str) -> Result<ResolutionReport, GattError> {
        self.connection_manager.connect(address).await
    }

    pub async fn disconnect(&self, address: &str) -> Result<(), GattError> {
        self.connection_manager.disconnect(address).await
    }

    pub async fn connect_all(&self) -> Vec<(String, Result<ResolutionReport, GattError>)> {
        self.connection_manager.connect_all().await
    }

    pub async fn disconnect_all(&self) -> Vec<(String, Result<(), GattError>)> {
        self.connection_manager.disconnect_all().await
    }

    /// Active addresses, in discovery order.
    pub fn known_addresses(&self) -> Vec<String> {
        self.registry.lock().unwrap().addresses()
    }

    /// Records of the active addresses, in discovery order.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        let registry = self.registry.lock().unwrap();
        registry
            .addresses()
            .iter()
            .filter_map(|address| registry.record_by_address(address).cloned())
            .collect()
    }

    pub fn connection_state(&self, address: &str) -> Option<ConnectionState> {
        self.registry.lock().unwrap().state(address)
    }

    pub fn is_resolved(&self, uuid: Uuid) -> bool {
        self.resolved.lock().unwrap().is_resolved(uuid)
    }

    pub fn connection_manager(&self) -> ConnectionManager {
        self.connection_manager.clone()
    }

    pub fn access(&self) -> CharacteristicAccess {
        self.access.clone()
    }

    pub fn notifications(&self) -> NotificationHandler {
        self.notification_handler.clone()
    }

    /// Starts temperature notifications and returns the raw readings.
    pub async fn subscribe_temperature(&self) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, GattError> {
        self.notification_handler.subscribe(UUID_TEMPERATURE).await
    }

    /// Stops discovery if running and ends every task the session spawned.
    pub async fn shutdown(&mut self) {
        if self.scanner.is_scanning() {
            if let Err(e) = self.scanner.stop().await {
                warn!("Failed to stop discovery during shutdown: {}", e);
            }
        }
        self.shutdown.cancel();
        self.scanner.shutdown().await;
        info!("Bluetooth manager shut down");
    }
}
