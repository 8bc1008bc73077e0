//! In-process bus hosting simulated peripherals as remote devices.
//!
//! A `LoopbackBus` plays the adapter side of the central role: it keeps the
//! discovery filter, announces advertised peripherals while discovering,
//! tracks connections and routes characteristic calls into the registered
//! `Application`. Each hosted peripheral registers through its own
//! `LoopbackPeripheral`, which implements `Registrar`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::bus::{
    ADAPTER_INTERFACE, Bus, BusError, DEVICE_INTERFACE, GATT_CHARACTERISTIC_INTERFACE,
    InterfaceMap, MethodCall, ObjectTree, PropertiesChanged, PropertyMap, Registrar, ReqError,
    SignalHub,
};
use crate::core::bluetooth::device::device_path;
use crate::core::peripheral::{Advertisement, Application};

/// Signal strength reported for every hosted peripheral
const LOOPBACK_RSSI: i16 = -60;

#[derive(Default)]
struct HostedPeripheral {
    address: String,
    advertisement: Option<Advertisement>,
    application: Option<Arc<Application>>,
    discovered: bool,
    connected: bool,
}

impl HostedPeripheral {
    fn device_properties(&self) -> PropertyMap {
        let mut properties = PropertyMap::new();
        properties.insert("Address".into(), self.address.clone().into());
        properties.insert("Connected".into(), self.connected.into());
        if let Some(advertisement) = &self.advertisement {
            properties.insert("Name".into(), advertisement.local_name.clone().into());
            properties.insert("Alias".into(), advertisement.local_name.clone().into());
            properties.insert("RSSI".into(), LOOPBACK_RSSI.into());
            let uuids: Vec<String> = advertisement
                .service_uuids
                .iter()
                .map(|u| u.to_string())
                .collect();
            properties.insert("UUIDs".into(), uuids.into());
        }
        properties
    }

    fn matches(&self, filter: &[Uuid]) -> bool {
        match &self.advertisement {
            Some(advertisement) => {
                filter.is_empty() || filter.iter().any(|u| advertisement.advertises(u))
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct LoopbackState {
    discovery_filter: Vec<Uuid>,
    discovering: bool,
    /// Keyed by device path
    peripherals: BTreeMap<String, HostedPeripheral>,
    /// (path, method) -> remaining injected failures
    failures: HashMap<(String, &'static str), u32>,
}

pub struct LoopbackBus {
    adapter_path: String,
    signals: SignalHub,
    state: Mutex<LoopbackState>,
}

impl LoopbackBus {
    pub fn new(adapter_path: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            adapter_path: adapter_path.into(),
            signals: SignalHub::new(),
            state: Mutex::new(LoopbackState::default()),
        })
    }

    pub fn adapter_path(&self) -> &str {
        &self.adapter_path
    }

    /// Hosts a peripheral with `address`. Its services become reachable once
    /// it registers through the returned handle.
    pub fn peripheral(self: &Arc<Self>, address: &str) -> LoopbackPeripheral {
        let path = device_path(&self.adapter_path, address);
        self.state
            .lock()
            .unwrap()
            .peripherals
            .entry(path.clone())
            .or_insert_with(|| HostedPeripheral {
                address: address.to_string(),
                ..Default::default()
            });
        LoopbackPeripheral {
            bus: self.clone(),
            path,
        }
    }

    /// Injects a raw property-change signal.
    pub fn emit(&self, event: PropertiesChanged) {
        self.signals.emit(event);
    }

    /// Makes the next `times` invocations of `method` on `path` fail with a
    /// transport error.
    pub fn fail_next(&self, path: &str, method: &'static str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((path.to_string(), method), times);
    }

    pub fn is_discovering(&self) -> bool {
        self.state.lock().unwrap().discovering
    }

    pub fn discovery_filter(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().discovery_filter.clone()
    }

    pub fn is_connected(&self, address: &str) -> bool {
        let path = device_path(&self.adapter_path, address);
        self.state
            .lock()
            .unwrap()
            .peripherals
            .get(&path)
            .is_some_and(|p| p.connected)
    }

    fn take_failure(&self, path: &str, method: &'static str) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.failures.get_mut(&(path.to_string(), method)) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn announce(&self, announcements: Vec<(String, PropertyMap)>) {
        for (path, properties) in announcements {
            info!("Announcing {}", path);
            self.signals
                .emit(PropertiesChanged::new(path, DEVICE_INTERFACE, properties));
        }
    }

    fn call_adapter(&self, call: MethodCall) -> Result<Vec<u8>, BusError> {
        let announcements = {
            let mut state = self.state.lock().unwrap();
            match call {
                MethodCall::SetDiscoveryFilter { uuids } => {
                    debug!("Discovery filter set to {:?}", uuids);
                    state.discovery_filter = uuids;
                    Vec::new()
                }
                MethodCall::StartDiscovery => {
                    state.discovering = true;
                    let filter = state.discovery_filter.clone();
                    state
                        .peripherals
                        .iter_mut()
                        .filter(|(_, p)| p.matches(&filter))
                        .map(|(path, p)| {
                            p.discovered = true;
                            (path.clone(), p.device_properties())
                        })
                        .collect()
                }
                MethodCall::StopDiscovery => {
                    state.discovering = false;
                    Vec::new()
                }
                other => {
                    return Err(BusError::UnknownMethod {
                        path: self.adapter_path.clone(),
                        method: other.name(),
                    });
                }
            }
        };
        self.announce(announcements);
        Ok(Vec::new())
    }

    fn call_device(&self, path: &str, call: MethodCall) -> Result<Vec<u8>, BusError> {
        let connected = match call {
            MethodCall::Connect => true,
            MethodCall::Disconnect => false,
            other => {
                return Err(BusError::UnknownMethod {
                    path: path.to_string(),
                    method: other.name(),
                });
            }
        };
        {
            let mut state = self.state.lock().unwrap();
            let peripheral = state
                .peripherals
                .get_mut(path)
                .filter(|p| p.discovered)
                .ok_or_else(|| BusError::UnknownObject(path.to_string()))?;
            peripheral.connected = connected;
        }
        let mut changed = PropertyMap::new();
        changed.insert("Connected".into(), connected.into());
        self.signals
            .emit(PropertiesChanged::new(path, DEVICE_INTERFACE, changed));
        Ok(Vec::new())
    }

    fn call_characteristic(&self, path: &str, call: MethodCall) -> Result<Vec<u8>, BusError> {
        let (root, application) = {
            let state = self.state.lock().unwrap();
            let (root, peripheral) = state
                .peripherals
                .iter()
                .find(|(root, _)| path.starts_with(&format!("{}/", root)))
                .ok_or_else(|| BusError::UnknownObject(path.to_string()))?;
            if !peripheral.connected {
                return Err(BusError::Transport(format!("{} is not connected", peripheral.address)));
            }
            let application = peripheral
                .application
                .clone()
                .ok_or_else(|| BusError::UnknownObject(path.to_string()))?;
            (root.clone(), application)
        };
        match application.dispatch(&root, path, &call) {
            Some(Ok(value)) => Ok(value),
            Some(Err(err)) => Err(BusError::Rejected(err)),
            None => Err(BusError::UnknownObject(path.to_string())),
        }
    }
}

#[async_trait]
impl Bus for LoopbackBus {
    async fn managed_objects(&self) -> Result<ObjectTree, BusError> {
        let state = self.state.lock().unwrap();
        let mut tree = ObjectTree::new();

        let mut adapter = PropertyMap::new();
        adapter.insert("Discovering".into(), state.discovering.into());
        tree.insert(
            self.adapter_path.clone(),
            InterfaceMap::from([(ADAPTER_INTERFACE.to_string(), adapter)]),
        );

        for (path, peripheral) in state.peripherals.iter().filter(|(_, p)| p.discovered) {
            tree.insert(
                path.clone(),
                InterfaceMap::from([(DEVICE_INTERFACE.to_string(), peripheral.device_properties())]),
            );
            if !peripheral.connected {
                continue;
            }
            if let Some(application) = &peripheral.application {
                tree.extend(application.object_tree_at(path));
            }
        }
        Ok(tree)
    }

    fn subscribe(&self, interface: &str) -> mpsc::UnboundedReceiver<PropertiesChanged> {
        self.signals.subscribe(interface)
    }

    async fn call(&self, path: &str, call: MethodCall) -> Result<Vec<u8>, BusError> {
        if self.take_failure(path, call.name()) {
            warn!("Injected failure of {} on {}", call.name(), path);
            return Err(BusError::Transport(format!("{} failed", call.name())));
        }
        match call.interface() {
            ADAPTER_INTERFACE if path == self.adapter_path => self.call_adapter(call),
            ADAPTER_INTERFACE => Err(BusError::UnknownObject(path.to_string())),
            DEVICE_INTERFACE => self.call_device(path, call),
            _ => self.call_characteristic(path, call),
        }
    }
}

/// Registration endpoint of one hosted peripheral.
pub struct LoopbackPeripheral {
    bus: Arc<LoopbackBus>,
    path: String,
}

impl LoopbackPeripheral {
    /// Object path under which the central sees this peripheral.
    pub fn device_path(&self) -> &str {
        &self.path
    }

    /// Pushes notified values to the central as `Value` property changes
    /// while the device is connected.
    fn forward_values(bus: Weak<LoopbackBus>, root: String, application: Arc<Application>) {
        let mut values = application.subscribe_values();
        tokio::spawn(async move {
            loop {
                let changed = match values.recv().await {
                    Ok(changed) => changed,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Dropped {} notifications on {}", skipped, root);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(bus) = bus.upgrade() else { break };
                let connected = bus
                    .state
                    .lock()
                    .unwrap()
                    .peripherals
                    .get(&root)
                    .is_some_and(|p| p.connected);
                if !connected {
                    continue;
                }
                let Some(path) = application.characteristic_path_at(&root, changed.characteristic) else {
                    continue;
                };
                let mut properties = PropertyMap::new();
                properties.insert("Value".into(), changed.value.into());
                bus.signals
                    .emit(PropertiesChanged::new(path, GATT_CHARACTERISTIC_INTERFACE, properties));
            }
        });
    }
}

#[async_trait]
impl Registrar for LoopbackPeripheral {
    async fn register_advertisement(&self, advertisement: &Advertisement) -> Result<(), BusError> {
        let announcement = {
            let mut state = self.bus.state.lock().unwrap();
            let filter = state.discovery_filter.clone();
            let discovering = state.discovering;
            let peripheral = state
                .peripherals
                .get_mut(&self.path)
                .ok_or_else(|| BusError::UnknownObject(self.path.clone()))?;
            if peripheral.advertisement.is_some() {
                return Err(ReqError::Failed("advertisement already registered".into()).into());
            }
            peripheral.advertisement = Some(advertisement.clone());
            if discovering && peripheral.matches(&filter) {
                peripheral.discovered = true;
                Some((self.path.clone(), peripheral.device_properties()))
            } else {
                None
            }
        };
        self.bus.announce(announcement.into_iter().collect());
        Ok(())
    }

    async fn register_application(&self, application: Arc<Application>) -> Result<(), BusError> {
        {
            let mut state = self.bus.state.lock().unwrap();
            let peripheral = state
                .peripherals
                .get_mut(&self.path)
                .ok_or_else(|| BusError::UnknownObject(self.path.clone()))?;
            if peripheral.application.is_some() {
                return Err(ReqError::Failed("application already registered".into()).into());
            }
            peripheral.application = Some(application.clone());
        }
        Self::forward_values(Arc::downgrade(&self.bus), self.path.clone(), application);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeripheralConfig;

    const ADDRESS: &str = "B8:27:EB:00:00:01";

    #[tokio::test]
    async fn test_start_discovery_announces_matching_peripherals() {
        let bus = LoopbackBus::new("/org/bluez/hci0");
        let peripheral = bus.peripheral(ADDRESS);
        peripheral
            .register_advertisement(&Advertisement::from_config(&PeripheralConfig::default()))
            .await
            .unwrap();

        let mut devices = bus.subscribe(DEVICE_INTERFACE);
        bus.call(
            "/org/bluez/hci0",
            MethodCall::SetDiscoveryFilter { uuids: vec![Uuid::nil()] },
        )
        .await
        .unwrap();
        bus.call("/org/bluez/hci0", MethodCall::StartDiscovery).await.unwrap();
        assert!(devices.try_recv().is_err());

        bus.call("/org/bluez/hci0", MethodCall::SetDiscoveryFilter { uuids: vec![] })
            .await
            .unwrap();
        bus.call("/org/bluez/hci0", MethodCall::StartDiscovery).await.unwrap();
        let event = devices.try_recv().unwrap();
        assert_eq!(event.path, peripheral.device_path());
        assert_eq!(event.changed["Address"].as_str(), Some(ADDRESS));
    }

    #[tokio::test]
    async fn test_undiscovered_device_is_unknown() {
        let bus = LoopbackBus::new("/org/bluez/hci0");
        let peripheral = bus.peripheral(ADDRESS);
        let result = bus.call(peripheral.device_path(), MethodCall::Connect).await;
        assert!(matches!(result, Err(BusError::UnknownObject(_))));
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let bus = LoopbackBus::new("/org/bluez/hci0");
        bus.fail_next("/org/bluez/hci0", "StopDiscovery", 2);
        assert!(bus.call("/org/bluez/hci0", MethodCall::StopDiscovery).await.is_err());
        assert!(bus.call("/org/bluez/hci0", MethodCall::StopDiscovery).await.is_err());
        assert!(bus.call("/org/bluez/hci0", MethodCall::StopDiscovery).await.is_ok());
    }
}
