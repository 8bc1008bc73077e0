//! Central-role bus backed by the platform Bluetooth stack through bluest.
//! Remote objects are addressed with BlueZ-style paths so the session
//! engine sees the same tree it sees on the loopback bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bluest::{Adapter, AdvertisingDevice, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{
    ADAPTER_INTERFACE, Bus, BusError, DEVICE_INTERFACE, GATT_CHARACTERISTIC_INTERFACE,
    GATT_SERVICE_INTERFACE, InterfaceMap, MethodCall, ObjectTree, PropertiesChanged, PropertyMap,
    SignalHub,
};
use crate::core::bluetooth::device::{device_path, extract_mac_address};

#[derive(Default)]
struct BluestState {
    filter: Vec<Uuid>,
    scan_token: Option<CancellationToken>,
    /// Devices seen while scanning, by object path
    devices: HashMap<String, Device>,
    /// Last properties reported for each device path
    properties: HashMap<String, PropertyMap>,
    /// Characteristics enumerated by `managed_objects`, by object path
    characteristics: HashMap<String, Characteristic>,
    notify_tokens: HashMap<String, CancellationToken>,
}

pub struct BluestBus {
    adapter: Adapter,
    adapter_path: String,
    hub: Arc<SignalHub>,
    state: Arc<Mutex<BluestState>>,
}

fn transport(e: impl std::fmt::Display) -> BusError {
    BusError::Transport(e.to_string())
}

impl BluestBus {
    /// Opens the default adapter and waits for it to be powered.
    pub async fn new(adapter_path: &str) -> Result<Arc<Self>, BusError> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| BusError::Transport("Bluetooth adapter not found".to_string()))?;
        adapter.wait_available().await.map_err(transport)?;
        info!("Bluetooth adapter available at {}", adapter_path);

        Ok(Arc::new(Self {
            adapter,
            adapter_path: adapter_path.to_string(),
            hub: Arc::new(SignalHub::new()),
            state: Arc::new(Mutex::new(BluestState::default())),
        }))
    }

    fn device_properties(advertising: &AdvertisingDevice, address: &str, connected: bool) -> PropertyMap {
        let mut properties = PropertyMap::new();
        properties.insert("Address".into(), address.to_string().into());
        properties.insert("Connected".into(), connected.into());
        let name = advertising
            .adv_data
            .local_name
            .clone()
            .or_else(|| advertising.device.name().ok());
        if let Some(name) = name {
            properties.insert("Name".into(), name.clone().into());
            properties.insert("Alias".into(), name.into());
        }
        if let Some(rssi) = advertising.rssi {
            properties.insert("RSSI".into(), rssi.into());
        }
        if !advertising.adv_data.services.is_empty() {
            let uuids: Vec<String> = advertising
                .adv_data
                .services
                .iter()
                .map(|u| u.to_string())
                .collect();
            properties.insert("UUIDs".into(), uuids.into());
        }
        properties
    }

    fn start_scan(&self) {
        let token = CancellationToken::new();
        let filter = {
            let mut state = self.state.lock().unwrap();
            if let Some(previous) = state.scan_token.replace(token.clone()) {
                previous.cancel();
            }
            state.filter.clone()
        };

        let adapter = self.adapter.clone();
        let adapter_path = self.adapter_path.clone();
        let hub = self.hub.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut scan_stream = match adapter.scan(&filter).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to start bluetooth scan: {}", e);
                    return;
                }
            };
            info!("Starting bluetooth scan");
            loop {
                tokio::select! {
                    result = scan_stream.next() => {
                        let Some(advertising) = result else {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        };
                        let id = advertising.device.id().to_string();
                        let Some(address) = extract_mac_address(&id) else {
                            debug!("Skipping device without address: {}", id);
                            continue;
                        };
                        let connected = advertising.device.is_connected().await;
                        let path = device_path(&adapter_path, &address);
                        let properties = Self::device_properties(&advertising, &address, connected);
                        {
                            let mut state = state.lock().unwrap();
                            state.devices.insert(path.clone(), advertising.device.clone());
                            state
                                .properties
                                .entry(path.clone())
                                .or_default()
                                .extend(properties.clone());
                        }
                        hub.emit(PropertiesChanged::new(path, DEVICE_INTERFACE, properties));
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
    }

    fn device_at(&self, path: &str) -> Result<Device, BusError> {
        self.state
            .lock()
            .unwrap()
            .devices
            .get(path)
            .cloned()
            .ok_or_else(|| BusError::UnknownObject(path.to_string()))
    }

    fn characteristic_at(&self, path: &str) -> Result<Characteristic, BusError> {
        self.state
            .lock()
            .unwrap()
            .characteristics
            .get(path)
            .cloned()
            .ok_or_else(|| BusError::UnknownObject(path.to_string()))
    }

    fn set_connected(&self, path: &str, connected: bool) {
        let mut changed = PropertyMap::new();
        changed.insert("Connected".into(), connected.into());
        if let Some(properties) = self.state.lock().unwrap().properties.get_mut(path) {
            properties.extend(changed.clone());
        }
        self.hub.emit(PropertiesChanged::new(path, DEVICE_INTERFACE, changed));
    }

    fn start_notify(&self, path: &str, characteristic: Characteristic) {
        let token = CancellationToken::new();
        {
            let mut state = self.state.lock().unwrap();
            if state
                .notify_tokens
                .get(path)
                .is_some_and(|t| !t.is_cancelled())
            {
                return;
            }
            state.notify_tokens.insert(path.to_string(), token.clone());
        }

        let hub = self.hub.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            let mut notifications = match characteristic.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to start notifications on {}: {}", path, e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    item = notifications.next() => match item {
                        Some(Ok(value)) => {
                            let mut changed = PropertyMap::new();
                            changed.insert("Value".into(), value.into());
                            hub.emit(PropertiesChanged::new(
                                path.clone(),
                                GATT_CHARACTERISTIC_INTERFACE,
                                changed,
                            ));
                        }
                        Some(Err(e)) => {
                            warn!("Notification error on {}: {}", path, e);
                            break;
                        }
                        None => break,
                    },
                    _ = token.cancelled() => break,
                }
            }
            debug!("Notifications on {} stopped", path);
        });
    }

    async fn device_objects(&self, path: &str, device: &Device, objects: &mut ObjectTree) -> Result<(), BusError> {
        let services = device.services().await.map_err(transport)?;
        for (i, service) in services.iter().enumerate() {
            let service_path = format!("{}/service{:04x}", path, i);
            let mut service_properties = PropertyMap::new();
            service_properties.insert("UUID".into(), service.uuid().to_string().into());
            service_properties.insert("Primary".into(), true.into());
            service_properties.insert("Device".into(), path.to_string().into());
            let mut interfaces = InterfaceMap::new();
            interfaces.insert(GATT_SERVICE_INTERFACE.to_string(), service_properties);
            objects.insert(service_path.clone(), interfaces);

            let characteristics = service.characteristics().await.map_err(transport)?;
            for (j, characteristic) in characteristics.into_iter().enumerate() {
                let characteristic_path = format!("{}/char{:04x}", service_path, j);
                let properties = characteristic.properties().await.map_err(transport)?;
                let mut flags = Vec::new();
                if properties.read {
                    flags.push("read".to_string());
                }
                if properties.write {
                    flags.push("write".to_string());
                }
                if properties.write_without_response {
                    flags.push("write-without-response".to_string());
                }
                if properties.notify {
                    flags.push("notify".to_string());
                }
                if properties.indicate {
                    flags.push("indicate".to_string());
                }

                let mut characteristic_properties = PropertyMap::new();
                characteristic_properties
                    .insert("UUID".into(), characteristic.uuid().to_string().into());
                characteristic_properties.insert("Service".into(), service_path.clone().into());
                characteristic_properties.insert("Flags".into(), flags.into());
                let mut interfaces = InterfaceMap::new();
                interfaces.insert(GATT_CHARACTERISTIC_INTERFACE.to_string(), characteristic_properties);
                objects.insert(characteristic_path.clone(), interfaces);

                self.state
                    .lock()
                    .unwrap()
                    .characteristics
                    .insert(characteristic_path, characteristic);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Bus for BluestBus {
    async fn managed_objects(&self) -> Result<ObjectTree, BusError> {
        let mut objects = ObjectTree::new();
        let (devices, discovering) = {
            let state = self.state.lock().unwrap();
            let devices: Vec<(String, Device, PropertyMap)> = state
                .devices
                .iter()
                .map(|(path, device)| {
                    let properties = state.properties.get(path).cloned().unwrap_or_default();
                    (path.clone(), device.clone(), properties)
                })
                .collect();
            let discovering = state.scan_token.as_ref().is_some_and(|t| !t.is_cancelled());
            (devices, discovering)
        };

        let mut adapter_properties = PropertyMap::new();
        adapter_properties.insert("Discovering".into(), discovering.into());
        let mut interfaces = InterfaceMap::new();
        interfaces.insert(ADAPTER_INTERFACE.to_string(), adapter_properties);
        objects.insert(self.adapter_path.clone(), interfaces);

        for (path, device, properties) in devices {
            let mut interfaces = InterfaceMap::new();
            interfaces.insert(DEVICE_INTERFACE.to_string(), properties);
            objects.insert(path.clone(), interfaces);
            if device.is_connected().await {
                if let Err(e) = self.device_objects(&path, &device, &mut objects).await {
                    warn!("Failed to enumerate services of {}: {}", path, e);
                }
            }
        }
        Ok(objects)
    }

    fn subscribe(&self, interface: &str) -> mpsc::UnboundedReceiver<PropertiesChanged> {
        self.hub.subscribe(interface)
    }

    async fn call(&self, path: &str, call: MethodCall) -> Result<Vec<u8>, BusError> {
        debug!("{} on {}", call.name(), path);
        if path == self.adapter_path {
            match call {
                MethodCall::SetDiscoveryFilter { uuids } => {
                    self.state.lock().unwrap().filter = uuids;
                }
                MethodCall::StartDiscovery => self.start_scan(),
                MethodCall::StopDiscovery => {
                    if let Some(token) = self.state.lock().unwrap().scan_token.take() {
                        token.cancel();
                    }
                }
                other => {
                    return Err(BusError::UnknownMethod {
                        path: path.to_string(),
                        method: other.name(),
                    });
                }
            }
            return Ok(Vec::new());
        }

        match call {
            MethodCall::Connect => {
                let device = self.device_at(path)?;
                if !device.is_connected().await {
                    self.adapter.connect_device(&device).await.map_err(transport)?;
                }
                self.set_connected(path, true);
                Ok(Vec::new())
            }
            MethodCall::Disconnect => {
                let device = self.device_at(path)?;
                if device.is_connected().await {
                    self.adapter.disconnect_device(&device).await.map_err(transport)?;
                }
                self.set_connected(path, false);
                Ok(Vec::new())
            }
            MethodCall::ReadValue => {
                let characteristic = self.characteristic_at(path)?;
                characteristic.read().await.map_err(transport)
            }
            MethodCall::WriteValue(value) => {
                let characteristic = self.characteristic_at(path)?;
                characteristic.write(&value).await.map_err(transport)?;
                Ok(Vec::new())
            }
            MethodCall::StartNotify => {
                let characteristic = self.characteristic_at(path)?;
                self.start_notify(path, characteristic);
                Ok(Vec::new())
            }
            MethodCall::StopNotify => {
                if let Some(token) = self.state.lock().unwrap().notify_tokens.remove(path) {
                    token.cancel();
                }
                Ok(Vec::new())
            }
            other => Err(BusError::UnknownMethod {
                path: path.to_string(),
                method: other.name(),
            }),
        }
    }
}
