//! Object-broker seam.
//! The session engine never talks to a radio directly. It sees a tree of
//! remote objects (path -> interface -> properties), a stream of property
//! changes, and typed method calls. `Bus` is the central-role view of that
//! broker and `Registrar` the peripheral-role one.

mod error;
pub mod loopback;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::peripheral::{Advertisement, Application};

pub use error::{BusError, ReqError};
pub use loopback::{LoopbackBus, LoopbackPeripheral};

pub const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";
pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";
pub const GATT_SERVICE_INTERFACE: &str = "org.bluez.GattService1";
pub const GATT_CHARACTERISTIC_INTERFACE: &str = "org.bluez.GattCharacteristic1";

/// A single property value as carried on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    I16(i16),
    U32(u32),
    Str(String),
    Bytes(Vec<u8>),
    StrList(Vec<String>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Self::I16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            Self::StrList(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::I16(v) => write!(f, "{}", v),
            Self::U32(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "{}", v),
            Self::Bytes(v) => write!(f, "{:02x?}", v),
            Self::StrList(v) => write!(f, "[{}]", v.join(", ")),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i16> for PropertyValue {
    fn from(value: i16) -> Self {
        Self::I16(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self::U32(value)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        Self::StrList(value)
    }
}

pub type PropertyMap = HashMap<String, PropertyValue>;
pub type InterfaceMap = HashMap<String, PropertyMap>;
/// Result of object enumeration, keyed by object path.
pub type ObjectTree = BTreeMap<String, InterfaceMap>;

/// `org.freedesktop.DBus.Properties.PropertiesChanged`, tagged with the
/// emitting object's path.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertiesChanged {
    pub path: String,
    pub interface: String,
    pub changed: PropertyMap,
    pub invalidated: Vec<String>,
}

impl PropertiesChanged {
    pub fn new(path: impl Into<String>, interface: impl Into<String>, changed: PropertyMap) -> Self {
        Self {
            path: path.into(),
            interface: interface.into(),
            changed,
            invalidated: Vec::new(),
        }
    }
}

/// Remote methods the central role invokes.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodCall {
    Connect,
    Disconnect,
    ReadValue,
    WriteValue(Vec<u8>),
    StartNotify,
    StopNotify,
    SetDiscoveryFilter { uuids: Vec<Uuid> },
    StartDiscovery,
    StopDiscovery,
}

impl MethodCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "Connect",
            Self::Disconnect => "Disconnect",
            Self::ReadValue => "ReadValue",
            Self::WriteValue(_) => "WriteValue",
            Self::StartNotify => "StartNotify",
            Self::StopNotify => "StopNotify",
            Self::SetDiscoveryFilter { .. } => "SetDiscoveryFilter",
            Self::StartDiscovery => "StartDiscovery",
            Self::StopDiscovery => "StopDiscovery",
        }
    }

    /// Interface the method belongs to.
    pub fn interface(&self) -> &'static str {
        match self {
            Self::Connect | Self::Disconnect => DEVICE_INTERFACE,
            Self::ReadValue | Self::WriteValue(_) | Self::StartNotify | Self::StopNotify => {
                GATT_CHARACTERISTIC_INTERFACE
            }
            Self::SetDiscoveryFilter { .. } | Self::StartDiscovery | Self::StopDiscovery => {
                ADAPTER_INTERFACE
            }
        }
    }
}

/// Central-role view of the object broker.
#[async_trait]
pub trait Bus: Send + Sync {
    /// `ObjectManager.GetManagedObjects`.
    async fn managed_objects(&self) -> Result<ObjectTree, BusError>;

    /// Property changes emitted by objects implementing `interface`,
    /// delivered in emission order.
    fn subscribe(&self, interface: &str) -> mpsc::UnboundedReceiver<PropertiesChanged>;

    /// Invokes `call` on the object at `path`. Methods without a return value
    /// resolve to an empty vector.
    async fn call(&self, path: &str, call: MethodCall) -> Result<Vec<u8>, BusError>;
}

/// Peripheral-role registration endpoints
/// (`LEAdvertisingManager1.RegisterAdvertisement` and
/// `GattManager1.RegisterApplication`).
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register_advertisement(&self, advertisement: &Advertisement) -> Result<(), BusError>;

    async fn register_application(&self, application: Arc<Application>) -> Result<(), BusError>;
}

/// Fan-out of property-change signals to interface-scoped subscribers.
#[derive(Debug, Default)]
pub struct SignalHub {
    subscribers: Mutex<Vec<(String, mpsc::UnboundedSender<PropertiesChanged>)>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, interface: &str) -> mpsc::UnboundedReceiver<PropertiesChanged> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap()
            .push((interface.to_string(), tx));
        rx
    }

    /// Delivers `event` to every live subscriber of its interface.
    /// Subscribers whose receiver was dropped are pruned.
    pub fn emit(&self, event: PropertiesChanged) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|(_, tx)| !tx.is_closed());
        for (interface, tx) in subscribers.iter() {
            if *interface == event.interface {
                let _ = tx.send(event.clone());
            }
        }
        debug!("PropertiesChanged {} on {}", event.interface, event.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_hub_scopes_by_interface() {
        let hub = SignalHub::new();
        let mut devices = hub.subscribe(DEVICE_INTERFACE);
        let mut characteristics = hub.subscribe(GATT_CHARACTERISTIC_INTERFACE);

        let mut changed = PropertyMap::new();
        changed.insert("Name".into(), "sensor".into());
        hub.emit(PropertiesChanged::new("/org/bluez/hci0/dev_A", DEVICE_INTERFACE, changed));

        let event = devices.try_recv().expect("device subscriber gets the event");
        assert_eq!(event.path, "/org/bluez/hci0/dev_A");
        assert!(characteristics.try_recv().is_err());
    }

    #[test]
    fn test_signal_hub_prunes_dropped_subscribers() {
        let hub = SignalHub::new();
        let rx = hub.subscribe(DEVICE_INTERFACE);
        drop(rx);
        hub.emit(PropertiesChanged::new("/a", DEVICE_INTERFACE, PropertyMap::new()));
        assert!(hub.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_method_call_interfaces() {
        assert_eq!(MethodCall::Connect.interface(), DEVICE_INTERFACE);
        assert_eq!(MethodCall::WriteValue(vec![1]).name(), "WriteValue");
        assert_eq!(MethodCall::StopDiscovery.interface(), ADAPTER_INTERFACE);
    }
}
