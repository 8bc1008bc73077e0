//! Bluetooth device representation and the registry of discovered devices

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Local};
use log::{debug, warn};
use regex::Regex;

use crate::bus::{DEVICE_INTERFACE, PropertyMap, PropertyValue};
use crate::core::bluetooth::types::ConnectionState;

static MAC_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").unwrap());

/// Returns true when `address` is a colon separated MAC-like address.
pub fn is_valid_address(address: &str) -> bool {
    MAC_ADDRESS
        .find(address)
        .map(|m| m.start() == 0 && m.end() == address.len() && !address.contains('-'))
        .unwrap_or(false)
}

/// Pulls the last MAC-like address out of a platform device id, upper-cased.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    MAC_ADDRESS
        .find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace('-', ":").to_uppercase())
}

/// Object path of a device under `adapter_path`: colons become underscores.
pub fn device_path(adapter_path: &str, address: &str) -> String {
    format!("{}/dev_{}", adapter_path, address.replace(':', "_"))
}

/// Last-known properties of a remote device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRecord {
    /// The address of the device; never changes once set
    pub address: Option<String>,
    /// The name of the device, if advertised
    pub name: Option<String>,
    pub alias: Option<String>,
    /// Class of device
    pub class: Option<u32>,
    /// The signal strength (RSSI) of the last sighting
    pub rssi: Option<i16>,
    pub connected: Option<bool>,
    /// Advertised service UUIDs
    pub uuids: Option<Vec<String>>,
    /// Properties without a typed field
    pub other: BTreeMap<String, PropertyValue>,
    /// Set once the device has been reported
    pub logged: bool,
    pub state: ConnectionState,
    pub last_seen: Option<DateTime<Local>>,
}

impl DeviceRecord {
    pub fn from_properties(properties: &PropertyMap) -> Self {
        let mut record = Self::default();
        record.apply(properties, &[]);
        record
    }

    /// Merges a property-change event: changed keys overwrite, invalidated
    /// keys are removed.
    pub fn apply(&mut self, changed: &PropertyMap, invalidated: &[String]) {
        for (key, value) in changed {
            self.set(key, value);
        }
        for key in invalidated {
            self.unset(key);
        }
        self.last_seen = Some(Local::now());
    }

    fn set(&mut self, key: &str, value: &PropertyValue) {
        let typed = match (key, value) {
            ("Address", PropertyValue::Str(address)) => {
                match &self.address {
                    Some(current) if current != address => {
                        warn!("Ignoring address change {} -> {}", current, address);
                    }
                    _ => self.address = Some(address.clone()),
                }
                true
            }
            ("Address", _) => {
                warn!("Ignoring non-string Address {}", value);
                return;
            }
            ("Name", PropertyValue::Str(name)) => {
                self.name = Some(name.clone());
                true
            }
            ("Alias", PropertyValue::Str(alias)) => {
                self.alias = Some(alias.clone());
                true
            }
            ("Class", PropertyValue::U32(class)) => {
                self.class = Some(*class);
                true
            }
            ("RSSI", PropertyValue::I16(rssi)) => {
                self.rssi = Some(*rssi);
                true
            }
            ("Connected", PropertyValue::Bool(connected)) => {
                self.connected = Some(*connected);
                true
            }
            ("UUIDs", PropertyValue::StrList(uuids)) => {
                self.uuids = Some(uuids.clone());
                true
            }
            _ => false,
        };
        if typed {
            self.other.remove(key);
        } else {
            // an unexpected type replaces whatever the typed field held
            self.unset(key);
            self.other.insert(key.to_string(), value.clone());
        }
    }

    fn unset(&mut self, key: &str) {
        match key {
            "Address" => {
                debug!("Address is immutable, invalidation ignored");
                return;
            }
            "Name" => self.name = None,
            "Alias" => self.alias = None,
            "Class" => self.class = None,
            "RSSI" => self.rssi = None,
            "Connected" => self.connected = None,
            "UUIDs" => self.uuids = None,
            _ => {}
        }
        self.other.remove(key);
    }

    /// The record as an untyped property map.
    pub fn properties(&self) -> PropertyMap {
        let mut properties: PropertyMap = self
            .other
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(address) = &self.address {
            properties.insert("Address".into(), address.clone().into());
        }
        if let Some(name) = &self.name {
            properties.insert("Name".into(), name.clone().into());
        }
        if let Some(alias) = &self.alias {
            properties.insert("Alias".into(), alias.clone().into());
        }
        if let Some(class) = self.class {
            properties.insert("Class".into(), class.into());
        }
        if let Some(rssi) = self.rssi {
            properties.insert("RSSI".into(), rssi.into());
        }
        if let Some(connected) = self.connected {
            properties.insert("Connected".into(), connected.into());
        }
        if let Some(uuids) = &self.uuids {
            properties.insert("UUIDs".into(), uuids.clone().into());
        }
        properties
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.alias.as_deref())
            .unwrap_or("Unknown")
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[ {} ]", self.address.as_deref().unwrap_or("<unknown>"))?;
        let properties: BTreeMap<String, PropertyValue> = self.properties().into_iter().collect();
        for (key, value) in &properties {
            match (key.as_str(), value) {
                ("Class", PropertyValue::U32(class)) => writeln!(f, "    {} = 0x{:06x}", key, class)?,
                _ => writeln!(f, "    {} = {}", key, value)?,
            }
        }
        Ok(())
    }
}

/// Outcome of merging one property-change event
#[derive(Debug, Clone, PartialEq)]
pub enum Merge {
    /// The event was not for the device interface
    Ignored,
    /// First event for this path
    Created,
    /// Known path; carries the record as it was before the merge
    Updated { previous: DeviceRecord },
}

/// Authoritative mapping from device path to its last-known properties,
/// plus the list of addresses acted upon. One record per address: a path
/// reporting an address another path already holds becomes an alias of it.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceRecord>,
    aliases: HashMap<String, String>,
    addresses: Vec<String>,
    in_flight: HashSet<String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a property-change event for `path`.
    pub fn merge_properties(
        &mut self,
        path: &str,
        interface: &str,
        changed: &PropertyMap,
        invalidated: &[String],
    ) -> Merge {
        if interface != DEVICE_INTERFACE {
            return Merge::Ignored;
        }
        let path = self.canonical_path(path).to_string();
        let merge = match self.devices.get_mut(&path) {
            Some(record) => {
                let previous = record.clone();
                record.apply(changed, invalidated);
                Merge::Updated { previous }
            }
            None => {
                let mut record = DeviceRecord::from_properties(changed);
                for key in invalidated {
                    record.unset(key);
                }
                self.devices.insert(path.clone(), record);
                Merge::Created
            }
        };
        self.fold_duplicate(&path, invalidated).unwrap_or(merge)
    }

    fn canonical_path<'a>(&'a self, path: &'a str) -> &'a str {
        self.aliases.get(path).map(String::as_str).unwrap_or(path)
    }

    /// Folds the record at `path` into the record of another path holding
    /// the same address, and makes `path` an alias of that path.
    fn fold_duplicate(&mut self, path: &str, invalidated: &[String]) -> Option<Merge> {
        let address = self.devices.get(path)?.address.clone()?;
        let holder = self
            .devices
            .iter()
            .find(|(p, r)| p.as_str() != path && r.address.as_deref() == Some(address.as_str()))
            .map(|(p, _)| p.clone())?;

        let duplicate = self.devices.remove(path)?;
        let record = self.devices.get_mut(&holder)?;
        let previous = record.clone();
        record.apply(&duplicate.properties(), invalidated);
        debug!("{} reports {} already held by {}", path, address, holder);
        self.aliases.insert(path.to_string(), holder);
        Some(Merge::Updated { previous })
    }

    /// Appends the record's address to the address list if it is not there
    /// yet and marks the record as reported. Returns true exactly when the
    /// address was appended.
    pub fn register_if_new(&mut self, path: &str) -> bool {
        let path = self.canonical_path(path).to_string();
        let Some(record) = self.devices.get_mut(&path) else {
            return false;
        };
        let Some(address) = record.address.clone() else {
            return false;
        };
        if self.addresses.contains(&address) {
            return false;
        }
        self.addresses.push(address);
        record.logged = true;
        true
    }

    /// Whether an update of an already reported device should be swallowed:
    /// the old sighting was logged and exactly one of the two sightings
    /// carries a name.
    pub fn skip_duplicate(old: &DeviceRecord, new: &DeviceRecord) -> bool {
        old.logged && (old.name.is_some() != new.name.is_some())
    }

    /// Marks a connect attempt for `address` as in flight. Returns false when
    /// one is already running.
    pub fn begin_connect(&mut self, address: &str) -> bool {
        self.in_flight.insert(address.to_string())
    }

    pub fn finish_connect(&mut self, address: &str) {
        self.in_flight.remove(address);
    }

    pub fn is_connecting(&self, address: &str) -> bool {
        self.in_flight.contains(address)
    }

    /// Removes `address` from the active address list. The record is kept.
    pub fn remove_address(&mut self, address: &str) -> bool {
        let before = self.addresses.len();
        self.addresses.retain(|a| a != address);
        before != self.addresses.len()
    }

    /// Snapshot of the active address list, in discovery order.
    pub fn addresses(&self) -> Vec<String> {
        self.addresses.clone()
    }

    pub fn contains_address(&self, address: &str) -> bool {
        self.addresses.iter().any(|a| a == address)
    }

    pub fn get(&self, path: &str) -> Option<&DeviceRecord> {
        self.devices.get(self.canonical_path(path))
    }

    pub fn record_by_address(&self, address: &str) -> Option<&DeviceRecord> {
        self.devices
            .values()
            .find(|r| r.address.as_deref() == Some(address))
    }

    pub fn path_for_address(&self, address: &str) -> Option<String> {
        self.devices
            .iter()
            .find(|(_, r)| r.address.as_deref() == Some(address))
            .map(|(path, _)| path.clone())
    }

    pub fn state(&self, address: &str) -> Option<ConnectionState> {
        self.record_by_address(address).map(|r| r.state)
    }

    /// Updates the connection state of the record holding `address`.
    pub fn set_state(&mut self, address: &str, state: ConnectionState) {
        if let Some(record) = self
            .devices
            .values_mut()
            .find(|r| r.address.as_deref() == Some(address))
        {
            record.state = state;
        }
    }

    /// All records, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/org/bluez/hci0/dev_B8_27_EB_00_00_01";
    const ADDRESS: &str = "B8:27:EB:00:00:01";

    fn props(pairs: &[(&str, PropertyValue)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_device_path_convention() {
        assert_eq!(device_path("/org/bluez/hci0", ADDRESS), PATH);
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address(ADDRESS));
        assert!(!is_valid_address("B8:27:EB:00:00"));
        assert!(!is_valid_address("B8-27-EB-00-00-01"));
        assert!(!is_valid_address("xB8:27:EB:00:00:01"));
        assert_eq!(
            extract_mac_address("hci0/dev_x/b8:27:eb:00:00:01"),
            Some(ADDRESS.to_string())
        );
    }

    #[test]
    fn test_merge_ignores_other_interfaces() {
        let mut registry = DeviceRegistry::new();
        let outcome = registry.merge_properties(
            PATH,
            "org.bluez.GattCharacteristic1",
            &props(&[("Value", vec![1u8].into())]),
            &[],
        );
        assert_eq!(outcome, Merge::Ignored);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_merge_overwrites_and_invalidates() {
        let mut registry = DeviceRegistry::new();
        registry.merge_properties(
            PATH,
            DEVICE_INTERFACE,
            &props(&[("Address", ADDRESS.into()), ("RSSI", (-70i16).into())]),
            &[],
        );
        registry.merge_properties(
            PATH,
            DEVICE_INTERFACE,
            &props(&[("RSSI", (-50i16).into()), ("Name", "sensor".into())]),
            &[],
        );
        registry.merge_properties(PATH, DEVICE_INTERFACE, &PropertyMap::new(), &["RSSI".to_string()]);

        let record = registry.get(PATH).unwrap();
        assert_eq!(record.rssi, None);
        assert_eq!(record.name.as_deref(), Some("sensor"));
        assert_eq!(record.address.as_deref(), Some(ADDRESS));
    }

    #[test]
    fn test_merge_is_batch_independent() {
        let events = vec![
            props(&[("RSSI", (-80i16).into()), ("TxPower", (4i16).into())]),
            props(&[("Address", ADDRESS.into())]),
            props(&[("Name", "sensor".into()), ("RSSI", (-60i16).into())]),
            props(&[("Class", 0x1f00u32.into()), ("Name", "renamed".into())]),
        ];

        let mut one_by_one = DeviceRegistry::new();
        for event in &events {
            one_by_one.merge_properties(PATH, DEVICE_INTERFACE, event, &[]);
        }

        let mut batched = DeviceRegistry::new();
        let mut first = events[0].clone();
        first.extend(events[1].clone());
        let mut second = events[2].clone();
        second.extend(events[3].clone());
        batched.merge_properties(PATH, DEVICE_INTERFACE, &first, &[]);
        batched.merge_properties(PATH, DEVICE_INTERFACE, &second, &[]);

        let mut folded = PropertyMap::new();
        for event in &events {
            folded.extend(event.clone());
        }

        assert_eq!(one_by_one.get(PATH).unwrap().properties(), folded);
        assert_eq!(batched.get(PATH).unwrap().properties(), folded);
    }

    #[test]
    fn test_address_never_changes_for_a_path() {
        let mut registry = DeviceRegistry::new();
        registry.merge_properties(PATH, DEVICE_INTERFACE, &props(&[("Address", ADDRESS.into())]), &[]);
        registry.merge_properties(
            PATH,
            DEVICE_INTERFACE,
            &props(&[("Address", "00:11:22:33:44:55".into())]),
            &["Address".to_string()],
        );
        assert_eq!(registry.get(PATH).unwrap().address.as_deref(), Some(ADDRESS));
    }

    #[test]
    fn test_register_if_new_once_per_address() {
        let mut registry = DeviceRegistry::new();
        registry.merge_properties(PATH, DEVICE_INTERFACE, &props(&[("RSSI", (-80i16).into())]), &[]);
        // anonymous sighting: nothing to act on yet
        assert!(!registry.register_if_new(PATH));

        registry.merge_properties(PATH, DEVICE_INTERFACE, &props(&[("Address", ADDRESS.into())]), &[]);
        assert!(registry.register_if_new(PATH));
        assert!(registry.get(PATH).unwrap().logged);

        for _ in 0..5 {
            registry.merge_properties(PATH, DEVICE_INTERFACE, &props(&[("RSSI", (-40i16).into())]), &[]);
            assert!(!registry.register_if_new(PATH));
        }
        assert_eq!(registry.addresses(), vec![ADDRESS.to_string()]);

        assert!(registry.remove_address(ADDRESS));
        assert!(registry.register_if_new(PATH));
    }

    #[test]
    fn test_same_address_under_another_path_is_one_record() {
        let mut registry = DeviceRegistry::new();
        registry.merge_properties(PATH, DEVICE_INTERFACE, &props(&[("Address", ADDRESS.into())]), &[]);
        assert!(registry.register_if_new(PATH));

        let other = "/org/bluez/hci1/dev_B8_27_EB_00_00_01";
        let merge = registry.merge_properties(
            other,
            DEVICE_INTERFACE,
            &props(&[("Address", ADDRESS.into()), ("Name", "sensor".into())]),
            &[],
        );
        assert!(matches!(merge, Merge::Updated { .. }));
        assert_eq!(registry.len(), 1);
        assert!(!registry.register_if_new(other));
        assert_eq!(registry.get(PATH).unwrap().name.as_deref(), Some("sensor"));

        // later events for the alias land on the same record
        registry.merge_properties(other, DEVICE_INTERFACE, &props(&[("RSSI", (-42i16).into())]), &[]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(PATH).unwrap().rssi, Some(-42));
        assert_eq!(registry.get(other), registry.get(PATH));
        assert_eq!(registry.path_for_address(ADDRESS).as_deref(), Some(PATH));
    }

    #[test]
    fn test_unexpected_type_replaces_typed_value() {
        let mut registry = DeviceRegistry::new();
        let events = vec![
            props(&[("Address", ADDRESS.into()), ("Name", "sensor".into())]),
            props(&[("Name", 7u32.into())]),
        ];
        let mut folded = PropertyMap::new();
        for event in &events {
            registry.merge_properties(PATH, DEVICE_INTERFACE, event, &[]);
            folded.extend(event.clone());
        }
        let record = registry.get(PATH).unwrap();
        assert_eq!(record.name, None);
        assert_eq!(record.properties(), folded);

        registry.merge_properties(PATH, DEVICE_INTERFACE, &props(&[("Name", "back".into())]), &[]);
        let record = registry.get(PATH).unwrap();
        assert_eq!(record.name.as_deref(), Some("back"));
        assert!(!record.other.contains_key("Name"));
    }

    #[test]
    fn test_skip_duplicate_policy() {
        let unnamed = DeviceRecord {
            address: Some(ADDRESS.into()),
            ..Default::default()
        };
        let named = DeviceRecord {
            name: Some("sensor".into()),
            ..unnamed.clone()
        };
        let logged_unnamed = DeviceRecord { logged: true, ..unnamed.clone() };
        let logged_named = DeviceRecord { logged: true, ..named.clone() };

        // never skip before the first report
        assert!(!DeviceRegistry::skip_duplicate(&unnamed, &named));
        // name appeared or vanished after the report
        assert!(DeviceRegistry::skip_duplicate(&logged_unnamed, &named));
        assert!(DeviceRegistry::skip_duplicate(&logged_named, &unnamed));
        // name presence unchanged
        assert!(!DeviceRegistry::skip_duplicate(&logged_named, &named));
        assert!(!DeviceRegistry::skip_duplicate(&logged_unnamed, &unnamed));
    }

    #[test]
    fn test_in_flight_marker() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.begin_connect(ADDRESS));
        assert!(!registry.begin_connect(ADDRESS));
        assert!(registry.is_connecting(ADDRESS));
        registry.finish_connect(ADDRESS);
        assert!(registry.begin_connect(ADDRESS));
    }

    #[test]
    fn test_report_formats_class_as_hex() {
        let record = DeviceRecord::from_properties(&props(&[
            ("Address", ADDRESS.into()),
            ("Class", 0x5a020cu32.into()),
        ]));
        let report = record.to_string();
        assert!(report.starts_with("[ B8:27:EB:00:00:01 ]"));
        assert!(report.contains("Class = 0x5a020c"));
    }
}
