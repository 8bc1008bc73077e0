//! Service and characteristic resolution
//! Walks a connected device's object tree and binds the characteristics the
//! central knows how to use.

use std::sync::{Arc, Mutex};

use log::{debug, info};
use uuid::Uuid;

use crate::bus::{Bus, GATT_CHARACTERISTIC_INTERFACE, GATT_SERVICE_INTERFACE, PropertyMap};
use crate::core::bluetooth::error::GattError;
use crate::core::bluetooth::types::{
    KnownCharacteristic, ResolutionReport, ResolvedCharacteristic, ResolvedCharacteristicSet,
};
use crate::core::gatt::CharacteristicFlags;

#[derive(Clone)]
pub struct GattResolver {
    bus: Arc<dyn Bus>,
    resolved: Arc<Mutex<ResolvedCharacteristicSet>>,
}

impl GattResolver {
    pub fn new(bus: Arc<dyn Bus>, resolved: Arc<Mutex<ResolvedCharacteristicSet>>) -> Self {
        Self { bus, resolved }
    }

    /// Enumerates the services under `device_path` and binds every known
    /// characteristic found among their children to `address`.
    pub async fn resolve(&self, address: &str, device_path: &str) -> Result<ResolutionReport, GattError> {
        let objects = self.bus.managed_objects().await?;
        let prefix = format!("{}/", device_path);

        let mut services: Vec<(&String, &PropertyMap)> = Vec::new();
        let mut characteristics: Vec<(&String, &PropertyMap)> = Vec::new();
        for (path, interfaces) in objects.range(prefix.clone()..) {
            if !path.starts_with(&prefix) {
                break;
            }
            if let Some(properties) = interfaces.get(GATT_SERVICE_INTERFACE) {
                services.push((path, properties));
            } else if let Some(properties) = interfaces.get(GATT_CHARACTERISTIC_INTERFACE) {
                characteristics.push((path, properties));
            }
        }

        let mut report = ResolutionReport::default();
        let mut bindings = Vec::new();

        for (service_path, service_properties) in services {
            let Some(service_uuid) = parse_uuid(service_properties) else {
                debug!("Service {} has no UUID yet, skipping", service_path);
                continue;
            };
            info!("Service {} at {}", service_uuid, service_path);
            report.services.push(service_uuid);

            let children_prefix = format!("{}/", service_path);
            for (path, properties) in characteristics
                .iter()
                .filter(|(path, _)| path.starts_with(&children_prefix))
            {
                let Some(uuid) = parse_uuid(properties) else {
                    debug!("Characteristic {} has no UUID yet, skipping", path);
                    continue;
                };
                let Some(kind) = KnownCharacteristic::from_uuid(uuid) else {
                    info!("{}", GattError::UnrecognizedCharacteristic(uuid));
                    report.unrecognized.push(uuid);
                    continue;
                };
                let flags = properties
                    .get("Flags")
                    .and_then(|f| f.as_str_list())
                    .map(CharacteristicFlags::from_flags)
                    .unwrap_or_default();
                info!("Resolved {:?} characteristic at {}", kind, path);
                report.bound.push(kind);
                bindings.push(ResolvedCharacteristic {
                    kind,
                    path: path.to_string(),
                    service_path: service_path.clone(),
                    device_address: address.to_string(),
                    flags,
                });
            }
        }

        let mut resolved = self.resolved.lock().unwrap();
        for binding in bindings {
            resolved.bind(binding);
        }
        Ok(report)
    }
}

fn parse_uuid(properties: &PropertyMap) -> Option<Uuid> {
    properties
        .get("UUID")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}
