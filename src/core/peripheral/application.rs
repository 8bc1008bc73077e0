//! GATT application: the object tree the peripheral exports and the
//! dispatcher for remote calls against it.

use log::debug;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::bus::{
    GATT_CHARACTERISTIC_INTERFACE, GATT_SERVICE_INTERFACE, InterfaceMap, MethodCall, ObjectTree,
    PropertyMap, ReqError,
};
use crate::core::peripheral::characteristic::{LocalCharacteristic, LocalService, Notifier, ValueChanged};

const VALUE_CHANNEL_CAPACITY: usize = 64;

pub struct Application {
    path: String,
    services: Vec<LocalService>,
    values: broadcast::Sender<ValueChanged>,
}

impl Application {
    pub fn new(path: impl Into<String>) -> Self {
        let (values, _) = broadcast::channel(VALUE_CHANNEL_CAPACITY);
        Self {
            path: path.into(),
            services: Vec::new(),
            values,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Handle characteristics use to push value updates.
    pub fn notifier(&self) -> Notifier {
        Notifier::new(self.values.clone())
    }

    pub fn subscribe_values(&self) -> broadcast::Receiver<ValueChanged> {
        self.values.subscribe()
    }

    pub fn add_service(&mut self, service: LocalService) {
        self.services.push(service);
    }

    pub fn services(&self) -> &[LocalService] {
        &self.services
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&LocalCharacteristic> {
        self.services
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.uuid == uuid)
    }

    /// The exported objects with `root` standing in for the application
    /// path: `<root>/service<i>` and `<root>/service<i>/char<j>`.
    pub fn object_tree_at(&self, root: &str) -> ObjectTree {
        let mut tree = ObjectTree::new();
        for (i, service) in self.services.iter().enumerate() {
            let service_path = service_path(root, i);

            let mut properties = PropertyMap::new();
            properties.insert("UUID".into(), service.uuid.to_string().into());
            properties.insert("Primary".into(), service.primary.into());
            tree.insert(
                service_path.clone(),
                InterfaceMap::from([(GATT_SERVICE_INTERFACE.to_string(), properties)]),
            );

            for (j, characteristic) in service.characteristics.iter().enumerate() {
                let mut properties = PropertyMap::new();
                properties.insert("UUID".into(), characteristic.uuid.to_string().into());
                properties.insert("Service".into(), service_path.clone().into());
                properties.insert("Flags".into(), characteristic.flags().to_flags().into());
                if characteristic.flags().notify {
                    properties.insert("Notifying".into(), characteristic.is_notifying().into());
                }
                tree.insert(
                    characteristic_path(root, i, j),
                    InterfaceMap::from([(GATT_CHARACTERISTIC_INTERFACE.to_string(), properties)]),
                );
            }
        }
        tree
    }

    pub fn object_tree(&self) -> ObjectTree {
        self.object_tree_at(&self.path)
    }

    /// Path of the characteristic with `uuid` under `root`.
    pub fn characteristic_path_at(&self, root: &str, uuid: Uuid) -> Option<String> {
        self.services.iter().enumerate().find_map(|(i, service)| {
            service
                .characteristics
                .iter()
                .position(|c| c.uuid == uuid)
                .map(|j| characteristic_path(root, i, j))
        })
    }

    fn characteristic_at(&self, root: &str, path: &str) -> Option<&LocalCharacteristic> {
        let rest = path.strip_prefix(root)?.strip_prefix("/service")?;
        let (service, characteristic) = rest.split_once("/char")?;
        let service: usize = service.parse().ok()?;
        let characteristic: usize = characteristic.parse().ok()?;
        self.services.get(service)?.characteristics.get(characteristic)
    }

    /// Routes a characteristic method call addressed to `path`.
    /// Returns `None` when no characteristic lives at `path`.
    pub fn dispatch(&self, root: &str, path: &str, call: &MethodCall) -> Option<Result<Vec<u8>, ReqError>> {
        let characteristic = self.characteristic_at(root, path)?;
        debug!("{} on {} ({})", call.name(), path, characteristic.uuid);
        let result = match call {
            MethodCall::ReadValue => characteristic.read_value(),
            MethodCall::WriteValue(value) => characteristic.write_value(value).map(|_| Vec::new()),
            MethodCall::StartNotify => characteristic.start_notify().map(|_| Vec::new()),
            MethodCall::StopNotify => characteristic.stop_notify().map(|_| Vec::new()),
            _ => Err(ReqError::NotSupported),
        };
        Some(result)
    }
}

pub fn service_path(root: &str, index: usize) -> String {
    format!("{}/service{}", root, index)
}

pub fn characteristic_path(root: &str, service: usize, characteristic: usize) -> String {
    format!("{}/char{}", service_path(root, service), characteristic)
}
