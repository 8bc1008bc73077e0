use std::collections::BTreeMap;

use uuid::Uuid;

use crate::config::PeripheralConfig;
use crate::core::bluetooth::constants::ADVERTISEMENT_PATH;

/// LE advertisement registered once at peripheral startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub path: String,
    pub local_name: String,
    /// Manufacturer id -> payload
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    pub service_uuids: Vec<Uuid>,
    pub include_tx_power: bool,
}

impl Advertisement {
    pub fn from_config(config: &PeripheralConfig) -> Self {
        let mut manufacturer_data = BTreeMap::new();
        manufacturer_data.insert(config.manufacturer_id, config.manufacturer_data.clone());
        Self {
            path: ADVERTISEMENT_PATH.to_string(),
            local_name: config.local_name.clone(),
            manufacturer_data,
            service_uuids: config.advertised_services.clone(),
            include_tx_power: config.include_tx_power,
        }
    }

    pub fn advertises(&self, uuid: &Uuid) -> bool {
        self.service_uuids.contains(uuid)
    }
}
