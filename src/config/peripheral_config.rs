use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    ADVERTISING_NAME, BATTERY_DRAIN_INTERVAL_MS, HEART_RATE_INTERVAL_MS, MANUFACTURER_ID,
    TEMPERATURE_INTERVAL_MS, UUID_ENVIRONMENTAL_SENSING_SERVICE,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    /// Advertised local name
    pub local_name: String,

    pub manufacturer_id: u16,
    pub manufacturer_data: Vec<u8>,

    /// Ask the controller to include the TX power level
    pub include_tx_power: bool,

    /// Service UUIDs put in the advertisement
    pub advertised_services: Vec<Uuid>,

    /// Battery level at startup, in percent
    pub initial_battery_level: u8,

    pub heart_rate_interval_ms: u64,
    pub battery_drain_interval_ms: u64,
    pub temperature_interval_ms: u64,

    /// Address the simulated peripheral gets on the loopback bus
    pub loopback_address: String,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            local_name: ADVERTISING_NAME.to_string(),
            manufacturer_id: MANUFACTURER_ID,
            manufacturer_data: vec![0x70, 0x74],
            include_tx_power: true,
            advertised_services: vec![UUID_ENVIRONMENTAL_SENSING_SERVICE],
            initial_battery_level: 100,
            heart_rate_interval_ms: HEART_RATE_INTERVAL_MS,
            battery_drain_interval_ms: BATTERY_DRAIN_INTERVAL_MS,
            temperature_interval_ms: TEMPERATURE_INTERVAL_MS,
            loopback_address: "B8:27:EB:00:00:01".to_string(),
        }
    }
}
