//! Constants used throughout the application
//! This module contains the UUIDs, object paths and timing defaults shared by
//! the central and peripheral roles.

use uuid::Uuid;

/// Object path of the default adapter
pub const DEFAULT_ADAPTER_PATH: &str = "/org/bluez/hci0";

/// Object path under which the peripheral application is exported
pub const APPLICATION_PATH: &str = "/org/bluez/example";

/// Object path of the peripheral advertisement
pub const ADVERTISEMENT_PATH: &str = "/org/bluez/example/advertisement0";

/// Standard Bluetooth Service UUIDs
pub const UUID_ENVIRONMENTAL_SENSING_SERVICE: Uuid = Uuid::from_u128(0x0000181a_0000_1000_8000_00805f9b34fb);
pub const UUID_HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_TEMPERATURE: Uuid = Uuid::from_u128(0x00002a6e_0000_1000_8000_00805f9b34fb);
pub const UUID_HEART_RATE_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);
pub const UUID_BODY_SENSOR_LOCATION: Uuid = Uuid::from_u128(0x00002a38_0000_1000_8000_00805f9b34fb);
pub const UUID_HEART_RATE_CONTROL_POINT: Uuid = Uuid::from_u128(0x00002a39_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// The custom LED actuator service and its characteristic
pub const UUID_LED_SERVICE: Uuid = Uuid::from_u128(0x00001234_0000_1000_8000_00805f9b34fb);
pub const UUID_LED_CHARACTERISTIC: Uuid = Uuid::from_u128(0x00005678_0000_1000_8000_00805f9b34fb);

/// Manufacturer id used in the advertisement (reserved for testing)
pub const MANUFACTURER_ID: u16 = 0xFFFF;

/// Local name advertised by the peripheral
pub const ADVERTISING_NAME: &str = "Raspbery_Pi_BLE";

/// Maximum number of connection attempts per connect request
pub const MAX_CONNECT_RETRIES: u32 = 3;

/// Delay before the first connection retry in milliseconds, doubled per retry
pub const CONNECT_RETRY_DELAY_MS: u64 = 1000;

/// Heart-rate measurement notification period in milliseconds
pub const HEART_RATE_INTERVAL_MS: u64 = 1000;

/// Battery drain period in milliseconds
pub const BATTERY_DRAIN_INTERVAL_MS: u64 = 5000;

/// Battery level lost per drain tick
pub const BATTERY_DRAIN_STEP: u8 = 2;

/// Temperature notification period in milliseconds
pub const TEMPERATURE_INTERVAL_MS: u64 = 2000;

/// Body sensor location reported by the heart-rate service (chest)
pub const BODY_SENSOR_LOCATION_CHEST: u8 = 0x01;
