use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    CONNECT_RETRY_DELAY_MS, DEFAULT_ADAPTER_PATH, MAX_CONNECT_RETRIES,
    UUID_ENVIRONMENTAL_SENSING_SERVICE,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    /// Object path of the adapter used for discovery and connections
    pub adapter_path: String,

    /// Service UUIDs a device must advertise to be reported.
    /// An empty list disables filtering.
    pub discovery_filter: Vec<Uuid>,

    /// Connect to every newly discovered device
    pub auto_connect: bool,

    /// Connection attempts per connect request
    pub max_connect_retries: u32,

    /// Delay before the first retry; doubles on each further retry
    pub connect_retry_delay_ms: u64,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            adapter_path: DEFAULT_ADAPTER_PATH.to_string(),
            discovery_filter: vec![UUID_ENVIRONMENTAL_SENSING_SERVICE],
            auto_connect: true,
            max_connect_retries: MAX_CONNECT_RETRIES,
            connect_retry_delay_ms: CONNECT_RETRY_DELAY_MS,
        }
    }
}
