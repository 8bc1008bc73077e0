use std::sync::{Arc, Mutex};

use log::info;

use crate::bus::ReqError;
use crate::core::bluetooth::constants::{UUID_LED_CHARACTERISTIC, UUID_LED_SERVICE};
use crate::core::gatt::LedState;
use crate::core::peripheral::characteristic::{LocalCharacteristic, LocalService, Readable, Writable};

/// The LED actuator: one byte, 0 for off and anything else for on.
#[derive(Debug)]
pub struct Led {
    state: Mutex<LedState>,
}

impl Led {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedState::Off),
        }
    }

    pub fn state(&self) -> LedState {
        *self.state.lock().unwrap()
    }
}

impl Default for Led {
    fn default() -> Self {
        Self::new()
    }
}

impl Readable for Led {
    fn read_value(&self) -> Result<Vec<u8>, ReqError> {
        Ok(vec![self.state().to_byte()])
    }
}

impl Writable for Led {
    fn write_value(&self, value: &[u8]) -> Result<(), ReqError> {
        let [byte] = value else {
            return Err(ReqError::InvalidValueLength);
        };
        let state = LedState::from_byte(*byte);
        *self.state.lock().unwrap() = state;
        info!("LED turned {}", state);
        Ok(())
    }
}

pub fn led_service(led: Arc<Led>) -> LocalService {
    LocalService::new(UUID_LED_SERVICE, true).with_characteristic(
        LocalCharacteristic::new(UUID_LED_CHARACTERISTIC)
            .with_read(led.clone())
            .with_write(led),
    )
}
