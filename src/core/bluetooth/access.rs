//! Read and write against resolved characteristics.

use std::sync::{Arc, Mutex};

use log::{debug, error};
use uuid::Uuid;

use crate::bus::{Bus, MethodCall};
use crate::core::bluetooth::constants::{UUID_LED_CHARACTERISTIC, UUID_TEMPERATURE};
use crate::core::bluetooth::error::GattError;
use crate::core::bluetooth::types::ResolvedCharacteristicSet;
use crate::core::gatt::{LedState, decode_temperature};

#[derive(Clone)]
pub struct CharacteristicAccess {
    bus: Arc<dyn Bus>,
    resolved: Arc<Mutex<ResolvedCharacteristicSet>>,
}

impl CharacteristicAccess {
    pub fn new(bus: Arc<dyn Bus>, resolved: Arc<Mutex<ResolvedCharacteristicSet>>) -> Self {
        Self { bus, resolved }
    }

    fn path_of(&self, uuid: Uuid) -> Result<String, GattError> {
        self.resolved
            .lock()
            .unwrap()
            .get_by_uuid(uuid)
            .map(|c| c.path.clone())
            .ok_or(GattError::NotResolved(uuid))
    }

    /// Reads the raw value of the characteristic bound to `uuid`.
    pub async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, GattError> {
        let path = self.path_of(uuid)?;
        let value = self
            .bus
            .call(&path, MethodCall::ReadValue)
            .await
            .inspect_err(|e| error!("Failed to read {}: {}", uuid, e))?;
        debug!("Read {:02x?} from {}", value, path);
        Ok(value)
    }

    /// Writes `value` as-is to the characteristic bound to `uuid`.
    pub async fn write(&self, uuid: Uuid, value: &[u8]) -> Result<(), GattError> {
        let path = self.path_of(uuid)?;
        self.bus
            .call(&path, MethodCall::WriteValue(value.to_vec()))
            .await
            .inspect_err(|e| error!("Failed to write {}: {}", uuid, e))?;
        debug!("Wrote {:02x?} to {}", value, path);
        Ok(())
    }

    /// Temperature in degrees Celsius.
    pub async fn read_temperature(&self) -> Result<f32, GattError> {
        let value = self.read(UUID_TEMPERATURE).await?;
        decode_temperature(&value)
            .ok_or_else(|| GattError::Failed(format!("malformed temperature value {:02x?}", value)))
    }

    pub async fn read_led(&self) -> Result<LedState, GattError> {
        let value = self.read(UUID_LED_CHARACTERISTIC).await?;
        match value.as_slice() {
            [byte] => Ok(LedState::from_byte(*byte)),
            _ => Err(GattError::InvalidValueLength),
        }
    }

    pub async fn write_led(&self, state: LedState) -> Result<(), GattError> {
        self.write(UUID_LED_CHARACTERISTIC, &[state.to_byte()]).await
    }
}
