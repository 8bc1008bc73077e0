//! Notification handling for resolved characteristics
//! This module subscribes to value updates of a remote characteristic and
//! forwards them as a stream of raw values.

use std::sync::{Arc, Mutex};

use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{Bus, GATT_CHARACTERISTIC_INTERFACE, MethodCall};
use crate::core::bluetooth::error::GattError;
use crate::core::bluetooth::types::ResolvedCharacteristicSet;

#[derive(Clone)]
pub struct NotificationHandler {
    bus: Arc<dyn Bus>,
    resolved: Arc<Mutex<ResolvedCharacteristicSet>>,
    shutdown: CancellationToken,
}

impl NotificationHandler {
    pub fn new(
        bus: Arc<dyn Bus>,
        resolved: Arc<Mutex<ResolvedCharacteristicSet>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bus,
            resolved,
            shutdown,
        }
    }

    fn path_of(&self, uuid: Uuid) -> Result<String, GattError> {
        self.resolved
            .lock()
            .unwrap()
            .get_by_uuid(uuid)
            .map(|c| c.path.clone())
            .ok_or(GattError::NotResolved(uuid))
    }

    /// Starts notifications on the characteristic bound to `uuid`.
    /// The returned stream ends when the session shuts down or the receiver
    /// is dropped.
    pub async fn subscribe(&self, uuid: Uuid) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, GattError> {
        let path = self.path_of(uuid)?;
        info!("Subscribing to notifications of {}...", uuid);

        // subscribe before StartNotify so the first value is not missed
        let mut changes = self.bus.subscribe(GATT_CHARACTERISTIC_INTERFACE);
        self.bus
            .call(&path, MethodCall::StartNotify)
            .await
            .inspect_err(|e| error!("Failed to start notifications on {}: {}", uuid, e))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = changes.recv() => {
                        let Some(change) = change else { break };
                        if change.path != path {
                            continue;
                        }
                        let Some(value) = change.changed.get("Value").and_then(|v| v.as_bytes()) else {
                            continue;
                        };
                        debug!("Notification from {}: {:02x?}", path, value);
                        if tx.send(value.to_vec()).is_err() {
                            break;
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            debug!("Stopped forwarding notifications of {}", path);
        });
        Ok(rx)
    }

    /// Stops notifications on the characteristic bound to `uuid`.
    pub async fn unsubscribe(&self, uuid: Uuid) -> Result<(), GattError> {
        let path = self.path_of(uuid)?;
        self.bus
            .call(&path, MethodCall::StopNotify)
            .await
            .inspect_err(|e| error!("Failed to stop notifications on {}: {}", uuid, e))?;
        info!("Notifications of {} stopped", uuid);
        Ok(())
    }
}
