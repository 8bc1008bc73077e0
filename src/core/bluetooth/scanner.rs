use std::sync::Arc;

use log::{error, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{Bus, BusError, DEVICE_INTERFACE, MethodCall, PropertiesChanged};

/// Receives every device property change, in arrival order.
pub type EventHandler = Arc<dyn Fn(PropertiesChanged) + Send + Sync>;

/// Starts and stops discovery on one adapter and pumps device property
/// changes into an event handler.
pub struct DiscoveryController {
    bus: Arc<dyn Bus>,
    adapter_path: String,
    handler: EventHandler,
    cancel_token: CancellationToken,
    pump_handle: Option<JoinHandle<()>>,
    scanning: bool,
}

impl DiscoveryController {
    pub fn new(
        bus: Arc<dyn Bus>,
        adapter_path: impl Into<String>,
        handler: EventHandler,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            bus,
            adapter_path: adapter_path.into(),
            handler,
            cancel_token,
            pump_handle: None,
            scanning: false,
        }
    }

    /// Subscribes to device property changes once; later calls are no-ops.
    pub fn ensure_subscribed(&mut self) {
        if self.pump_handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let mut events = self.bus.subscribe(DEVICE_INTERFACE);
        let handler = self.handler.clone();
        let cancel_token = self.cancel_token.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => handler(event),
                        None => {
                            info!("Device event stream has ended.");
                            break;
                        }
                    },
                    _ = cancel_token.cancelled() => break,
                }
            }
        });
        self.pump_handle = Some(handle);
    }

    /// Applies the service filter and starts scanning. Calling it again
    /// while scanning re-issues the adapter calls only.
    pub async fn start(&mut self, filter: &[Uuid]) -> Result<(), BusError> {
        self.ensure_subscribed();
        self.bus
            .call(
                &self.adapter_path,
                MethodCall::SetDiscoveryFilter { uuids: filter.to_vec() },
            )
            .await?;
        self.bus
            .call(&self.adapter_path, MethodCall::StartDiscovery)
            .await
            .inspect_err(|e| error!("Failed to start discovery: {}", e))?;
        self.scanning = true;
        info!("Discovery started on {} with filter {:?}", self.adapter_path, filter);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), BusError> {
        info!("Stopping discovery.");
        self.bus
            .call(&self.adapter_path, MethodCall::StopDiscovery)
            .await
            .inspect_err(|e| error!("Failed to stop discovery: {}", e))?;
        self.scanning = false;
        Ok(())
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Stops the event pump and waits for it to finish.
    pub async fn shutdown(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.pump_handle.take() {
            match handle.await {
                Ok(()) => info!("Event pump finished."),
                Err(e) if e.is_cancelled() => info!("Event pump was cancelled."),
                Err(e) => error!("Event pump finished with an unexpected join error: {:?}", e),
            }
        }
    }
}
