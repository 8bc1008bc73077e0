//! Peripheral-role registrar backed by BlueZ through bluer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bluer::adv::{Advertisement as LeAdvertisement, AdvertisementHandle, Feature, Type};
use bluer::gatt::local::{
    Application as GattApplication, ApplicationHandle, Characteristic, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicRead, CharacteristicReadRequest,
    CharacteristicWrite, CharacteristicWriteMethod, CharacteristicWriteRequest, Service,
};
use bluer::Adapter;
use futures_util::FutureExt;
use log::{debug, error, info};
use tokio::sync::broadcast::error::RecvError;

use crate::bus::{BusError, Registrar, ReqError};
use crate::core::peripheral::{Advertisement, Application, LocalCharacteristic};

impl From<ReqError> for bluer::gatt::local::ReqError {
    fn from(e: ReqError) -> Self {
        match e {
            ReqError::NotSupported => Self::NotSupported,
            ReqError::NotPermitted => Self::NotPermitted,
            ReqError::InvalidValueLength => Self::InvalidValueLength,
            ReqError::InvalidArgs | ReqError::Failed(_) => Self::Failed,
        }
    }
}

fn transport(e: bluer::Error) -> BusError {
    BusError::Transport(e.to_string())
}

/// Registers advertisements and GATT applications with bluetoothd.
/// Registrations stay active for as long as the registrar lives.
pub struct BluerRegistrar {
    adapter: Adapter,
    advertisements: Mutex<Vec<AdvertisementHandle>>,
    applications: Mutex<Vec<ApplicationHandle>>,
}

impl BluerRegistrar {
    /// Powers up `adapter_name`, or the default adapter when `None`.
    pub async fn new(adapter_name: Option<&str>) -> Result<Self, BusError> {
        let session = bluer::Session::new().await.map_err(transport)?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name).map_err(transport)?,
            None => session.default_adapter().await.map_err(transport)?,
        };
        adapter.set_powered(true).await.map_err(transport)?;
        info!(
            "Initialized Bluetooth adapter {} with address {}",
            adapter.name(),
            adapter.address().await.map_err(transport)?
        );
        Ok(Self {
            adapter,
            advertisements: Mutex::new(Vec::new()),
            applications: Mutex::new(Vec::new()),
        })
    }

    fn characteristic(application: &Arc<Application>, local: &LocalCharacteristic) -> Characteristic {
        let flags = local.flags();
        let uuid = local.uuid;

        let read = flags.read.then(|| {
            let local = local.clone();
            CharacteristicRead {
                read: true,
                fun: Box::new(move |_request: CharacteristicReadRequest| {
                    let local = local.clone();
                    async move { local.read_value().map_err(Into::into) }.boxed()
                }),
                ..Default::default()
            }
        });

        let write = flags.write.then(|| {
            let local = local.clone();
            CharacteristicWrite {
                write: true,
                method: CharacteristicWriteMethod::Fun(Box::new(
                    move |value: Vec<u8>, _request: CharacteristicWriteRequest| {
                        let local = local.clone();
                        async move { local.write_value(&value).map_err(Into::into) }.boxed()
                    },
                )),
                ..Default::default()
            }
        });

        let notify = flags.notify.then(|| {
            let local = local.clone();
            let application = application.clone();
            CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |mut notifier| {
                    let local = local.clone();
                    let mut values = application.subscribe_values();
                    async move {
                        if let Err(e) = local.start_notify() {
                            error!("StartNotify on {} rejected: {}", uuid, e);
                            return;
                        }
                        debug!("Notification session on {} started", uuid);
                        loop {
                            tokio::select! {
                                changed = values.recv() => match changed {
                                    Ok(changed) if changed.characteristic == uuid => {
                                        if let Err(e) = notifier.notify(changed.value).await {
                                            error!("Failed to send notification on {}: {}", uuid, e);
                                            break;
                                        }
                                    }
                                    Ok(_) => {}
                                    Err(RecvError::Lagged(skipped)) => {
                                        debug!("Notification session on {} skipped {} value(s)", uuid, skipped);
                                    }
                                    Err(RecvError::Closed) => break,
                                },
                                _ = notifier.stopped() => break,
                            }
                        }
                        let _ = local.stop_notify();
                        debug!("Notification session on {} stopped", uuid);
                    }
                    .boxed()
                })),
                ..Default::default()
            }
        });

        Characteristic {
            uuid,
            read,
            write,
            notify,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Registrar for BluerRegistrar {
    async fn register_advertisement(&self, advertisement: &Advertisement) -> Result<(), BusError> {
        let mut le_advertisement = LeAdvertisement {
            advertisement_type: Type::Peripheral,
            service_uuids: advertisement.service_uuids.iter().copied().collect(),
            manufacturer_data: advertisement.manufacturer_data.clone(),
            local_name: Some(advertisement.local_name.clone()),
            discoverable: Some(true),
            ..Default::default()
        };
        if advertisement.include_tx_power {
            le_advertisement.system_includes.insert(Feature::TxPower);
        }

        let handle = self
            .adapter
            .advertise(le_advertisement)
            .await
            .inspect_err(|e| error!("Failed to register advertisement: {}", e))
            .map_err(transport)?;
        self.advertisements.lock().unwrap().push(handle);
        info!("Advertisement {} registered", advertisement.path);
        Ok(())
    }

    async fn register_application(&self, application: Arc<Application>) -> Result<(), BusError> {
        let services = application
            .services()
            .iter()
            .map(|service| Service {
                uuid: service.uuid,
                primary: service.primary,
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|c| Self::characteristic(&application, c))
                    .collect(),
                ..Default::default()
            })
            .collect();

        let handle = self
            .adapter
            .serve_gatt_application(GattApplication {
                services,
                ..Default::default()
            })
            .await
            .inspect_err(|e| error!("Failed to register application: {}", e))
            .map_err(transport)?;
        self.applications.lock().unwrap().push(handle);
        info!("GATT application {} registered", application.path());
        Ok(())
    }
}
