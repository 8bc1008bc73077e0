//! Peripheral role: simulated services exported through a `Registrar`.

pub mod advertisement;
pub mod application;
pub mod battery;
pub mod characteristic;
pub mod environment;
pub mod heart_rate;
pub mod led;
pub mod notify;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::info;
use tokio_util::sync::CancellationToken;

pub use advertisement::Advertisement;
pub use application::Application;
pub use characteristic::{
    LocalCharacteristic, LocalService, Notifiable, Notifier, Readable, ValueChanged, Writable,
};

use crate::bus::Registrar;
use crate::config::PeripheralConfig;
use crate::core::bluetooth::constants::APPLICATION_PATH;
use battery::{BatteryLevel, battery_service};
use environment::{TemperatureSensor, environmental_sensing_service};
use heart_rate::{HeartRateState, heart_rate_service};
use led::{Led, led_service};
use notify::{NotifySession, spawn_periodic};

/// The simulated peripheral: heart rate, battery, LED and environmental
/// sensing services plus the advertisement announcing them.
pub struct PeripheralSimulator {
    application: Arc<Application>,
    advertisement: Advertisement,
    battery: Arc<BatteryLevel>,
    led: Arc<Led>,
    heart_rate: Arc<Mutex<HeartRateState>>,
    battery_drain_interval: Duration,
    /// Active once startup completed; owns the battery drain timer
    drain: NotifySession,
    shutdown: CancellationToken,
}

impl PeripheralSimulator {
    pub fn new(config: &PeripheralConfig) -> Self {
        let shutdown = CancellationToken::new();
        let mut application = Application::new(APPLICATION_PATH);
        let notifier = application.notifier();

        let heart_rate = Arc::new(Mutex::new(HeartRateState::new()));
        let battery = Arc::new(BatteryLevel::new(
            config.initial_battery_level,
            notifier.clone(),
            shutdown.clone(),
        ));
        let led = Arc::new(Led::new());
        let temperature = Arc::new(TemperatureSensor::new(
            notifier.clone(),
            Duration::from_millis(config.temperature_interval_ms),
            shutdown.clone(),
        ));

        application.add_service(heart_rate_service(
            heart_rate.clone(),
            notifier,
            Duration::from_millis(config.heart_rate_interval_ms),
            shutdown.clone(),
        ));
        application.add_service(battery_service(battery.clone()));
        application.add_service(led_service(led.clone()));
        application.add_service(environmental_sensing_service(temperature));

        Self {
            application: Arc::new(application),
            advertisement: Advertisement::from_config(config),
            battery,
            led,
            heart_rate,
            battery_drain_interval: Duration::from_millis(config.battery_drain_interval_ms),
            drain: NotifySession::new(shutdown.clone()),
            shutdown,
        }
    }

    /// Registers the advertisement, then the application, then starts the
    /// battery drain. A registration failure aborts startup; a simulator
    /// that already started refuses to start again.
    pub async fn start<R: Registrar + ?Sized>(&self, registrar: &R) -> Result<()> {
        if self.drain.is_active() {
            bail!("Peripheral simulator already started");
        }
        registrar
            .register_advertisement(&self.advertisement)
            .await
            .context("Failed to register advertisement")?;
        info!("Advertisement registered");

        registrar
            .register_application(self.application.clone())
            .await
            .context("Failed to register GATT application")?;
        info!("GATT application registered");

        if let Some(token) = self.drain.start() {
            let battery = self.battery.clone();
            spawn_periodic(self.battery_drain_interval, token, move || battery.drain());
        }
        Ok(())
    }

    pub fn application(&self) -> Arc<Application> {
        self.application.clone()
    }

    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }

    pub fn battery_level(&self) -> u8 {
        self.battery.level()
    }

    pub fn led(&self) -> &Led {
        &self.led
    }

    pub fn energy_expended(&self) -> u16 {
        self.heart_rate.lock().unwrap().energy_expended()
    }

    /// Cancels every timer the simulator started.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        info!("Peripheral simulator stopped");
    }
}

impl Drop for PeripheralSimulator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
