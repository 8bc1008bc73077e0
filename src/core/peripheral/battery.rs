//! Simulated Battery service (0x180F) with a draining battery.

use std::sync::{Arc, Mutex};

use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::bus::ReqError;
use crate::core::bluetooth::constants::{BATTERY_DRAIN_STEP, UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE};
use crate::core::peripheral::characteristic::{
    LocalCharacteristic, LocalService, Notifiable, Notifier, Readable,
};
use crate::core::peripheral::notify::NotifySession;

/// Battery Level (0x2A19). The level drops by two points per drain, floored
/// at zero, and is pushed to the subscriber if there is one.
pub struct BatteryLevel {
    level: Mutex<u8>,
    session: NotifySession,
    notifier: Notifier,
}

impl BatteryLevel {
    pub fn new(initial_level: u8, notifier: Notifier, shutdown: CancellationToken) -> Self {
        Self {
            level: Mutex::new(initial_level.min(100)),
            session: NotifySession::new(shutdown),
            notifier,
        }
    }

    pub fn level(&self) -> u8 {
        *self.level.lock().unwrap()
    }

    /// One drain step.
    pub fn drain(&self) {
        let level = {
            let mut level = self.level.lock().unwrap();
            *level = level.saturating_sub(BATTERY_DRAIN_STEP);
            *level
        };
        debug!("Battery level drained: {}", level);
        self.notify_level(level);
    }

    fn notify_level(&self, level: u8) {
        if self.session.is_active() {
            self.notifier.notify(UUID_BATTERY_LEVEL, vec![level]);
        }
    }
}

impl Readable for BatteryLevel {
    fn read_value(&self) -> Result<Vec<u8>, ReqError> {
        let level = self.level();
        info!("Battery level read: {}", level);
        Ok(vec![level])
    }
}

impl Notifiable for BatteryLevel {
    fn start_notify(&self) {
        if self.session.start().is_none() {
            info!("Battery level already notifying, nothing to do");
            return;
        }
        self.notify_level(self.level());
    }

    fn stop_notify(&self) {
        if !self.session.stop() {
            info!("Battery level not notifying, nothing to do");
        }
    }

    fn is_notifying(&self) -> bool {
        self.session.is_active()
    }
}

pub fn battery_service(level: Arc<BatteryLevel>) -> LocalService {
    LocalService::new(UUID_BATTERY_SERVICE, true).with_characteristic(
        LocalCharacteristic::new(UUID_BATTERY_LEVEL)
            .with_read(level.clone())
            .with_notify(level),
    )
}
