//! Simulated Environmental Sensing service (0x181A) exposing a temperature
//! sensor that reports whole degrees Celsius in a single byte.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::bus::ReqError;
use crate::core::bluetooth::constants::{UUID_ENVIRONMENTAL_SENSING_SERVICE, UUID_TEMPERATURE};
use crate::core::peripheral::characteristic::{
    LocalCharacteristic, LocalService, Notifiable, Notifier, Readable,
};
use crate::core::peripheral::notify::{NotifySession, spawn_periodic};

pub const MIN_TEMPERATURE: u8 = 10;
pub const MAX_TEMPERATURE: u8 = 50;
const INITIAL_TEMPERATURE: u8 = 22;

/// Next reading of a bounded random walk of at most one degree per step.
pub fn step_temperature<R: Rng + ?Sized>(current: u8, rng: &mut R) -> u8 {
    let delta: i16 = rng.gen_range(-1..=1);
    (current as i16 + delta).clamp(MIN_TEMPERATURE as i16, MAX_TEMPERATURE as i16) as u8
}

pub struct TemperatureSensor {
    celsius: Arc<Mutex<u8>>,
    session: NotifySession,
    notifier: Notifier,
    period: Duration,
}

impl TemperatureSensor {
    pub fn new(notifier: Notifier, period: Duration, shutdown: CancellationToken) -> Self {
        Self {
            celsius: Arc::new(Mutex::new(INITIAL_TEMPERATURE)),
            session: NotifySession::new(shutdown),
            notifier,
            period,
        }
    }

    pub fn celsius(&self) -> u8 {
        *self.celsius.lock().unwrap()
    }
}

impl Readable for TemperatureSensor {
    fn read_value(&self) -> Result<Vec<u8>, ReqError> {
        let celsius = {
            let mut celsius = self.celsius.lock().unwrap();
            *celsius = step_temperature(*celsius, &mut rand::thread_rng());
            *celsius
        };
        debug!("Temperature read: {}", celsius);
        Ok(vec![celsius])
    }
}

impl Notifiable for TemperatureSensor {
    fn start_notify(&self) {
        let Some(token) = self.session.start() else {
            info!("Temperature already notifying, nothing to do");
            return;
        };
        let celsius = self.celsius.clone();
        let notifier = self.notifier.clone();
        spawn_periodic(self.period, token, move || {
            let value = {
                let mut celsius = celsius.lock().unwrap();
                *celsius = step_temperature(*celsius, &mut rand::thread_rng());
                *celsius
            };
            notifier.notify(UUID_TEMPERATURE, vec![value]);
        });
    }

    fn stop_notify(&self) {
        if !self.session.stop() {
            info!("Temperature not notifying, nothing to do");
        }
    }

    fn is_notifying(&self) -> bool {
        self.session.is_active()
    }
}

pub fn environmental_sensing_service(sensor: Arc<TemperatureSensor>) -> LocalService {
    LocalService::new(UUID_ENVIRONMENTAL_SENSING_SERVICE, true).with_characteristic(
        LocalCharacteristic::new(UUID_TEMPERATURE)
            .with_read(sensor.clone())
            .with_notify(sensor),
    )
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_random_walk_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut celsius = MIN_TEMPERATURE;
        for _ in 0..10_000 {
            let next = step_temperature(celsius, &mut rng);
            assert!((MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&next));
            assert!((next as i16 - celsius as i16).abs() <= 1);
            celsius = next;
        }
    }
}
