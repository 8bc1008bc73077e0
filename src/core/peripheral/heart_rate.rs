//! Simulated Heart Rate service (0x180D).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::bus::ReqError;
use crate::core::bluetooth::constants::{
    BODY_SENSOR_LOCATION_CHEST, UUID_BODY_SENSOR_LOCATION, UUID_HEART_RATE_CONTROL_POINT,
    UUID_HEART_RATE_MEASUREMENT, UUID_HEART_RATE_SERVICE,
};
use crate::core::peripheral::characteristic::{
    LocalCharacteristic, LocalService, Notifiable, Notifier, Readable, Writable,
};
use crate::core::peripheral::notify::{NotifySession, spawn_periodic};

/// Heart rate value format is UINT8, sensor contact detected and supported
const FLAGS_BASE: u8 = 0x06;
/// Energy expended field present
const FLAG_ENERGY_EXPENDED: u8 = 0x08;
/// Every n-th measurement carries the energy expended field
const ENERGY_EXPENDED_EVERY: u64 = 10;
/// Control point opcode: reset energy expended
const RESET_ENERGY_EXPENDED: u8 = 0x01;

/// State owned by the service and shared by the measurement and control
/// point characteristics.
#[derive(Debug, Default)]
pub struct HeartRateState {
    energy_expended: u16,
    ticks: u64,
}

impl HeartRateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the next measurement and advances the counters.
    pub fn next_measurement<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<u8> {
        let mut value = vec![FLAGS_BASE, rng.gen_range(90..=130)];
        if self.ticks % ENERGY_EXPENDED_EVERY == 0 {
            value[0] |= FLAG_ENERGY_EXPENDED;
            value.extend_from_slice(&self.energy_expended.to_le_bytes());
        }
        self.energy_expended = self.energy_expended.saturating_add(1);
        self.ticks += 1;
        value
    }

    pub fn energy_expended(&self) -> u16 {
        self.energy_expended
    }

    pub fn reset_energy_expended(&mut self) {
        self.energy_expended = 0;
    }
}

/// Heart Rate Measurement (0x2A37), notify only.
pub struct HeartRateMeasurement {
    state: Arc<Mutex<HeartRateState>>,
    session: NotifySession,
    notifier: Notifier,
    period: Duration,
}

impl HeartRateMeasurement {
    pub fn new(
        state: Arc<Mutex<HeartRateState>>,
        notifier: Notifier,
        period: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state,
            session: NotifySession::new(shutdown),
            notifier,
            period,
        }
    }
}

impl Notifiable for HeartRateMeasurement {
    fn start_notify(&self) {
        let Some(token) = self.session.start() else {
            info!("Heart rate measurement already notifying, nothing to do");
            return;
        };
        let state = self.state.clone();
        let notifier = self.notifier.clone();
        spawn_periodic(self.period, token, move || {
            let value = state.lock().unwrap().next_measurement(&mut rand::thread_rng());
            debug!("Heart rate measurement: {:02x?}", value);
            notifier.notify(UUID_HEART_RATE_MEASUREMENT, value);
        });
    }

    fn stop_notify(&self) {
        if !self.session.stop() {
            info!("Heart rate measurement not notifying, nothing to do");
        }
    }

    fn is_notifying(&self) -> bool {
        self.session.is_active()
    }
}

/// Heart Rate Control Point (0x2A39), write only.
pub struct ControlPoint {
    state: Arc<Mutex<HeartRateState>>,
}

impl ControlPoint {
    pub fn new(state: Arc<Mutex<HeartRateState>>) -> Self {
        Self { state }
    }
}

impl Writable for ControlPoint {
    fn write_value(&self, value: &[u8]) -> Result<(), ReqError> {
        let [opcode] = value else {
            return Err(ReqError::InvalidValueLength);
        };
        if *opcode != RESET_ENERGY_EXPENDED {
            debug!("Unsupported control point opcode 0x{:02x}", opcode);
            return Err(ReqError::NotSupported);
        }
        self.state.lock().unwrap().reset_energy_expended();
        info!("Energy expended field reset");
        Ok(())
    }
}

/// Body Sensor Location (0x2A38), constant.
pub struct BodySensorLocation;

impl Readable for BodySensorLocation {
    fn read_value(&self) -> Result<Vec<u8>, ReqError> {
        Ok(vec![BODY_SENSOR_LOCATION_CHEST])
    }
}

/// Builds the Heart Rate service around one shared state.
pub fn heart_rate_service(
    state: Arc<Mutex<HeartRateState>>,
    notifier: Notifier,
    period: Duration,
    shutdown: CancellationToken,
) -> LocalService {
    let measurement = HeartRateMeasurement::new(state.clone(), notifier, period, shutdown);
    LocalService::new(UUID_HEART_RATE_SERVICE, true)
        .with_characteristic(
            LocalCharacteristic::new(UUID_HEART_RATE_MEASUREMENT).with_notify(Arc::new(measurement)),
        )
        .with_characteristic(
            LocalCharacteristic::new(UUID_BODY_SENSOR_LOCATION).with_read(Arc::new(BodySensorLocation)),
        )
        .with_characteristic(
            LocalCharacteristic::new(UUID_HEART_RATE_CONTROL_POINT)
                .with_write(Arc::new(ControlPoint::new(state))),
        )
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tokio::sync::broadcast;

    use super::*;

    #[test]
    fn test_measurement_layout() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = HeartRateState::new();

        for tick in 0..25u64 {
            let value = state.next_measurement(&mut rng);
            assert!((90..=130).contains(&value[1]));
            if tick % 10 == 0 {
                assert_eq!(value[0], 0x0e);
                assert_eq!(u16::from_le_bytes([value[2], value[3]]), tick as u16);
            } else {
                assert_eq!(value, vec![0x06, value[1]]);
            }
        }
        assert_eq!(state.energy_expended(), 25);
    }

    #[test]
    fn test_energy_expended_saturates() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut state = HeartRateState {
            energy_expended: u16::MAX - 1,
            ticks: 0,
        };
        state.next_measurement(&mut rng);
        state.next_measurement(&mut rng);
        state.next_measurement(&mut rng);
        assert_eq!(state.energy_expended(), u16::MAX);
    }

    #[test]
    fn test_control_point_reset_and_rejection() {
        let state = Arc::new(Mutex::new(HeartRateState {
            energy_expended: 42,
            ticks: 3,
        }));
        let control_point = ControlPoint::new(state.clone());

        assert_eq!(control_point.write_value(&[2]), Err(ReqError::NotSupported));
        assert_eq!(control_point.write_value(&[]), Err(ReqError::InvalidValueLength));
        assert_eq!(control_point.write_value(&[1, 0]), Err(ReqError::InvalidValueLength));
        assert_eq!(state.lock().unwrap().energy_expended(), 42);

        assert_eq!(control_point.write_value(&[1]), Ok(()));
        assert_eq!(state.lock().unwrap().energy_expended(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_notify_twice_runs_one_timer() {
        let (tx, mut rx) = broadcast::channel(64);
        let measurement = HeartRateMeasurement::new(
            Arc::new(Mutex::new(HeartRateState::new())),
            Notifier::new(tx),
            Duration::from_secs(1),
            CancellationToken::new(),
        );

        measurement.start_notify();
        measurement.start_notify();
        assert!(measurement.is_notifying());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 3);

        measurement.stop_notify();
        measurement.stop_notify();
        assert!(!measurement.is_notifying());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
    }
}
