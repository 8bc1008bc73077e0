use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ble_gatt_bridge::bus::{
    DEVICE_INTERFACE, LoopbackBus, PropertiesChanged, PropertyMap, Registrar,
};
use ble_gatt_bridge::config::{CentralConfig, PeripheralConfig};
use ble_gatt_bridge::core::bluetooth::constants::{
    APPLICATION_PATH, UUID_ENVIRONMENTAL_SENSING_SERVICE, UUID_LED_CHARACTERISTIC,
    UUID_TEMPERATURE,
};
use ble_gatt_bridge::core::bluetooth::device::device_path;
use ble_gatt_bridge::core::bluetooth::types::{ConnectionState, KnownCharacteristic};
use ble_gatt_bridge::core::bluetooth::{BluetoothManager, GattError};
use ble_gatt_bridge::core::gatt::{LedState, decode_temperature};
use ble_gatt_bridge::core::peripheral::environment::{
    TemperatureSensor, environmental_sensing_service,
};
use ble_gatt_bridge::core::peripheral::{Advertisement, Application, PeripheralSimulator};

const ADAPTER: &str = "/org/bluez/hci0";
const ADDRESS: &str = "B8:27:EB:00:00:01";

fn central_config(auto_connect: bool) -> CentralConfig {
    CentralConfig {
        auto_connect,
        connect_retry_delay_ms: 100,
        ..Default::default()
    }
}

/// Lets every spawned task run until the runtime is idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn hosted_simulator() -> (Arc<LoopbackBus>, PeripheralSimulator) {
    let bus = LoopbackBus::new(ADAPTER);
    let peripheral = bus.peripheral(ADDRESS);
    let simulator = PeripheralSimulator::new(&PeripheralConfig::default());
    simulator.start(&peripheral).await.unwrap();
    (bus, simulator)
}

async fn discovered(bus: &Arc<LoopbackBus>, config: CentralConfig) -> BluetoothManager {
    let mut manager = BluetoothManager::new(bus.clone(), config);
    manager.start_scan().await.unwrap();
    settle().await;
    manager
}

#[tokio::test(start_paused = true)]
async fn test_resolution_binds_temperature_and_leaves_led_unbound() {
    let bus = LoopbackBus::new(ADAPTER);
    let peripheral = bus.peripheral(ADDRESS);
    let mut application = Application::new(APPLICATION_PATH);
    let sensor = Arc::new(TemperatureSensor::new(
        application.notifier(),
        Duration::from_secs(2),
        CancellationToken::new(),
    ));
    application.add_service(environmental_sensing_service(sensor));
    peripheral
        .register_advertisement(&Advertisement::from_config(&PeripheralConfig::default()))
        .await
        .unwrap();
    peripheral.register_application(Arc::new(application)).await.unwrap();

    let mut manager = discovered(&bus, central_config(false)).await;
    assert_eq!(manager.known_addresses(), vec![ADDRESS]);
    assert_eq!(manager.connection_state(ADDRESS), Some(ConnectionState::Discovered));

    let report = manager.connect(ADDRESS).await.unwrap();
    assert_eq!(report.services, vec![UUID_ENVIRONMENTAL_SENSING_SERVICE]);
    assert_eq!(report.bound, vec![KnownCharacteristic::Temperature]);
    assert!(manager.is_resolved(UUID_TEMPERATURE));
    assert!(!manager.is_resolved(UUID_LED_CHARACTERISTIC));

    let access = manager.access();
    let celsius = access.read_temperature().await.unwrap();
    assert!((10.0..=50.0).contains(&celsius));
    assert_eq!(
        access.read(UUID_LED_CHARACTERISTIC).await,
        Err(GattError::NotResolved(UUID_LED_CHARACTERISTIC))
    );

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_led_write_rejects_wrong_length_and_reads_back() {
    let (bus, simulator) = hosted_simulator().await;
    let mut manager = discovered(&bus, central_config(false)).await;
    manager.connect(ADDRESS).await.unwrap();

    let access = manager.access();
    assert_eq!(
        access.write(UUID_LED_CHARACTERISTIC, &[0x01, 0x00]).await,
        Err(GattError::InvalidValueLength)
    );
    assert_eq!(simulator.led().state(), LedState::Off);

    access.write(UUID_LED_CHARACTERISTIC, &[0x01]).await.unwrap();
    assert_eq!(access.read_led().await, Ok(LedState::On));
    assert_eq!(simulator.led().state(), LedState::On);

    access.write_led(LedState::Off).await.unwrap();
    assert_eq!(access.read_led().await, Ok(LedState::Off));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_discovery_filter_hides_other_services() {
    let (bus, _simulator) = hosted_simulator().await;
    let config = CentralConfig {
        discovery_filter: vec![UUID_LED_CHARACTERISTIC],
        ..central_config(false)
    };
    let mut manager = discovered(&bus, config).await;
    assert!(manager.known_addresses().is_empty());
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_auto_connect_happens_once_per_address() {
    let (bus, _simulator) = hosted_simulator().await;
    let path = device_path(ADAPTER, ADDRESS);
    // keep the first connect in flight while the device is seen again
    bus.fail_next(&path, "Connect", 1);

    let mut manager = BluetoothManager::new(bus.clone(), central_config(true));
    manager.start_scan().await.unwrap();
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let mut resighting = PropertyMap::new();
    resighting.insert("Address".into(), ADDRESS.into());
    resighting.insert("RSSI".into(), (-48i16).into());
    bus.emit(PropertiesChanged::new(path.clone(), DEVICE_INTERFACE, resighting));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(manager.known_addresses(), vec![ADDRESS]);
    assert_eq!(manager.connection_state(ADDRESS), Some(ConnectionState::Connected));
    assert!(manager.is_resolved(UUID_TEMPERATURE));
    assert!(bus.is_connected(ADDRESS));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_do_not_both_proceed() {
    let (bus, _simulator) = hosted_simulator().await;
    let mut manager = discovered(&bus, central_config(false)).await;
    bus.fail_next(&device_path(ADAPTER, ADDRESS), "Connect", 1);

    let (first, second) = tokio::join!(manager.connect(ADDRESS), manager.connect(ADDRESS));
    assert!(first.is_ok());
    assert_eq!(second, Err(GattError::ConnectInProgress(ADDRESS.to_string())));
    assert_eq!(manager.connection_state(ADDRESS), Some(ConnectionState::Connected));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_retries_with_backoff() {
    let (bus, _simulator) = hosted_simulator().await;
    let mut manager = discovered(&bus, central_config(false)).await;
    bus.fail_next(&device_path(ADAPTER, ADDRESS), "Connect", 2);

    let started = tokio::time::Instant::now();
    manager.connect(ADDRESS).await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "waited {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(1), "waited {:?}", elapsed);
    assert!(bus.is_connected(ADDRESS));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_keeps_device_retryable() {
    let (bus, _simulator) = hosted_simulator().await;
    let mut manager = discovered(&bus, central_config(false)).await;
    bus.fail_next(&device_path(ADAPTER, ADDRESS), "Connect", 3);

    let result = manager.connect(ADDRESS).await;
    assert!(matches!(result, Err(GattError::Transport(_))));
    assert_eq!(manager.connection_state(ADDRESS), Some(ConnectionState::Discovered));
    assert_eq!(manager.known_addresses(), vec![ADDRESS]);
    assert!(!manager.is_resolved(UUID_TEMPERATURE));

    manager.connect(ADDRESS).await.unwrap();
    assert!(manager.is_resolved(UUID_TEMPERATURE));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_releases_only_on_success() {
    let (bus, _simulator) = hosted_simulator().await;
    let mut manager = discovered(&bus, central_config(false)).await;
    manager.connect(ADDRESS).await.unwrap();

    bus.fail_next(&device_path(ADAPTER, ADDRESS), "Disconnect", 1);
    assert!(matches!(manager.disconnect(ADDRESS).await, Err(GattError::Transport(_))));
    assert_eq!(manager.known_addresses(), vec![ADDRESS]);
    assert!(manager.is_resolved(UUID_TEMPERATURE));
    assert!(bus.is_connected(ADDRESS));

    manager.disconnect(ADDRESS).await.unwrap();
    settle().await;
    assert!(manager.known_addresses().is_empty());
    assert!(!manager.is_resolved(UUID_TEMPERATURE));
    assert!(!manager.is_resolved(UUID_LED_CHARACTERISTIC));
    assert_eq!(manager.connection_state(ADDRESS), Some(ConnectionState::Disconnected));
    assert!(!bus.is_connected(ADDRESS));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_releases_characteristics() {
    let (bus, _simulator) = hosted_simulator().await;
    let mut manager = discovered(&bus, central_config(false)).await;
    manager.connect(ADDRESS).await.unwrap();

    let mut changed = PropertyMap::new();
    changed.insert("Connected".into(), false.into());
    bus.emit(PropertiesChanged::new(
        device_path(ADAPTER, ADDRESS),
        DEVICE_INTERFACE,
        changed,
    ));
    settle().await;

    assert_eq!(manager.connection_state(ADDRESS), Some(ConnectionState::Disconnected));
    assert!(manager.known_addresses().is_empty());
    assert!(!manager.is_resolved(UUID_TEMPERATURE));
    assert_eq!(
        manager.access().read_temperature().await,
        Err(GattError::NotResolved(UUID_TEMPERATURE))
    );

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_auto_connect_returns_after_link_loss() {
    let (bus, _simulator) = hosted_simulator().await;
    let path = device_path(ADAPTER, ADDRESS);
    let mut manager = discovered(&bus, central_config(true)).await;
    assert_eq!(manager.connection_state(ADDRESS), Some(ConnectionState::Connected));

    let mut lost = PropertyMap::new();
    lost.insert("Connected".into(), false.into());
    bus.emit(PropertiesChanged::new(path.clone(), DEVICE_INTERFACE, lost));
    settle().await;
    assert!(manager.known_addresses().is_empty());
    assert_eq!(manager.connection_state(ADDRESS), Some(ConnectionState::Disconnected));

    let mut resighting = PropertyMap::new();
    resighting.insert("RSSI".into(), (-50i16).into());
    bus.emit(PropertiesChanged::new(path, DEVICE_INTERFACE, resighting));
    settle().await;
    assert_eq!(manager.known_addresses(), vec![ADDRESS]);
    assert_eq!(manager.connection_state(ADDRESS), Some(ConnectionState::Connected));
    assert!(manager.is_resolved(UUID_TEMPERATURE));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_connect_can_be_retried() {
    let (bus, _simulator) = hosted_simulator().await;
    let mut manager = discovered(&bus, central_config(false)).await;
    bus.fail_next(&device_path(ADAPTER, ADDRESS), "Connect", 1);

    // gives up while the first retry is pending
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), manager.connect(ADDRESS)).await;
    assert!(abandoned.is_err());
    assert_eq!(manager.connection_state(ADDRESS), Some(ConnectionState::Discovered));

    manager.connect(ADDRESS).await.unwrap();
    assert_eq!(manager.connection_state(ADDRESS), Some(ConnectionState::Connected));
    assert!(manager.is_resolved(UUID_TEMPERATURE));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_temperature_notifications_reach_the_central() {
    let (bus, _simulator) = hosted_simulator().await;
    let mut manager = discovered(&bus, central_config(false)).await;
    manager.connect(ADDRESS).await.unwrap();

    let mut readings = manager.subscribe_temperature().await.unwrap();
    for _ in 0..3 {
        let value = tokio::time::timeout(Duration::from_secs(5), readings.recv())
            .await
            .expect("a notification within one period")
            .expect("stream still open");
        let celsius = decode_temperature(&value).expect("one byte reading");
        assert!((10.0..=50.0).contains(&celsius));
    }

    manager.notifications().unsubscribe(UUID_TEMPERATURE).await.unwrap();
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_all_walks_every_known_address() {
    let bus = LoopbackBus::new(ADAPTER);
    let mut simulators = Vec::new();
    for address in ["B8:27:EB:00:00:01", "B8:27:EB:00:00:02"] {
        let peripheral = bus.peripheral(address);
        let simulator = PeripheralSimulator::new(&PeripheralConfig::default());
        simulator.start(&peripheral).await.unwrap();
        simulators.push(simulator);
    }

    let mut manager = discovered(&bus, central_config(false)).await;
    let results = manager.connect_all().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, result)| result.is_ok()));

    // both expose the same UUIDs, so the last device connected owns the bindings
    manager.disconnect("B8:27:EB:00:00:01").await.unwrap();
    assert!(manager.is_resolved(UUID_TEMPERATURE));
    assert_eq!(manager.known_addresses(), vec!["B8:27:EB:00:00:02"]);

    let results = manager.disconnect_all().await;
    assert!(results.iter().all(|(_, result)| result.is_ok()));
    assert!(manager.known_addresses().is_empty());
    assert!(!manager.is_resolved(UUID_TEMPERATURE));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_invalid_address_is_rejected() {
    let bus = LoopbackBus::new(ADAPTER);
    let manager = BluetoothManager::new(bus, central_config(false));
    assert_eq!(
        manager.connect("not-an-address").await,
        Err(GattError::InvalidAddress("not-an-address".to_string()))
    );
}
