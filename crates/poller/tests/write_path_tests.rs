use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use modbus_client::ClientConfig;
use poller::{
    command_channel, DeviceSnapshot, Poller, PollerConfig, WriteError, WriteValue,
};
use register_map::{builtin, Encoding};
use types::DeviceIdentity;

// Port 9 (discard) refuses TCP on loopback, so connects fail fast and the
// actor runs its command loop without a device.
fn dead_endpoint() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 9;
    config.timeout_ms = 200;
    config.retry_count = 0;
    config
}

fn fast_poller_config() -> PollerConfig {
    PollerConfig {
        poll_interval: Duration::from_millis(50),
        request_timeout: Duration::from_millis(200),
        failure_threshold: 1,
        backoff_base: Duration::from_millis(50),
        backoff_max: Duration::from_millis(100),
        ..PollerConfig::default()
    }
}

fn spawn_poller() -> (
    poller::PollerHandle,
    watch::Receiver<DeviceSnapshot>,
    watch::Sender<bool>,
    tokio::task::JoinHandle<()>,
) {
    let map = Arc::new(builtin().expect("builtin catalog"));
    let (snapshot_tx, snapshot_rx) = watch::channel(DeviceSnapshot::default());
    let (handle, commands) = command_channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = Poller::new(
        DeviceIdentity {
            host: "127.0.0.1".to_string(),
            unit_id: 1,
        },
        dead_endpoint(),
        map,
        Encoding::default(),
        fast_poller_config(),
        snapshot_tx,
        commands,
        shutdown_rx,
        None,
    );
    let task = tokio::spawn(poller.run());
    (handle, snapshot_rx, shutdown_tx, task)
}

#[tokio::test]
async fn write_validation_runs_before_the_connection() {
    let (handle, _snapshot_rx, shutdown_tx, task) = spawn_poller();

    let err = handle
        .write("no_such_register", WriteValue::Bool(true))
        .await
        .expect_err("unknown key");
    assert!(matches!(err, WriteError::UnknownKey(_)));

    let err = handle
        .write("temp_supply", WriteValue::Number(21.5))
        .await
        .expect_err("read-only register");
    assert!(matches!(err, WriteError::NotWritable(_)));

    // A coil takes booleans; a holding setpoint takes numbers.
    let err = handle
        .write("dhw_boost", WriteValue::Number(1.0))
        .await
        .expect_err("coil wants a bool");
    assert!(matches!(
        err,
        WriteError::TypeMismatch { expected: "boolean", .. }
    ));

    let err = handle
        .write("setpoint_dhw", WriteValue::Bool(true))
        .await
        .expect_err("setpoint wants a number");
    assert!(matches!(
        err,
        WriteError::TypeMismatch { expected: "numeric", .. }
    ));

    // Only a well-formed request reaches the connection check.
    let err = handle
        .write("dhw_boost", WriteValue::Bool(true))
        .await
        .expect_err("no device");
    assert!(matches!(err, WriteError::NotConnected));

    let err = handle
        .write("setpoint_dhw", WriteValue::Number(55.0))
        .await
        .expect_err("no device");
    assert!(matches!(err, WriteError::NotConnected));

    shutdown_tx.send(true).expect("shutdown");
    task.await.expect("poller task");
}

#[tokio::test]
async fn failed_connects_publish_an_offline_snapshot() {
    let (_handle, mut snapshot_rx, shutdown_tx, task) = spawn_poller();

    snapshot_rx.changed().await.expect("first snapshot");
    let snapshot = snapshot_rx.borrow().clone();

    // Threshold 1 flags the device offline on the very first failed connect,
    // with every catalog key published as unavailable.
    assert!(!snapshot.online);
    assert!(snapshot.connect_errors + snapshot.read_errors >= 1);
    let map = builtin().expect("builtin catalog");
    assert_eq!(snapshot.readings.len(), map.len());
    assert!(snapshot.readings.values().all(|value| value.is_none()));

    shutdown_tx.send(true).expect("shutdown");
    task.await.expect("poller task");
}
