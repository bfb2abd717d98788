use std::env;
use std::sync::Mutex;
use std::time::Duration;

use collector_app::CollectorConfig;
use poller::schedule::{DhwSchedule, ScheduleTime};
use register_map::{ByteOrder, WordOrder};

// Env overrides are process-global, so tests touching them take this lock.
static ENV_LOCK: Mutex<()> = Mutex::new(());

const QUBE_VARS: &[&str] = &[
    "QUBE_CONFIG",
    "QUBE_HOST",
    "QUBE_PORT",
    "QUBE_UNIT_ID",
    "QUBE_POLL_INTERVAL_MS",
    "QUBE_REQUEST_TIMEOUT_MS",
    "QUBE_FAILURE_THRESHOLD",
    "QUBE_MAX_READ_GAP",
    "QUBE_MAX_BATCH_SIZE",
    "QUBE_MODBUS_TIMEOUT_MS",
    "QUBE_BYTE_ORDER",
    "QUBE_WORD_ORDER",
    "QUBE_CATALOG_PATH",
    "QUBE_DHW_START",
    "QUBE_DHW_END",
    "QUBE_DHW_SETPOINT",
    "QUBE_CLAMP_STORE_PATH",
    "QUBE_HTTP_LISTEN",
    "QUBE_METRICS_LISTEN",
];

fn clear_env() {
    for key in QUBE_VARS {
        env::remove_var(key);
    }
}

fn fixture_path(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

#[test]
fn defaults_validate() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let config = CollectorConfig::load().unwrap();
    config.validate().unwrap();
    assert_eq!(config.port, 502);
    assert_eq!(config.unit_id, 1);
    assert_eq!(config.poller.poll_interval, Duration::from_secs(10));
    assert!(config.catalog_path.is_none());
}

#[test]
fn toml_file_overrides_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let config = CollectorConfig::load_with_path(Some(fixture_path("config-valid.toml"))).unwrap();
    config.validate().unwrap();

    assert_eq!(config.host, "192.0.2.10");
    assert_eq!(config.port, 1502);
    assert_eq!(config.unit_id, 3);
    assert_eq!(config.poller.poll_interval, Duration::from_millis(5000));
    assert_eq!(config.poller.request_timeout, Duration::from_millis(750));
    assert_eq!(config.poller.failure_threshold, 3);
    assert_eq!(config.poller.max_read_gap, 4);
    assert_eq!(config.poller.warn_cap, 3);
    assert_eq!(config.modbus.max_batch_size, Some(60));
    assert_eq!(config.modbus.timeout_ms, 750);
    assert_eq!(config.modbus.retry_count, 1);
    assert_eq!(config.encoding.byte_order, ByteOrder::Big);
    assert_eq!(config.encoding.word_order, WordOrder::Little);
    assert_eq!(config.clamp_store_path, "/tmp/qube-clamp-test.sqlite");
    assert_eq!(config.http_listen, "127.0.0.1:9090");
    assert_eq!(config.metrics_listen.as_deref(), Some("127.0.0.1:9091"));
    assert_eq!(
        config.dhw_schedule,
        Some(DhwSchedule {
            start: ScheduleTime { hour: 6, minute: 30 },
            end: ScheduleTime { hour: 8, minute: 0 },
            setpoint: 52.5,
        })
    );
}

#[test]
fn json_file_is_accepted_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let config = CollectorConfig::load_with_path(Some(fixture_path("config-valid.json"))).unwrap();
    assert_eq!(config.host, "192.0.2.20");
    assert_eq!(config.unit_id, 7);
    assert_eq!(config.poller.poll_interval, Duration::from_millis(2000));
    assert_eq!(config.catalog_path.as_deref(), Some("registers.yaml"));
    assert_eq!(config.http_listen, "0.0.0.0:8080");
    // Sections absent from the file keep their defaults.
    assert_eq!(config.modbus.timeout_ms, 1_000);
}

#[test]
fn invalid_port_fails_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let config =
        CollectorConfig::load_with_path(Some(fixture_path("config-invalid.toml"))).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("device.port"));
}

#[test]
fn env_overrides_win_over_file_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    env::set_var("QUBE_HOST", "203.0.113.5");
    env::set_var("QUBE_UNIT_ID", "9");
    env::set_var("QUBE_POLL_INTERVAL_MS", "1500");
    env::set_var("QUBE_WORD_ORDER", "little");

    let config = CollectorConfig::load_with_path(Some(fixture_path("config-valid.toml"))).unwrap();
    assert_eq!(config.host, "203.0.113.5");
    assert_eq!(config.unit_id, 9);
    assert_eq!(config.poller.poll_interval, Duration::from_millis(1500));
    assert_eq!(config.encoding.word_order, WordOrder::Little);
    // File values untouched by env stay in effect.
    assert_eq!(config.port, 1502);

    clear_env();
}

#[test]
fn bad_env_order_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    env::set_var("QUBE_BYTE_ORDER", "middle");
    let err = CollectorConfig::load().unwrap_err();
    assert!(err.to_string().contains("QUBE_BYTE_ORDER"));

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let result = CollectorConfig::load_with_path(Some(fixture_path("does-not-exist.toml")));
    assert!(result.is_err());
}

#[test]
fn unit_id_bounds_are_enforced() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut config = CollectorConfig::default();
    config.unit_id = 0;
    assert!(config.validate().is_err());
    config.unit_id = 247;
    assert!(config.validate().is_ok());
}

#[test]
fn backoff_bounds_are_enforced() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut config = CollectorConfig::default();
    config.poller.backoff_base = Duration::from_secs(60);
    config.poller.backoff_max = Duration::from_secs(30);
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("backoff_max_ms"));
}

#[test]
fn listen_addresses_must_parse() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut config = CollectorConfig::default();
    config.http_listen = "not-an-address".to_string();
    assert!(config.validate().is_err());

    config.http_listen = "127.0.0.1:8080".to_string();
    config.metrics_listen = Some("bogus".to_string());
    assert!(config.validate().is_err());
}

#[test]
fn dhw_schedule_env_vars_enable_the_window() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    env::set_var("QUBE_DHW_START", "05:45");
    env::set_var("QUBE_DHW_SETPOINT", "60");

    let config = CollectorConfig::load().unwrap();
    let schedule = config.dhw_schedule.expect("schedule enabled via env");
    assert_eq!(schedule.start, ScheduleTime { hour: 5, minute: 45 });
    // Unset fields keep the defaults.
    assert_eq!(schedule.end, ScheduleTime { hour: 9, minute: 0 });
    assert_eq!(schedule.setpoint, 60.0);

    clear_env();
}

#[test]
fn dhw_schedule_bounds_are_enforced() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut config = CollectorConfig::default();
    config.dhw_schedule = Some(DhwSchedule {
        start: ScheduleTime { hour: 7, minute: 0 },
        end: ScheduleTime { hour: 7, minute: 0 },
        setpoint: 55.0,
    });
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("dhw_schedule"));

    config.dhw_schedule = Some(DhwSchedule {
        setpoint: -1.0,
        ..DhwSchedule::default()
    });
    assert!(config.validate().is_err());

    config.dhw_schedule = Some(DhwSchedule::default());
    assert!(config.validate().is_ok());

    env::set_var("QUBE_DHW_START", "25:00");
    assert!(CollectorConfig::load().is_err());
    clear_env();
}

#[test]
fn builtin_catalog_loads_when_no_path_is_set() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let config = CollectorConfig::default();
    let map = config.load_catalog().unwrap();
    assert!(!map.is_empty());
    assert!(map.get("temp_supply").is_some());
}
