use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use modbus_client::ClientConfig;
use poller::schedule::{DhwSchedule, ScheduleTime};
use poller::PollerConfig;
use register_map::{builtin, ByteOrder, Encoding, RegisterMap, WordOrder};
use types::DeviceIdentity;

const DEFAULT_PORT: u16 = 502;
const DEFAULT_UNIT_ID: u8 = 1;
const DEFAULT_CLAMP_STORE_PATH: &str = "qube-clamp.sqlite";
const DEFAULT_HTTP_LISTEN: &str = "127.0.0.1:8080";

#[derive(Clone, Debug)]
pub struct CollectorConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub modbus: ClientConfig,
    pub poller: PollerConfig,
    pub encoding: Encoding,
    /// Optional path to a vendor catalog file; the compiled-in Qube catalog
    /// is used when unset.
    pub catalog_path: Option<String>,
    /// Daily hot water boost window; off unless configured.
    pub dhw_schedule: Option<DhwSchedule>,
    pub clamp_store_path: String,
    pub http_listen: String,
    pub metrics_listen: Option<String>,
}

impl CollectorConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config)?;
        }

        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("device.host must be non-empty");
        }
        if self.port == 0 {
            anyhow::bail!("device.port must be between 1 and 65535");
        }
        if self.unit_id == 0 || self.unit_id > 247 {
            anyhow::bail!("device.unit_id must be between 1 and 247");
        }
        if self.poller.poll_interval.as_millis() == 0 {
            anyhow::bail!("poller.poll_interval_ms must be >= 1");
        }
        if self.poller.request_timeout.as_millis() == 0 {
            anyhow::bail!("poller.request_timeout_ms must be >= 1");
        }
        if self.poller.failure_threshold == 0 {
            anyhow::bail!("poller.failure_threshold must be >= 1");
        }
        if self.poller.backoff_base.as_millis() == 0 {
            anyhow::bail!("poller.backoff_base_ms must be >= 1");
        }
        if self.poller.backoff_max < self.poller.backoff_base {
            anyhow::bail!("poller.backoff_max_ms must be >= poller.backoff_base_ms");
        }
        if self.poller.warn_cap == 0 {
            anyhow::bail!("poller.warn_cap must be >= 1");
        }
        if let Some(max_batch) = self.modbus.max_batch_size {
            if max_batch == 0 {
                anyhow::bail!("modbus.max_batch_size must be >= 1");
            }
        }
        if self.modbus.timeout_ms == 0 {
            anyhow::bail!("modbus.timeout_ms must be >= 1");
        }
        if self.modbus.retry_backoff_ms == 0 {
            anyhow::bail!("modbus.retry_backoff_ms must be >= 1");
        }
        if self.modbus.retry_max_backoff_ms == 0 {
            anyhow::bail!("modbus.retry_max_backoff_ms must be >= 1");
        }
        if let Some(delay) = self.modbus.inter_read_delay_ms {
            if delay == 0 {
                anyhow::bail!("modbus.inter_read_delay_ms must be >= 1 when set");
            }
        }
        if let Some(ref schedule) = self.dhw_schedule {
            if schedule.start == schedule.end {
                anyhow::bail!("dhw_schedule.start and dhw_schedule.end must differ");
            }
            if !schedule.setpoint.is_finite() || schedule.setpoint <= 0.0 {
                anyhow::bail!("dhw_schedule.setpoint must be a positive number");
            }
        }
        if self.clamp_store_path.trim().is_empty() {
            anyhow::bail!("clamp_store.path must be non-empty");
        }
        self.http_listen
            .parse::<SocketAddr>()
            .map_err(|_| anyhow::anyhow!("http.listen must be a socket address"))?;
        if let Some(ref listen) = self.metrics_listen {
            listen
                .parse::<SocketAddr>()
                .map_err(|_| anyhow::anyhow!("http.metrics_listen must be a socket address"))?;
        }
        Ok(())
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            host: self.host.clone(),
            unit_id: self.unit_id,
        }
    }

    /// Client config with the device endpoint applied.
    pub fn client_config(&self) -> ClientConfig {
        let mut client = self.modbus.clone();
        client.host = self.host.clone();
        client.port = self.port;
        client
    }

    /// The register catalog: a vendor file when configured, the compiled-in
    /// Qube table otherwise.
    pub fn load_catalog(&self) -> Result<RegisterMap> {
        let Some(ref path) = self.catalog_path else {
            return builtin().context("builtin catalog invalid");
        };

        let content =
            fs::read_to_string(path).with_context(|| format!("read catalog file {path}"))?;
        let ext = Path::new(path).extension().and_then(|value| value.to_str());
        let map = match ext {
            Some("json") => RegisterMap::from_json_str(&content).context("parse json catalog")?,
            _ => RegisterMap::from_yaml_str(&content).context("parse yaml catalog")?,
        };
        Ok(map)
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            unit_id: DEFAULT_UNIT_ID,
            modbus: ClientConfig::default(),
            poller: PollerConfig::default(),
            encoding: Encoding::default(),
            catalog_path: None,
            dhw_schedule: None,
            clamp_store_path: DEFAULT_CLAMP_STORE_PATH.to_string(),
            http_listen: DEFAULT_HTTP_LISTEN.to_string(),
            metrics_listen: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    device: Option<FileDeviceConfig>,
    poller: Option<FilePollerConfig>,
    modbus: Option<FileModbusConfig>,
    encoding: Option<FileEncodingConfig>,
    catalog: Option<FileCatalogConfig>,
    dhw_schedule: Option<FileDhwConfig>,
    clamp_store: Option<FileClampStoreConfig>,
    http: Option<FileHttpConfig>,
}

#[derive(Debug, Deserialize)]
struct FileDeviceConfig {
    host: Option<String>,
    port: Option<u16>,
    unit_id: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct FilePollerConfig {
    poll_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    failure_threshold: Option<u32>,
    backoff_base_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
    max_read_gap: Option<u16>,
    warn_cap: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FileModbusConfig {
    max_batch_size: Option<u16>,
    timeout_ms: Option<u64>,
    retry_count: Option<usize>,
    retry_backoff_ms: Option<u64>,
    retry_max_backoff_ms: Option<u64>,
    inter_read_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileEncodingConfig {
    byte_order: Option<String>,
    word_order: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileCatalogConfig {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileDhwConfig {
    start: Option<String>,
    end: Option<String>,
    setpoint: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FileClampStoreConfig {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileHttpConfig {
    listen: Option<String>,
    metrics_listen: Option<String>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("QUBE_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content =
        fs::read_to_string(&path).with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut CollectorConfig, file: FileConfig) -> Result<()> {
    if let Some(device) = file.device {
        if let Some(host) = device.host {
            config.host = host;
        }
        if let Some(port) = device.port {
            config.port = port;
        }
        if let Some(unit_id) = device.unit_id {
            config.unit_id = unit_id;
        }
    }

    if let Some(poller) = file.poller {
        if let Some(interval_ms) = poller.poll_interval_ms {
            config.poller.poll_interval = Duration::from_millis(interval_ms);
        }
        if let Some(timeout_ms) = poller.request_timeout_ms {
            config.poller.request_timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(threshold) = poller.failure_threshold {
            config.poller.failure_threshold = threshold;
        }
        if let Some(base_ms) = poller.backoff_base_ms {
            config.poller.backoff_base = Duration::from_millis(base_ms);
        }
        if let Some(max_ms) = poller.backoff_max_ms {
            config.poller.backoff_max = Duration::from_millis(max_ms);
        }
        if let Some(gap) = poller.max_read_gap {
            config.poller.max_read_gap = gap;
        }
        if let Some(cap) = poller.warn_cap {
            config.poller.warn_cap = cap;
        }
    }

    if let Some(modbus) = file.modbus {
        if let Some(max_batch) = modbus.max_batch_size {
            config.modbus.max_batch_size = Some(max_batch);
        }
        if let Some(timeout_ms) = modbus.timeout_ms {
            config.modbus.timeout_ms = timeout_ms;
        }
        if let Some(retry_count) = modbus.retry_count {
            config.modbus.retry_count = retry_count;
        }
        if let Some(backoff) = modbus.retry_backoff_ms {
            config.modbus.retry_backoff_ms = backoff;
        }
        if let Some(max_backoff) = modbus.retry_max_backoff_ms {
            config.modbus.retry_max_backoff_ms = max_backoff;
        }
        if let Some(delay) = modbus.inter_read_delay_ms {
            config.modbus.inter_read_delay_ms = Some(delay);
        }
    }

    if let Some(encoding) = file.encoding {
        if let Some(byte_order) = encoding.byte_order {
            config.encoding.byte_order = byte_order
                .parse::<ByteOrder>()
                .map_err(|err| anyhow::anyhow!("encoding.byte_order: {err}"))?;
        }
        if let Some(word_order) = encoding.word_order {
            config.encoding.word_order = word_order
                .parse::<WordOrder>()
                .map_err(|err| anyhow::anyhow!("encoding.word_order: {err}"))?;
        }
    }

    if let Some(catalog) = file.catalog {
        if let Some(path) = catalog.path {
            config.catalog_path = Some(path);
        }
    }

    if let Some(dhw) = file.dhw_schedule {
        let mut schedule = DhwSchedule::default();
        if let Some(start) = dhw.start {
            schedule.start = start
                .parse::<ScheduleTime>()
                .map_err(|err| anyhow::anyhow!("dhw_schedule.start: {err}"))?;
        }
        if let Some(end) = dhw.end {
            schedule.end = end
                .parse::<ScheduleTime>()
                .map_err(|err| anyhow::anyhow!("dhw_schedule.end: {err}"))?;
        }
        if let Some(setpoint) = dhw.setpoint {
            schedule.setpoint = setpoint;
        }
        config.dhw_schedule = Some(schedule);
    }

    if let Some(clamp_store) = file.clamp_store {
        if let Some(path) = clamp_store.path {
            config.clamp_store_path = path;
        }
    }

    if let Some(http) = file.http {
        if let Some(listen) = http.listen {
            config.http_listen = listen;
        }
        if let Some(metrics_listen) = http.metrics_listen {
            config.metrics_listen = Some(metrics_listen);
        }
    }

    Ok(())
}

fn apply_env_overrides(config: &mut CollectorConfig) -> Result<()> {
    if let Ok(value) = env::var("QUBE_HOST") {
        config.host = value;
    }
    if let Some(port) = parse_env_u16("QUBE_PORT") {
        config.port = port;
    }
    if let Some(unit_id) = parse_env_u8("QUBE_UNIT_ID") {
        config.unit_id = unit_id;
    }

    if let Some(interval_ms) = parse_env_u64("QUBE_POLL_INTERVAL_MS") {
        config.poller.poll_interval = Duration::from_millis(interval_ms);
    }
    if let Some(timeout_ms) = parse_env_u64("QUBE_REQUEST_TIMEOUT_MS") {
        config.poller.request_timeout = Duration::from_millis(timeout_ms);
    }
    if let Some(threshold) = parse_env_u32("QUBE_FAILURE_THRESHOLD") {
        config.poller.failure_threshold = threshold;
    }
    if let Some(gap) = parse_env_u16("QUBE_MAX_READ_GAP") {
        config.poller.max_read_gap = gap;
    }

    if let Some(max_batch) = parse_env_u16("QUBE_MAX_BATCH_SIZE") {
        config.modbus.max_batch_size = Some(max_batch);
    }
    if let Some(timeout_ms) = parse_env_u64("QUBE_MODBUS_TIMEOUT_MS") {
        config.modbus.timeout_ms = timeout_ms;
    }

    if let Ok(value) = env::var("QUBE_BYTE_ORDER") {
        config.encoding.byte_order = value
            .parse::<ByteOrder>()
            .map_err(|err| anyhow::anyhow!("QUBE_BYTE_ORDER: {err}"))?;
    }
    if let Ok(value) = env::var("QUBE_WORD_ORDER") {
        config.encoding.word_order = value
            .parse::<WordOrder>()
            .map_err(|err| anyhow::anyhow!("QUBE_WORD_ORDER: {err}"))?;
    }

    if let Ok(value) = env::var("QUBE_CATALOG_PATH") {
        config.catalog_path = Some(value);
    }
    if let Ok(value) = env::var("QUBE_DHW_START") {
        let schedule = config.dhw_schedule.get_or_insert_with(DhwSchedule::default);
        schedule.start = value
            .parse::<ScheduleTime>()
            .map_err(|err| anyhow::anyhow!("QUBE_DHW_START: {err}"))?;
    }
    if let Ok(value) = env::var("QUBE_DHW_END") {
        let schedule = config.dhw_schedule.get_or_insert_with(DhwSchedule::default);
        schedule.end = value
            .parse::<ScheduleTime>()
            .map_err(|err| anyhow::anyhow!("QUBE_DHW_END: {err}"))?;
    }
    if let Some(setpoint) = parse_env_f64("QUBE_DHW_SETPOINT") {
        let schedule = config.dhw_schedule.get_or_insert_with(DhwSchedule::default);
        schedule.setpoint = setpoint;
    }
    if let Ok(value) = env::var("QUBE_CLAMP_STORE_PATH") {
        config.clamp_store_path = value;
    }
    if let Ok(value) = env::var("QUBE_HTTP_LISTEN") {
        config.http_listen = value;
    }
    if let Ok(value) = env::var("QUBE_METRICS_LISTEN") {
        config.metrics_listen = Some(value);
    }

    Ok(())
}

fn parse_env_u8(key: &str) -> Option<u8> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u16(key: &str) -> Option<u16> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_f64(key: &str) -> Option<f64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}
