use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use clamp_store::ClampStore;
use modbus_client::{ClientConfig, ClientError, ModbusClient};
use register_map::codec::{self, EncodeError};
use register_map::plan::{build_read_plan, ReadBlock};
use register_map::{DataType, Encoding, Region, RegisterMap};
use types::{DeviceIdentity, Reading};

pub mod backoff;
pub mod clamp;
pub mod schedule;

use backoff::{backoff_delay, FailureTracker};
use clamp::ClampFilter;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// Consecutive failed cycles before the device is flagged offline.
    pub failure_threshold: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Max address gap bridged when merging catalog reads into one request.
    pub max_read_gap: u16,
    /// Read-failure warnings logged per cycle before suppression.
    pub warn_cap: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(1),
            failure_threshold: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            max_read_gap: 8,
            warn_cap: 5,
        }
    }
}

/// Latest decoded state of the device, replaced wholesale each cycle.
/// `None` readings are unavailable (read failure or non-finite decode).
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceSnapshot {
    pub readings: HashMap<String, Option<Reading>>,
    pub collected_at_ms: u64,
    pub cycle: u64,
    pub read_errors: u64,
    pub connect_errors: u64,
    pub online: bool,
}

/// Value accepted by the write path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteValue {
    Bool(bool),
    Number(f64),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("unknown register key {0}")]
    UnknownKey(String),
    #[error("register {0} is not writable")]
    NotWritable(String),
    #[error("register {key} expects a {expected} value")]
    TypeMismatch { key: String, expected: &'static str },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("modbus write failed: {0}")]
    Client(#[from] ClientError),
    #[error("device is not connected")]
    NotConnected,
    #[error("poller is gone")]
    PollerGone,
}

/// Commands accepted by the running poller.
pub enum Command {
    /// Force an immediate poll cycle.
    Refresh,
    Write {
        key: String,
        value: WriteValue,
        reply: oneshot::Sender<Result<(), WriteError>>,
    },
    /// Escape hatch mirroring the vendor service: write an unmapped holding
    /// register by raw address.
    WriteRaw {
        address: u16,
        value: f64,
        data_type: DataType,
        reply: oneshot::Sender<Result<(), WriteError>>,
    },
}

/// Cloneable handle for sending commands to the poller.
#[derive(Clone)]
pub struct PollerHandle {
    tx: mpsc::Sender<Command>,
}

impl PollerHandle {
    pub async fn refresh(&self) {
        let _ = self.tx.send(Command::Refresh).await;
    }

    pub async fn write(&self, key: impl Into<String>, value: WriteValue) -> Result<(), WriteError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Write {
                key: key.into(),
                value,
                reply,
            })
            .await
            .map_err(|_| WriteError::PollerGone)?;
        rx.await.map_err(|_| WriteError::PollerGone)?
    }

    pub async fn write_raw(
        &self,
        address: u16,
        value: f64,
        data_type: DataType,
    ) -> Result<(), WriteError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::WriteRaw {
                address,
                value,
                data_type,
                reply,
            })
            .await
            .map_err(|_| WriteError::PollerGone)?;
        rx.await.map_err(|_| WriteError::PollerGone)?
    }
}

pub fn command_channel(capacity: usize) -> (PollerHandle, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(capacity);
    (PollerHandle { tx }, rx)
}

enum BlockData {
    Words(Vec<u16>),
    Bits(Vec<bool>),
}

/// The polling task responsible for one heat pump.
pub struct Poller {
    identity: DeviceIdentity,
    modbus_config: ClientConfig,
    map: Arc<RegisterMap>,
    encoding: Encoding,
    config: PollerConfig,
    snapshot_tx: watch::Sender<DeviceSnapshot>,
    commands: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
    store: Option<ClampStore>,
    clamp: ClampFilter,
    client: Option<ModbusClient>,
    failures: FailureTracker,
    cycle: u64,
    read_errors: u64,
    connect_errors: u64,
}

impl Poller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: DeviceIdentity,
        modbus_config: ClientConfig,
        map: Arc<RegisterMap>,
        encoding: Encoding,
        config: PollerConfig,
        snapshot_tx: watch::Sender<DeviceSnapshot>,
        commands: mpsc::Receiver<Command>,
        shutdown: watch::Receiver<bool>,
        store: Option<ClampStore>,
    ) -> Self {
        let failures = FailureTracker::new(config.failure_threshold);
        Self {
            identity,
            modbus_config,
            map,
            encoding,
            config,
            snapshot_tx,
            commands,
            shutdown,
            store,
            clamp: ClampFilter::new(),
            client: None,
            failures,
            cycle: 0,
            read_errors: 0,
            connect_errors: 0,
        }
    }

    /// Seed the clamp filter from the store so counters stay monotonic
    /// across restarts.
    pub async fn seed_clamp(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        match store.load_all().await {
            Ok(entries) => {
                let count = entries.len();
                self.clamp.seed(entries);
                info!(count, "clamp filter seeded from store");
            }
            Err(err) => {
                warn!(error = %err, "clamp store load failed; starting empty");
            }
        }
    }

    pub async fn run(mut self) {
        let mut modbus_config = self.modbus_config.clone();
        modbus_config.timeout_ms = self.config.request_timeout.as_millis() as u64;
        self.modbus_config = modbus_config;
        let plan = build_read_plan(&self.map, self.config.max_read_gap);
        info!(
            host = %self.identity.host,
            unit_id = self.identity.unit_id,
            registers = self.map.len(),
            blocks = plan.len(),
            "poller starting"
        );

        loop {
            if *self.shutdown.borrow() {
                info!(host = %self.identity.host, "poller shutdown requested");
                break;
            }

            let cycle_start = Instant::now();
            self.poll_once(&plan).await;
            let elapsed = cycle_start.elapsed();
            histogram!("qube_poll_cycle_seconds").record(elapsed.as_secs_f64());

            let delay = backoff_delay(
                self.config.poll_interval,
                self.failures.consecutive(),
                self.config.backoff_base,
                self.config.backoff_max,
            );
            let lag = elapsed.saturating_sub(self.config.poll_interval);
            info!(
                host = %self.identity.host,
                unit_id = self.identity.unit_id,
                cycle = self.cycle,
                elapsed_ms = elapsed.as_millis(),
                lag_ms = lag.as_millis(),
                consecutive_failures = self.failures.consecutive(),
                delay_ms = delay.as_millis(),
                "poll cycle complete"
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!(host = %self.identity.host, "poller shutdown requested");
                        break;
                    }
                }
                maybe_command = self.commands.recv() => {
                    match maybe_command {
                        // The loop re-polls right after any command, which
                        // gives writes their immediate refresh.
                        Some(command) => self.handle_command(command).await,
                        None => {
                            info!(host = %self.identity.host, "command channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn poll_once(&mut self, plan: &[ReadBlock]) {
        if self.client.is_none() {
            match ModbusClient::connect(self.modbus_config.clone()).await {
                Ok(client) => {
                    self.client = Some(client);
                }
                Err(err) => {
                    self.connect_errors += 1;
                    counter!("qube_connect_errors_total").increment(1);
                    warn!(host = %self.identity.host, error = %err, "modbus connect failed");
                    if self.failures.record_failure() {
                        error!(
                            host = %self.identity.host,
                            threshold = self.config.failure_threshold,
                            "device flagged offline after consecutive failures"
                        );
                    }
                    self.publish_offline();
                    return;
                }
            }
        }

        let Some(client) = self.client.take() else {
            return;
        };

        let mut readings: HashMap<String, Option<Reading>> =
            HashMap::with_capacity(self.map.len());
        let mut failed_blocks = 0usize;
        let mut warn_count = 0usize;

        for block in plan {
            match read_block(&client, self.identity.unit_id, block).await {
                Ok(data) => {
                    self.decode_block(block, &data, &mut readings);
                }
                Err(err) => {
                    failed_blocks += 1;
                    self.read_errors += 1;
                    counter!("qube_read_errors_total").increment(1);
                    if warn_count < self.config.warn_cap {
                        warn!(
                            region = %block.region,
                            start = block.start,
                            count = block.count,
                            error = %err,
                            "block read failed"
                        );
                        warn_count += 1;
                    }
                    for key in &block.keys {
                        readings.insert(key.clone(), None);
                    }
                }
            }
        }
        if warn_count >= self.config.warn_cap && failed_blocks > warn_count {
            warn!(
                suppressed = failed_blocks - warn_count,
                "additional block read failures suppressed this cycle"
            );
        }

        if !plan.is_empty() && failed_blocks == plan.len() {
            // Every request failed; the connection itself is suspect. Drop it
            // and let the next cycle reconnect under backoff.
            if self.failures.record_failure() {
                error!(
                    host = %self.identity.host,
                    threshold = self.config.failure_threshold,
                    "device flagged offline after consecutive failures"
                );
            }
        } else {
            self.client = Some(client);
            if self.failures.record_success() {
                info!(host = %self.identity.host, "device back online");
            }
            self.flush_clamp().await;
        }

        self.cycle += 1;
        gauge!("qube_device_online").set(if self.failures.is_offline() { 0.0 } else { 1.0 });
        let snapshot = DeviceSnapshot {
            readings,
            collected_at_ms: unix_ms(),
            cycle: self.cycle,
            read_errors: self.read_errors,
            connect_errors: self.connect_errors,
            online: !self.failures.is_offline(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }

    fn decode_block(
        &mut self,
        block: &ReadBlock,
        data: &BlockData,
        readings: &mut HashMap<String, Option<Reading>>,
    ) {
        for key in &block.keys {
            let Some(def) = self.map.get(key) else {
                continue;
            };
            let idx = usize::from(def.address - block.start);
            let raw = match data {
                BlockData::Bits(bits) => bits.get(idx).copied().map(codec::decode_bit),
                BlockData::Words(words) => {
                    let span = usize::from(def.data_type.word_count());
                    words
                        .get(idx..idx + span)
                        .and_then(|slice| codec::decode_words(def.data_type, self.encoding, slice).ok())
                }
            };

            let mut reading = raw.and_then(|raw| codec::scale_reading(def, raw));
            if def.cumulative {
                if let Some(Reading::Number(value)) = reading {
                    let accepted = self.clamp.apply(key, value);
                    if accepted != value {
                        counter!("qube_clamp_events_total").increment(1);
                        debug!(key = %key, value, accepted, "cumulative reading clamped");
                    }
                    reading = Some(Reading::Number(accepted));
                }
            }
            readings.insert(key.clone(), reading);
        }
    }

    async fn flush_clamp(&mut self) {
        let dirty = self.clamp.take_dirty();
        if dirty.is_empty() {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(err) = store.upsert_many(&dirty).await {
                warn!(error = %err, "clamp store flush failed");
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Refresh => {
                info!(host = %self.identity.host, "refresh requested");
            }
            Command::Write { key, value, reply } => {
                let result = self.write_key(&key, value).await;
                if let Err(err) = &result {
                    warn!(key = %key, error = %err, "register write failed");
                }
                let _ = reply.send(result);
            }
            Command::WriteRaw {
                address,
                value,
                data_type,
                reply,
            } => {
                let result = self.write_raw(address, value, data_type).await;
                if let Err(err) = &result {
                    warn!(address, error = %err, "raw register write failed");
                }
                let _ = reply.send(result);
            }
        }
    }

    async fn write_key(&mut self, key: &str, value: WriteValue) -> Result<(), WriteError> {
        let def = self
            .map
            .get(key)
            .ok_or_else(|| WriteError::UnknownKey(key.to_string()))?
            .clone();
        if !def.writable {
            return Err(WriteError::NotWritable(key.to_string()));
        }

        // Value and region checks come before the connection check, so a
        // malformed request is reported as such even while offline.
        match def.region {
            Region::Coil => {
                let WriteValue::Bool(on) = value else {
                    return Err(WriteError::TypeMismatch {
                        key: key.to_string(),
                        expected: "boolean",
                    });
                };
                let client = self.client.as_ref().ok_or(WriteError::NotConnected)?;
                client.write_coil(self.identity.unit_id, def.address, on).await?;
            }
            Region::Holding => {
                let WriteValue::Number(number) = value else {
                    return Err(WriteError::TypeMismatch {
                        key: key.to_string(),
                        expected: "numeric",
                    });
                };
                let raw = codec::raw_from_scaled(&def, number);
                let words = codec::encode_words(def.data_type, self.encoding, raw)?;
                self.write_words(def.address, &words).await?;
            }
            // Catalog validation rejects writable defs in read-only regions.
            Region::DiscreteInput | Region::Input => {
                return Err(WriteError::NotWritable(key.to_string()));
            }
        }

        info!(key, host = %self.identity.host, "register written");
        counter!("qube_register_writes_total").increment(1);
        Ok(())
    }

    async fn write_raw(
        &mut self,
        address: u16,
        value: f64,
        data_type: DataType,
    ) -> Result<(), WriteError> {
        let words = codec::encode_words(data_type, self.encoding, value)?;
        self.write_words(address, &words).await?;
        info!(address, host = %self.identity.host, "raw register written");
        counter!("qube_register_writes_total").increment(1);
        Ok(())
    }

    async fn write_words(&self, address: u16, words: &[u16]) -> Result<(), WriteError> {
        let client = self.client.as_ref().ok_or(WriteError::NotConnected)?;
        if words.len() == 1 {
            client
                .write_register(self.identity.unit_id, address, words[0])
                .await?;
        } else {
            client
                .write_registers(self.identity.unit_id, address, words)
                .await?;
        }
        Ok(())
    }

    fn publish_offline(&mut self) {
        self.cycle += 1;
        gauge!("qube_device_online").set(0.0);
        let readings = self.map.iter().map(|def| (def.key.clone(), None)).collect();
        let snapshot = DeviceSnapshot {
            readings,
            collected_at_ms: unix_ms(),
            cycle: self.cycle,
            read_errors: self.read_errors,
            connect_errors: self.connect_errors,
            online: !self.failures.is_offline(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

async fn read_block(
    client: &ModbusClient,
    unit_id: u8,
    block: &ReadBlock,
) -> Result<BlockData, ClientError> {
    match block.region {
        Region::Coil => client
            .read_coils(unit_id, block.start, block.count)
            .await
            .map(BlockData::Bits),
        Region::DiscreteInput => client
            .read_discrete_inputs(unit_id, block.start, block.count)
            .await
            .map(BlockData::Bits),
        Region::Holding => client
            .read_holding(unit_id, block.start, block.count)
            .await
            .map(BlockData::Words),
        Region::Input => client
            .read_input(unit_id, block.start, block.count)
            .await
            .map(BlockData::Words),
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
