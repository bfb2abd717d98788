use std::cmp::min;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_modbus::client::tcp;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::{Reader, Slave, SlaveContext, Writer};
use tracing::{debug, warn};

/// Configuration options for connecting and polling a Modbus TCP device.
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Maximum number of registers to read in a single request; devices with quirks may require lower batch sizes.
    pub max_batch_size: Option<u16>,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Number of retries per request after the initial attempt.
    pub retry_count: usize,
    /// Base delay between retries in milliseconds (exponential backoff).
    pub retry_backoff_ms: u64,
    /// Upper bound for retry backoff delay in milliseconds.
    pub retry_max_backoff_ms: u64,
    /// Optional delay between split reads to placate slower devices.
    pub inter_read_delay_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            max_batch_size: None,
            timeout_ms: 1_000,
            retry_count: 2,
            retry_backoff_ms: 100,
            retry_max_backoff_ms: 2_000,
            inter_read_delay_ms: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid socket address {0}:{1}")]
    InvalidAddress(String, u16),
    #[error("modbus transport error: {0}")]
    Modbus(std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("register address overflow")]
    AddressOverflow,
    #[error("device returned {got} values, expected {expected}")]
    ShortResponse { expected: u16, got: usize },
}

/// The word-valued address spaces (FC03/FC04).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordArea {
    Holding,
    Input,
}

/// The bit-valued address spaces (FC01/FC02).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitArea {
    Coil,
    DiscreteInput,
}

#[derive(Clone, Copy)]
enum Operation<'a> {
    ReadWords(WordArea),
    ReadBits(BitArea),
    WriteCoil(bool),
    WriteRegister(u16),
    WriteRegisters(&'a [u16]),
}

enum Response {
    Words(Vec<u16>),
    Bits(Vec<bool>),
    Written,
}

#[derive(Debug)]
pub struct ModbusClient {
    config: ClientConfig,
    addr: SocketAddr,
    context: Mutex<Context>,
}

impl ModbusClient {
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let addr = format!("{}:{}", config.host, config.port)
            .parse::<SocketAddr>()
            .map_err(|_| ClientError::InvalidAddress(config.host.clone(), config.port))?;
        let context = tcp::connect(addr).await?;
        Ok(Self {
            config,
            addr,
            context: Mutex::new(context),
        })
    }

    /// Replace the underlying TCP connection after persistent failures.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        let context = tcp::connect(self.addr).await?;
        *self.context.lock().await = context;
        debug!(addr = %self.addr, "modbus reconnected");
        Ok(())
    }

    pub async fn read_holding(
        &self,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        self.read_words(WordArea::Holding, unit_id, start, count).await
    }

    pub async fn read_input(
        &self,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        self.read_words(WordArea::Input, unit_id, start, count).await
    }

    pub async fn read_coils(
        &self,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>, ClientError> {
        self.read_bits(BitArea::Coil, unit_id, start, count).await
    }

    pub async fn read_discrete_inputs(
        &self,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>, ClientError> {
        self.read_bits(BitArea::DiscreteInput, unit_id, start, count).await
    }

    /// Read a register range, splitting at the configured batch size.
    pub async fn read_words(
        &self,
        area: WordArea,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut ctx = self.context.lock().await;
        let batch_size = self.config.max_batch_size.unwrap_or(count).max(1u16);
        let mut remaining = count;
        let mut offset = 0u16;
        let mut out = Vec::with_capacity(count as usize);

        while remaining > 0 {
            let chunk = min(remaining, batch_size);
            let chunk_start = u16::try_from(u32::from(start) + u32::from(offset))
                .map_err(|_| ClientError::AddressOverflow)?;
            let response = self
                .request(&mut ctx, unit_id, Operation::ReadWords(area), chunk_start, chunk)
                .await?;
            let values = match response {
                Response::Words(values) => values,
                _ => Vec::new(),
            };
            if values.len() != usize::from(chunk) {
                return Err(ClientError::ShortResponse {
                    expected: chunk,
                    got: values.len(),
                });
            }
            out.extend(values);
            remaining -= chunk;
            offset += chunk;

            if remaining > 0 {
                if let Some(delay_ms) = self.config.inter_read_delay_ms {
                    sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }

        Ok(out)
    }

    pub async fn read_bits(
        &self,
        area: BitArea,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>, ClientError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut ctx = self.context.lock().await;
        let response = self
            .request(&mut ctx, unit_id, Operation::ReadBits(area), start, count)
            .await?;
        let bits = match response {
            Response::Bits(bits) => bits,
            _ => Vec::new(),
        };
        // Devices pad bit responses to whole bytes; trim back to the request.
        if bits.len() < usize::from(count) {
            return Err(ClientError::ShortResponse {
                expected: count,
                got: bits.len(),
            });
        }
        Ok(bits.into_iter().take(usize::from(count)).collect())
    }

    pub async fn write_coil(&self, unit_id: u8, addr: u16, on: bool) -> Result<(), ClientError> {
        let mut ctx = self.context.lock().await;
        self.request(&mut ctx, unit_id, Operation::WriteCoil(on), addr, 1)
            .await?;
        Ok(())
    }

    pub async fn write_register(
        &self,
        unit_id: u8,
        addr: u16,
        word: u16,
    ) -> Result<(), ClientError> {
        let mut ctx = self.context.lock().await;
        self.request(&mut ctx, unit_id, Operation::WriteRegister(word), addr, 1)
            .await?;
        Ok(())
    }

    pub async fn write_registers(
        &self,
        unit_id: u8,
        addr: u16,
        words: &[u16],
    ) -> Result<(), ClientError> {
        if words.is_empty() {
            return Ok(());
        }
        let count = u16::try_from(words.len()).map_err(|_| ClientError::AddressOverflow)?;
        let mut ctx = self.context.lock().await;
        self.request(&mut ctx, unit_id, Operation::WriteRegisters(words), addr, count)
            .await?;
        Ok(())
    }

    /// One Modbus transaction with per-request timeout and bounded
    /// exponential retry backoff.
    async fn request(
        &self,
        ctx: &mut Context,
        unit_id: u8,
        operation: Operation<'_>,
        start: u16,
        count: u16,
    ) -> Result<Response, ClientError> {
        ctx.set_slave(Slave(unit_id));
        let mut attempts = 0usize;
        let mut last_error = None;

        loop {
            let per_request = Duration::from_millis(self.config.timeout_ms);
            let result = match operation {
                Operation::ReadWords(WordArea::Holding) => {
                    timeout(per_request, ctx.read_holding_registers(start, count))
                        .await
                        .map(|r| r.map(Response::Words))
                }
                Operation::ReadWords(WordArea::Input) => {
                    timeout(per_request, ctx.read_input_registers(start, count))
                        .await
                        .map(|r| r.map(Response::Words))
                }
                Operation::ReadBits(BitArea::Coil) => {
                    timeout(per_request, ctx.read_coils(start, count))
                        .await
                        .map(|r| r.map(Response::Bits))
                }
                Operation::ReadBits(BitArea::DiscreteInput) => {
                    timeout(per_request, ctx.read_discrete_inputs(start, count))
                        .await
                        .map(|r| r.map(Response::Bits))
                }
                Operation::WriteCoil(on) => {
                    timeout(per_request, ctx.write_single_coil(start, on))
                        .await
                        .map(|r| r.map(|_| Response::Written))
                }
                Operation::WriteRegister(word) => {
                    timeout(per_request, ctx.write_single_register(start, word))
                        .await
                        .map(|r| r.map(|_| Response::Written))
                }
                Operation::WriteRegisters(words) => {
                    timeout(per_request, ctx.write_multiple_registers(start, words))
                        .await
                        .map(|r| r.map(|_| Response::Written))
                }
            };

            match result {
                Ok(Ok(response)) => {
                    debug!(unit_id, start, count, "modbus request ok");
                    return Ok(response);
                }
                Ok(Err(err)) => {
                    warn!(unit_id, start, count, error = %err, "modbus request error");
                    last_error = Some(ClientError::Modbus(err));
                }
                Err(_) => {
                    warn!(unit_id, start, count, "modbus request timeout");
                    last_error = Some(ClientError::Timeout {
                        timeout_ms: self.config.timeout_ms,
                    });
                }
            }

            if attempts >= self.config.retry_count {
                return Err(last_error.unwrap_or(ClientError::Timeout {
                    timeout_ms: self.config.timeout_ms,
                }));
            }

            let delay_ms = self.retry_delay_ms(attempts);
            attempts += 1;
            sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    fn retry_delay_ms(&self, attempt: usize) -> u64 {
        let base = self.config.retry_backoff_ms.max(1);
        let shift = u32::try_from(attempt).unwrap_or(u32::MAX);
        let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let delay = base.saturating_mul(factor);
        let max = self.config.retry_max_backoff_ms.max(base);
        min(delay, max)
    }
}
