use std::cmp::min;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::time::{sleep, timeout};
use tokio_modbus::client::{rtu, tcp, Context};
use tokio_modbus::prelude::{Reader, Slave, Writer};
use tokio_modbus::ExceptionCode;
use tracing::debug;

pub mod mock;

/// Physical link to the charge controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Link {
    Rtu { path: String, baud_rate: u32 },
    Tcp { host: String, port: u16 },
}

/// Configuration options for talking to one Modbus unit.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub link: Link,
    pub unit_id: u8,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of registers to read in a single request; devices with quirks may require lower batch sizes.
    pub max_batch_size: Option<u16>,
    /// Optional delay between split reads to placate slower devices.
    pub inter_read_delay_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            link: Link::Rtu {
                path: "/dev/ttyUSB0".to_string(),
                baud_rate: 9_600,
            },
            unit_id: 1,
            timeout_ms: 1_000,
            max_batch_size: None,
            inter_read_delay_ms: None,
        }
    }
}

/// Register table a read is issued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    Holding,
    Input,
    /// Coil states are stored in the response buffer as 0/1 words.
    Coils,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteTarget {
    Register,
    Coil,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("illegal function")]
    IllegalFunction,
    #[error("illegal data address")]
    IllegalDataAddress,
    #[error("illegal data value")]
    IllegalDataValue,
    #[error("slave device failure")]
    SlaveDeviceFailure,
    #[error("invalid slave id")]
    InvalidSlaveId,
    #[error("invalid function in response")]
    InvalidFunction,
    #[error("response timed out")]
    ResponseTimedOut,
    #[error("invalid crc")]
    InvalidCrc,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("modbus exception: {0}")]
    Exception(String),
    #[error("io error: {0}")]
    Io(String),
}

impl TransportError {
    /// Short name used in log lines and status strings.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            TransportError::IllegalFunction => "IllegalFunction",
            TransportError::IllegalDataAddress => "IllegalDataAddress",
            TransportError::IllegalDataValue => "IllegalDataValue",
            TransportError::SlaveDeviceFailure => "SlaveDeviceFailure",
            TransportError::InvalidSlaveId => "InvalidSlaveID",
            TransportError::InvalidFunction => "InvalidFunction",
            TransportError::ResponseTimedOut => "ResponseTimedOut",
            TransportError::InvalidCrc => "InvalidCRC",
            TransportError::InvalidResponse(_) => "InvalidResponse",
            TransportError::Exception(_) => "Exception",
            TransportError::Io(_) => "Io",
        }
    }

    /// Modbus exception code for device-reported errors, 0xE0.. for local ones.
    pub fn code(&self) -> u8 {
        match self {
            TransportError::IllegalFunction => 0x01,
            TransportError::IllegalDataAddress => 0x02,
            TransportError::IllegalDataValue => 0x03,
            TransportError::SlaveDeviceFailure => 0x04,
            TransportError::InvalidSlaveId => 0xE0,
            TransportError::InvalidFunction => 0xE1,
            TransportError::ResponseTimedOut => 0xE2,
            TransportError::InvalidCrc => 0xE3,
            TransportError::InvalidResponse(_) => 0xE4,
            TransportError::Exception(_) => 0xE5,
            TransportError::Io(_) => 0xE6,
        }
    }

    fn from_exception(code: ExceptionCode) -> Self {
        match code {
            ExceptionCode::IllegalFunction => TransportError::IllegalFunction,
            ExceptionCode::IllegalDataAddress => TransportError::IllegalDataAddress,
            ExceptionCode::IllegalDataValue => TransportError::IllegalDataValue,
            ExceptionCode::ServerDeviceFailure => TransportError::SlaveDeviceFailure,
            other => TransportError::Exception(other.to_string()),
        }
    }

    fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => TransportError::ResponseTimedOut,
            io::ErrorKind::InvalidData => TransportError::InvalidCrc,
            _ => TransportError::Io(err.to_string()),
        }
    }
}

impl From<tokio_modbus::Error> for TransportError {
    fn from(err: tokio_modbus::Error) -> Self {
        match err {
            tokio_modbus::Error::Transport(err) => TransportError::from_io(err),
            other => TransportError::InvalidResponse(other.to_string()),
        }
    }
}

/// Request/response provider the device client drives.
///
/// A read fills the response buffer, which stays readable until the next
/// `clear_response_buffer` or read. Calls block until the transaction
/// completes or times out.
pub trait Transport {
    fn read(&mut self, kind: RegisterKind, start: u16, count: u16) -> Result<(), TransportError>;

    fn response_buffer(&self) -> &[u16];

    fn clear_response_buffer(&mut self);

    fn write(&mut self, target: WriteTarget, address: u16, value: u16) -> Result<(), TransportError>;
}

/// tokio-modbus client driven from synchronous code through a current-thread runtime.
pub struct ModbusTransport {
    config: ClientConfig,
    runtime: Rc<Runtime>,
    context: Context,
    buffer: Vec<u16>,
}

impl ModbusTransport {
    pub fn connect(config: ClientConfig, runtime: Rc<Runtime>) -> Result<Self, TransportError> {
        let slave = Slave(config.unit_id);
        let context = match &config.link {
            Link::Rtu { path, baud_rate } => {
                let builder = tokio_serial::new(path.as_str(), *baud_rate);
                // The serial stream registers with the reactor, so it has to be opened inside the runtime.
                let _guard = runtime.enter();
                let port = tokio_serial::SerialStream::open(&builder)
                    .map_err(|err| TransportError::Io(format!("open {path}: {err}")))?;
                rtu::attach_slave(port, slave)
            }
            Link::Tcp { host, port } => {
                let addr = resolve(&runtime, host, *port)?;
                runtime
                    .block_on(tcp::connect_slave(addr, slave))
                    .map_err(TransportError::from_io)?
            }
        };
        debug!(link = ?config.link, unit_id = config.unit_id, "modbus transport ready");

        Ok(Self {
            config,
            runtime,
            context,
            buffer: Vec::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn read_chunk(&mut self, kind: RegisterKind, start: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        let limit = Duration::from_millis(self.config.timeout_ms);
        let values = self
            .runtime
            .block_on(read_values(&mut self.context, kind, start, count, limit))?;

        if values.len() < usize::from(count) {
            return Err(TransportError::InvalidResponse(format!(
                "expected {count} values, got {}",
                values.len()
            )));
        }
        debug!(?kind, start, count, "modbus read ok");
        Ok(values)
    }
}

async fn read_values(
    context: &mut Context,
    kind: RegisterKind,
    start: u16,
    count: u16,
    limit: Duration,
) -> Result<Vec<u16>, TransportError> {
    let values = match kind {
        RegisterKind::Holding => timeout(limit, context.read_holding_registers(start, count))
            .await
            .map_err(|_| TransportError::ResponseTimedOut)??
            .map_err(TransportError::from_exception)?,
        RegisterKind::Input => timeout(limit, context.read_input_registers(start, count))
            .await
            .map_err(|_| TransportError::ResponseTimedOut)??
            .map_err(TransportError::from_exception)?,
        RegisterKind::Coils => timeout(limit, context.read_coils(start, count))
            .await
            .map_err(|_| TransportError::ResponseTimedOut)??
            .map_err(TransportError::from_exception)?
            .into_iter()
            .map(u16::from)
            .collect(),
    };
    Ok(values)
}

async fn write_value(
    context: &mut Context,
    target: WriteTarget,
    address: u16,
    value: u16,
    limit: Duration,
) -> Result<(), TransportError> {
    let response = match target {
        WriteTarget::Register => timeout(limit, context.write_single_register(address, value)).await,
        WriteTarget::Coil => timeout(limit, context.write_single_coil(address, value != 0)).await,
    };
    response
        .map_err(|_| TransportError::ResponseTimedOut)??
        .map_err(TransportError::from_exception)
}

impl Transport for ModbusTransport {
    fn read(&mut self, kind: RegisterKind, start: u16, count: u16) -> Result<(), TransportError> {
        self.buffer.clear();
        if count == 0 {
            return Ok(());
        }

        let batch_size = match kind {
            RegisterKind::Coils => count,
            _ => self.config.max_batch_size.unwrap_or(count).max(1),
        };
        let mut remaining = count;
        let mut offset = 0u16;
        let mut out = Vec::with_capacity(usize::from(count));

        while remaining > 0 {
            let chunk = min(remaining, batch_size);
            let chunk_start = u16::try_from(u32::from(start) + u32::from(offset))
                .map_err(|_| TransportError::IllegalDataAddress)?;
            out.extend(self.read_chunk(kind, chunk_start, chunk)?);
            remaining -= chunk;
            offset += chunk;

            if remaining > 0 {
                if let Some(delay_ms) = self.config.inter_read_delay_ms {
                    self.runtime.block_on(sleep(Duration::from_millis(delay_ms)));
                }
            }
        }

        out.truncate(usize::from(count));
        self.buffer = out;
        Ok(())
    }

    fn response_buffer(&self) -> &[u16] {
        &self.buffer
    }

    fn clear_response_buffer(&mut self) {
        self.buffer.clear();
    }

    fn write(&mut self, target: WriteTarget, address: u16, value: u16) -> Result<(), TransportError> {
        let limit = Duration::from_millis(self.config.timeout_ms);
        self.runtime
            .block_on(write_value(&mut self.context, target, address, value, limit))?;
        debug!(?target, address, value, "modbus write ok");
        Ok(())
    }
}

fn resolve(runtime: &Runtime, host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    if let Ok(addr) = format!("{host}:{port}").parse::<SocketAddr>() {
        return Ok(addr);
    }
    runtime
        .block_on(tokio::net::lookup_host((host, port)))
        .map_err(|err| TransportError::Io(format!("resolve {host}: {err}")))?
        .next()
        .ok_or_else(|| TransportError::Io(format!("no address for {host}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_codes_map_to_modbus_mnemonics() {
        let err = TransportError::from_exception(ExceptionCode::IllegalDataAddress);
        assert_eq!(err, TransportError::IllegalDataAddress);
        assert_eq!(err.code(), 0x02);

        let err = TransportError::from_exception(ExceptionCode::ServerDeviceFailure);
        assert_eq!(err.mnemonic(), "SlaveDeviceFailure");

        let err = TransportError::from_exception(ExceptionCode::ServerDeviceBusy);
        assert_eq!(err.mnemonic(), "Exception");
        assert_eq!(err.code(), 0xE5);
    }

    #[test]
    fn io_errors_keep_timeout_and_crc_apart() {
        let timed_out = TransportError::from_io(io::Error::new(io::ErrorKind::TimedOut, "late"));
        assert_eq!(timed_out, TransportError::ResponseTimedOut);
        assert_eq!(timed_out.code(), 0xE2);

        let crc = TransportError::from_io(io::Error::new(io::ErrorKind::InvalidData, "crc"));
        assert_eq!(crc.mnemonic(), "InvalidCRC");

        let other = TransportError::from_io(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(other.mnemonic(), "Io");
    }
}
