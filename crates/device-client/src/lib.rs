use thiserror::Error;
use tracing::{debug, info, warn};

use modbus_client::TransportError;
use register_decoder::DecodeError;
use telemetry::Observable;
use types::{Data, DeviceInfo};

pub mod profile;
mod simulator;
mod source;

pub use profile::Profile;
pub use simulator::{battery_soc_to_volts, SimulatedSource, SimulationMode};
pub use source::{DataSource, ModbusSource};

#[derive(Debug, Error)]
pub enum PollError {
    #[error("could not read registers 0x{address:04X}: {} (0x{:02X})", .source.mnemonic(), .source.code())]
    Read {
        address: u16,
        #[source]
        source: TransportError,
    },
    #[error("could not write 0x{address:04X}: {} (0x{:02X})", .source.mnemonic(), .source.code())]
    Write {
        address: u16,
        #[source]
        source: TransportError,
    },
    #[error("malformed response from 0x{address:04X}: {source}")]
    Decode {
        address: u16,
        #[source]
        source: DecodeError,
    },
    #[error("{0} has no load switch")]
    Unsupported(&'static str),
}

impl PollError {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            PollError::Read { source, .. } | PollError::Write { source, .. } => source.mnemonic(),
            PollError::Decode { .. } => "InvalidResponse",
            PollError::Unsupported(_) => "Unsupported",
        }
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            PollError::Read { source, .. } | PollError::Write { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
}

/// Owns a data source and the last good snapshot.
///
/// Each [`poll`](DeviceClient::poll) either replaces the snapshot with a fully
/// decoded one and hands it to the listener, or leaves it untouched.
pub struct DeviceClient<S> {
    source: S,
    data: Data,
    valid: bool,
    listener: Observable<Data>,
    status: Observable<String>,
    info: Option<DeviceInfo>,
    identify: bool,
    stats: PollStats,
}

impl<S: DataSource> DeviceClient<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            data: Data::default(),
            valid: false,
            listener: Observable::new(),
            status: Observable::new(),
            info: None,
            identify: true,
            stats: PollStats::default(),
        }
    }

    pub fn poll(&mut self) -> Result<&Data, PollError> {
        match self.source.acquire(&self.data) {
            Ok(data) => {
                self.data = data;
                self.valid = true;
                self.stats.successes += 1;
                self.stats.consecutive_failures = 0;
                self.set_status("Connected");
                self.listener.notify(self.data.clone());

                if self.identify {
                    self.read_info();
                }
                Ok(&self.data)
            }
            Err(err) => {
                self.stats.failures += 1;
                self.stats.consecutive_failures += 1;
                warn!(
                    consecutive = self.stats.consecutive_failures,
                    "{err}"
                );
                self.set_status(err.mnemonic());
                Err(err)
            }
        }
    }

    /// Switch the device's own load output. The result shows up on the next poll.
    pub fn enable_load(&mut self, enable: bool) -> Result<(), PollError> {
        let state = if enable { "on" } else { "off" };
        match self.source.set_load(enable) {
            Ok(()) => {
                debug!("load switched {state}");
                Ok(())
            }
            Err(err) => {
                warn!("could not turn load {state}: {err}");
                Err(err)
            }
        }
    }

    fn read_info(&mut self) {
        match self.source.identify() {
            Ok(Some(info)) => {
                info!(
                    model = %info.model,
                    software = info.software_version,
                    hardware = info.hardware_version,
                    serial = info.serial,
                    address = info.address,
                    "device identified"
                );
                self.info = Some(info);
                self.identify = false;
            }
            Ok(None) => self.identify = false,
            Err(err) => debug!("identification failed: {err}"),
        }
    }

    fn set_status(&mut self, status: &str) {
        if self.status.value().map(String::as_str) != Some(status) {
            self.status.notify(status.to_string());
        }
    }

    /// Last committed snapshot; `Data::default()` until the first successful poll.
    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn has_data(&self) -> bool {
        self.valid
    }

    pub fn info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    pub fn listener(&mut self) -> &mut Observable<Data> {
        &mut self.listener
    }

    pub fn status(&mut self) -> &mut Observable<String> {
        &mut self.status
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}
