use modbus_client::{RegisterKind, Transport};
use register_decoder::WordOrder;
use tracing::debug;
use types::{Data, DeviceInfo};

use crate::profile::{decode_rover_info, Profile};
use crate::PollError;

/// Strategy that produces snapshots for a [`crate::DeviceClient`].
pub trait DataSource {
    /// Produce a complete new snapshot. `current` is the last committed one.
    fn acquire(&mut self, current: &Data) -> Result<Data, PollError>;

    fn set_load(&mut self, enable: bool) -> Result<(), PollError>;

    /// `Ok(None)` when the device has no identification registers.
    fn identify(&mut self) -> Result<Option<DeviceInfo>, PollError>;
}

impl<D: DataSource + ?Sized> DataSource for Box<D> {
    fn acquire(&mut self, current: &Data) -> Result<Data, PollError> {
        (**self).acquire(current)
    }

    fn set_load(&mut self, enable: bool) -> Result<(), PollError> {
        (**self).set_load(enable)
    }

    fn identify(&mut self) -> Result<Option<DeviceInfo>, PollError> {
        (**self).identify()
    }
}

/// Reads a fixed register map through a Modbus transport.
pub struct ModbusSource<T> {
    transport: T,
    profile: Profile,
    word_order: WordOrder,
}

impl<T: Transport> ModbusSource<T> {
    pub fn new(transport: T, profile: Profile) -> Self {
        Self {
            transport,
            profile,
            word_order: profile.default_word_order(),
        }
    }

    /// Override the profile's word order for firmware that combines 32-bit values differently.
    pub fn with_word_order(mut self, order: WordOrder) -> Self {
        self.word_order = order;
        self
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn word_order(&self) -> WordOrder {
        self.word_order
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn read(&mut self, kind: RegisterKind, address: u16, count: u16) -> Result<&[u16], PollError> {
        self.transport.clear_response_buffer();
        self.transport
            .read(kind, address, count)
            .map_err(|source| PollError::Read { address, source })?;
        Ok(self.transport.response_buffer())
    }
}

impl<T: Transport> DataSource for ModbusSource<T> {
    fn acquire(&mut self, current: &Data) -> Result<Data, PollError> {
        let mut scratch = current.clone();
        let profile = self.profile;
        let order = self.word_order;

        for (step, (kind, address, count)) in profile.data_reads().iter().copied().enumerate() {
            let buf = self.read(kind, address, count)?;
            profile
                .apply(step, buf, order, &mut scratch)
                .map_err(|source| PollError::Decode { address, source })?;
        }

        debug!(profile = profile.as_str(), "snapshot decoded");
        Ok(scratch)
    }

    fn set_load(&mut self, enable: bool) -> Result<(), PollError> {
        let (target, address) = self
            .profile
            .load_switch()
            .ok_or(PollError::Unsupported(self.profile.as_str()))?;
        self.transport
            .write(target, address, u16::from(enable))
            .map_err(|source| PollError::Write { address, source })
    }

    fn identify(&mut self) -> Result<Option<DeviceInfo>, PollError> {
        let Some((kind, address, count)) = self.profile.info_read() else {
            return Ok(None);
        };
        let order = self.word_order;
        let buf = self.read(kind, address, count)?;
        let info = decode_rover_info(buf, order).map_err(|source| PollError::Decode { address, source })?;
        Ok(Some(info))
    }
}
