use serde::{Deserialize, Serialize};

use modbus_client::{RegisterKind, WriteTarget};
use register_decoder::{
    read_i16_be, read_string, read_u16_be, read_u32, read_u8_lower, read_u8_upper, sign_magnitude,
    trim_device_string, DecodeError, WordOrder,
};
use types::{BatteryDetail, ChargingState, Data, DeviceInfo, Fault, Faults};

pub const ROVER_DATA_START: u16 = 0x0100;
pub const ROVER_DATA_COUNT: u16 = 35;
pub const ROVER_LOAD_REGISTER: u16 = 0x010A;
pub const ROVER_INFO_START: u16 = 0x000C;
pub const ROVER_INFO_COUNT: u16 = 19;

pub const TRACER_REALTIME_START: u16 = 0x3100;
pub const TRACER_REALTIME_COUNT: u16 = 18;
pub const TRACER_SOC_START: u16 = 0x311A;
pub const TRACER_STATUS_START: u16 = 0x3200;
pub const TRACER_STATUS_COUNT: u16 = 3;
pub const TRACER_ENERGY_START: u16 = 0x3304;
pub const TRACER_ENERGY_COUNT: u16 = 10;
pub const TRACER_LOAD_COIL: u16 = 0x0002;

pub const BATTERY_DATA_START: u16 = 5000;
pub const BATTERY_DATA_COUNT: u16 = 53;

const MAX_CELLS: usize = 16;

/// Register map of one controller generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Renogy Rover / Wanderer family.
    #[default]
    Rover,
    /// EPEver Tracer family.
    Tracer,
    /// Renogy smart lithium battery BMS.
    Battery,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Rover => "rover",
            Profile::Tracer => "tracer",
            Profile::Battery => "battery",
        }
    }

    pub fn default_word_order(&self) -> WordOrder {
        match self {
            Profile::Rover | Profile::Battery => WordOrder::HighFirst,
            Profile::Tracer => WordOrder::LowFirst,
        }
    }

    /// Where the load switch lives, if the device has one.
    pub fn load_switch(&self) -> Option<(WriteTarget, u16)> {
        match self {
            Profile::Rover => Some((WriteTarget::Register, ROVER_LOAD_REGISTER)),
            Profile::Tracer => Some((WriteTarget::Coil, TRACER_LOAD_COIL)),
            Profile::Battery => None,
        }
    }

    /// Reads that make up one snapshot, in issue order.
    pub fn data_reads(&self) -> &'static [(RegisterKind, u16, u16)] {
        match self {
            Profile::Rover => &[(RegisterKind::Holding, ROVER_DATA_START, ROVER_DATA_COUNT)],
            Profile::Tracer => &[
                (RegisterKind::Input, TRACER_REALTIME_START, TRACER_REALTIME_COUNT),
                (RegisterKind::Input, TRACER_SOC_START, 1),
                (RegisterKind::Input, TRACER_STATUS_START, TRACER_STATUS_COUNT),
                (RegisterKind::Input, TRACER_ENERGY_START, TRACER_ENERGY_COUNT),
                (RegisterKind::Coils, TRACER_LOAD_COIL, 1),
            ],
            Profile::Battery => &[(RegisterKind::Holding, BATTERY_DATA_START, BATTERY_DATA_COUNT)],
        }
    }

    pub fn info_read(&self) -> Option<(RegisterKind, u16, u16)> {
        match self {
            Profile::Rover => Some((RegisterKind::Holding, ROVER_INFO_START, ROVER_INFO_COUNT)),
            Profile::Tracer | Profile::Battery => None,
        }
    }

    /// Decode the response to `data_reads()[step]` into `data`.
    pub fn apply(&self, step: usize, buf: &[u16], order: WordOrder, data: &mut Data) -> Result<(), DecodeError> {
        match (self, step) {
            (Profile::Rover, _) => decode_rover(buf, order, data),
            (Profile::Tracer, 0) => decode_tracer_realtime(buf, order, data),
            (Profile::Tracer, 1) => {
                data.battery_charge = read_u16_be(buf, 0)?.min(100) as u8;
                Ok(())
            }
            (Profile::Tracer, 2) => decode_tracer_status(buf, data),
            (Profile::Tracer, 3) => decode_tracer_energy(buf, order, data),
            (Profile::Tracer, _) => {
                data.load_enabled = read_u16_be(buf, 0)? != 0;
                Ok(())
            }
            (Profile::Battery, _) => decode_battery(buf, order, data),
        }
    }
}

fn tenths(value: u16) -> f32 {
    0.1 * f32::from(value)
}

fn hundredths(value: i16) -> f32 {
    0.01 * f32::from(value)
}

pub fn decode_rover(buf: &[u16], order: WordOrder, data: &mut Data) -> Result<(), DecodeError> {
    data.battery_charge = read_u16_be(buf, 0)?.min(100) as u8;
    data.battery_voltage = tenths(read_u16_be(buf, 1)?);
    data.battery_current = hundredths(read_i16_be(buf, 2)?);
    data.controller_temperature = sign_magnitude(read_u8_upper(buf, 3)?);
    data.battery_temperature = sign_magnitude(read_u8_lower(buf, 3)?);

    data.load_voltage = tenths(read_u16_be(buf, 4)?);
    data.load_current = 0.01 * f32::from(read_u16_be(buf, 5)?);
    data.load_power = f32::from(read_u16_be(buf, 6)?);

    data.panel_voltage = tenths(read_u16_be(buf, 7)?);
    data.panel_current = 0.01 * f32::from(read_u16_be(buf, 8)?);
    data.panel_power = f32::from(read_u16_be(buf, 9)?);

    data.generation = Some(u32::from(read_u16_be(buf, 19)?));
    data.consumption = Some(u32::from(read_u16_be(buf, 20)?));

    data.charging_state = ChargingState::from_renogy(read_u8_lower(buf, 32)?);
    data.load_enabled = read_u8_upper(buf, 32)? & 0x80 != 0;
    data.error_state = Faults(read_u32(buf, 33, order)?);
    data.battery = None;
    Ok(())
}

pub fn decode_rover_info(buf: &[u16], order: WordOrder) -> Result<DeviceInfo, DecodeError> {
    let model = read_string(buf, 0, 8)?;
    Ok(DeviceInfo {
        model: trim_device_string(&model).to_string(),
        software_version: read_u32(buf, 8, order)?,
        hardware_version: read_u32(buf, 10, order)?,
        serial: read_u32(buf, 12, order)?,
        address: read_u8_lower(buf, 14)?,
    })
}

fn decode_tracer_realtime(buf: &[u16], order: WordOrder, data: &mut Data) -> Result<(), DecodeError> {
    data.panel_voltage = hundredths(read_i16_be(buf, 0)?);
    data.panel_current = hundredths(read_i16_be(buf, 1)?);
    data.panel_power = 0.01 * read_u32(buf, 2, order)? as f32;

    data.battery_voltage = hundredths(read_i16_be(buf, 4)?);
    data.battery_current = hundredths(read_i16_be(buf, 5)?);

    data.load_voltage = hundredths(read_i16_be(buf, 12)?);
    data.load_current = hundredths(read_i16_be(buf, 13)?);
    data.load_power = 0.01 * read_u32(buf, 14, order)? as f32;

    data.battery_temperature = hundredths(read_i16_be(buf, 16)?).round() as i16;
    data.controller_temperature = hundredths(read_i16_be(buf, 17)?).round() as i16;
    data.battery = None;
    Ok(())
}

fn decode_tracer_status(buf: &[u16], data: &mut Data) -> Result<(), DecodeError> {
    let battery = read_u16_be(buf, 0)?;
    let charger = read_u16_be(buf, 1)?;
    data.charging_state = ChargingState::from_tracer(((charger >> 2) & 0x3) as u8);

    let mut faults = 0u32;
    match battery & 0x0F {
        0x01 => faults |= Fault::BatteryOverVoltage.mask(),
        0x02 => faults |= Fault::BatteryUnderVoltage.mask(),
        0x03 => faults |= Fault::BatteryOverDischarge.mask(),
        _ => {}
    }
    let charger_bits = [
        (4, Fault::PhotovoltaicInputShortCircuit),
        (8, Fault::LoadShortCircuit),
        (9, Fault::LoadOverCurrent),
        (11, Fault::AntiReverseMosShort),
        (13, Fault::ChargeMosShort),
    ];
    for (bit, fault) in charger_bits {
        if charger & (1 << bit) != 0 {
            faults |= fault.mask();
        }
    }
    if (charger >> 14) & 0x3 == 0x2 {
        faults |= Fault::PhotovoltaicInputOverVoltage.mask();
    }
    data.error_state = Faults(faults);
    Ok(())
}

fn decode_tracer_energy(buf: &[u16], order: WordOrder, data: &mut Data) -> Result<(), DecodeError> {
    // 0.01 kWh -> Wh
    data.consumption = Some(read_u32(buf, 0, order)?.saturating_mul(10));
    data.generation = Some(read_u32(buf, 8, order)?.saturating_mul(10));
    Ok(())
}

fn counted(buf: &[u16], count_at: usize, max: usize) -> Result<usize, DecodeError> {
    Ok(usize::from(read_u16_be(buf, count_at)?).min(max))
}

fn temperatures(buf: &[u16], start: usize, count: usize) -> Result<Vec<f32>, DecodeError> {
    (0..count)
        .map(|index| Ok(0.1 * f32::from(read_i16_be(buf, start + index)?)))
        .collect()
}

pub fn decode_battery(buf: &[u16], order: WordOrder, data: &mut Data) -> Result<(), DecodeError> {
    let cells = counted(buf, 0, MAX_CELLS)?;
    let cell_voltage = (0..cells)
        .map(|index| Ok(tenths(read_u16_be(buf, 1 + index)?)))
        .collect::<Result<Vec<_>, DecodeError>>()?;
    let cell_temperature = temperatures(buf, 18, counted(buf, 17, MAX_CELLS)?)?;
    let bms_temperature = 0.1 * f32::from(read_i16_be(buf, 34)?);
    let ambient_temperature = temperatures(buf, 36, counted(buf, 35, 2)?)?;
    let heater_temperature = temperatures(buf, 39, counted(buf, 38, 2)?)?;

    let current = hundredths(read_i16_be(buf, 41)?);
    let voltage = tenths(read_u16_be(buf, 42)?);
    let remaining = 0.001 * read_u32(buf, 43, order)? as f32;
    let total = 0.001 * read_u32(buf, 45, order)? as f32;

    let detail = BatteryDetail {
        cycles: read_u16_be(buf, 47)?,
        cell_voltage,
        cell_temperature,
        ambient_temperature,
        heater_temperature,
        bms_temperature,
        remaining,
        total,
        charge_voltage_limit: tenths(read_u16_be(buf, 48)?),
        discharge_voltage_limit: tenths(read_u16_be(buf, 49)?),
        charge_current_limit: 0.01 * f32::from(read_u16_be(buf, 50)?),
        discharge_current_limit: hundredths(read_i16_be(buf, 51)?),
    };

    data.battery_charge = if total > 0.0 {
        (100.0 * remaining / total).round().clamp(0.0, 100.0) as u8
    } else {
        0
    };
    data.battery_voltage = voltage;
    data.battery_current = current;
    data.battery_temperature = bms_temperature.round() as i16;
    data.controller_temperature = bms_temperature.round() as i16;
    data.charging_state = if current > 0.0 {
        ChargingState::Activated
    } else {
        ChargingState::Deactivated
    };
    data.load_enabled = false;
    data.battery = Some(detail);
    Ok(())
}
