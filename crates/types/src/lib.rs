use std::fmt;

use serde::{Deserialize, Serialize};

/// One measurement snapshot read from the charge controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Data {
    /// State of charge in percent (0-100).
    pub battery_charge: u8,
    pub battery_voltage: f32,
    pub battery_current: f32,
    /// Degrees Celsius.
    pub battery_temperature: i16,
    /// Degrees Celsius.
    pub controller_temperature: i16,
    pub load_voltage: f32,
    pub load_current: f32,
    pub load_power: f32,
    pub panel_voltage: f32,
    pub panel_current: f32,
    pub panel_power: f32,
    pub charging_state: ChargingState,
    pub error_state: Faults,
    pub load_enabled: bool,
    /// Energy generated today in Wh, when the controller reports it.
    pub generation: Option<u32>,
    /// Energy consumed today in Wh, when the controller reports it.
    pub consumption: Option<u32>,
    /// Extra readings only available from battery management systems.
    pub battery: Option<BatteryDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryDetail {
    pub cycles: u16,
    pub cell_voltage: Vec<f32>,
    pub cell_temperature: Vec<f32>,
    pub ambient_temperature: Vec<f32>,
    pub heater_temperature: Vec<f32>,
    pub bms_temperature: f32,
    /// Remaining capacity in Ah.
    pub remaining: f32,
    /// Total capacity in Ah.
    pub total: f32,
    pub charge_voltage_limit: f32,
    pub discharge_voltage_limit: f32,
    pub charge_current_limit: f32,
    pub discharge_current_limit: f32,
}

impl BatteryDetail {
    pub fn cell_count(&self) -> usize {
        self.cell_voltage.len()
    }
}

/// Charging phase reported by the controller. Renogy and EPEver controllers use
/// different numeric codes; the register maps translate them into this set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingState {
    #[default]
    Deactivated,
    Activated,
    Mppt,
    Equalizing,
    Boost,
    Floating,
    CurrentLimiting,
    NotCharging,
    Unknown(u8),
}

impl ChargingState {
    /// Renogy codes from the low byte of register 0x0120.
    pub fn from_renogy(code: u8) -> Self {
        match code {
            0x00 => Self::Deactivated,
            0x01 => Self::Activated,
            0x02 => Self::Mppt,
            0x03 => Self::Equalizing,
            0x04 => Self::Boost,
            0x05 => Self::Floating,
            0x06 => Self::CurrentLimiting,
            other => Self::Unknown(other),
        }
    }

    /// EPEver codes from bits D2-D3 of the charger status word.
    pub fn from_tracer(code: u8) -> Self {
        match code {
            0x00 => Self::NotCharging,
            0x01 => Self::Floating,
            0x02 => Self::Boost,
            0x03 => Self::Equalizing,
            other => Self::Unknown(other),
        }
    }

    pub fn is_charging(&self) -> bool {
        !matches!(self, Self::Deactivated | Self::NotCharging | Self::Unknown(_))
    }
}

/// Controller fault and warning flags, one bit per condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Faults(pub u32);

impl Faults {
    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, fault: Fault) -> bool {
        self.0 & fault.mask() != 0
    }

    pub fn active(&self) -> impl Iterator<Item = Fault> + '_ {
        Fault::ALL.iter().copied().filter(|fault| self.contains(*fault))
    }
}

impl From<u32> for Faults {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    BatteryOverDischarge,
    BatteryOverVoltage,
    BatteryUnderVoltage,
    LoadShortCircuit,
    LoadOverCurrent,
    ControllerTemperatureTooHigh,
    AmbientTemperatureTooHigh,
    PhotovoltaicInputOverpower,
    PhotovoltaicInputShortCircuit,
    PhotovoltaicInputOverVoltage,
    SolarPanelCounterCurrent,
    SolarPanelOverVoltage,
    SolarPanelReversed,
    AntiReverseMosShort,
    ChargeMosShort,
}

impl Fault {
    pub const ALL: [Fault; 15] = [
        Fault::BatteryOverDischarge,
        Fault::BatteryOverVoltage,
        Fault::BatteryUnderVoltage,
        Fault::LoadShortCircuit,
        Fault::LoadOverCurrent,
        Fault::ControllerTemperatureTooHigh,
        Fault::AmbientTemperatureTooHigh,
        Fault::PhotovoltaicInputOverpower,
        Fault::PhotovoltaicInputShortCircuit,
        Fault::PhotovoltaicInputOverVoltage,
        Fault::SolarPanelCounterCurrent,
        Fault::SolarPanelOverVoltage,
        Fault::SolarPanelReversed,
        Fault::AntiReverseMosShort,
        Fault::ChargeMosShort,
    ];

    /// Bit position inside the 32-bit fault word (B16 = E01 ... B30 = E15).
    pub fn bit(&self) -> u32 {
        16 + *self as u32
    }

    pub fn mask(&self) -> u32 {
        1 << self.bit()
    }

    pub fn description(&self) -> &'static str {
        match self {
            Fault::BatteryOverDischarge => "battery over-discharge",
            Fault::BatteryOverVoltage => "battery over-voltage",
            Fault::BatteryUnderVoltage => "battery under-voltage warning",
            Fault::LoadShortCircuit => "load short circuit",
            Fault::LoadOverCurrent => "load overpower or over-current",
            Fault::ControllerTemperatureTooHigh => "controller temperature too high",
            Fault::AmbientTemperatureTooHigh => "ambient temperature too high",
            Fault::PhotovoltaicInputOverpower => "photovoltaic input overpower",
            Fault::PhotovoltaicInputShortCircuit => "photovoltaic input side short circuit",
            Fault::PhotovoltaicInputOverVoltage => "photovoltaic input side over-voltage",
            Fault::SolarPanelCounterCurrent => "solar panel counter current",
            Fault::SolarPanelOverVoltage => "solar panel working point over-voltage",
            Fault::SolarPanelReversed => "solar panel reversely connected",
            Fault::AntiReverseMosShort => "anti-reverse MOS short circuit",
            Fault::ChargeMosShort => "charge MOS short circuit",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Controllable outputs in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputId {
    Load,
    Out1,
    Out2,
    Out3,
}

impl OutputId {
    pub const ALL: [OutputId; 4] = [OutputId::Load, OutputId::Out1, OutputId::Out2, OutputId::Out3];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputId::Load => "load",
            OutputId::Out1 => "out1",
            OutputId::Out2 => "out2",
            OutputId::Out3 => "out3",
        }
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current on/off state of every output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputStatus {
    pub load: bool,
    pub out1: bool,
    pub out2: bool,
    pub out3: bool,
}

impl OutputStatus {
    pub fn get(&self, output: OutputId) -> bool {
        match output {
            OutputId::Load => self.load,
            OutputId::Out1 => self.out1,
            OutputId::Out2 => self.out2,
            OutputId::Out3 => self.out3,
        }
    }

    pub fn set(&mut self, output: OutputId, enabled: bool) {
        match output {
            OutputId::Load => self.load = enabled,
            OutputId::Out1 => self.out1 = enabled,
            OutputId::Out2 => self.out2 = enabled,
            OutputId::Out3 => self.out3 = enabled,
        }
    }
}

/// Identity read once from the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model: String,
    pub software_version: u32,
    pub hardware_version: u32,
    pub serial: u32,
    pub address: u8,
}
