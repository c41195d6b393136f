use serde::{Deserialize, Serialize};
use types::{Data, OutputId, OutputStatus};

/// Measurement an output follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InputType {
    #[default]
    Disabled,
    BatterySoc,
    BatteryVoltage,
    PanelVoltage,
    PanelCurrent,
}

impl InputType {
    /// Unknown names fall back to `Disabled`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "bsoc" => InputType::BatterySoc,
            "bvoltage" => InputType::BatteryVoltage,
            "pvoltage" => InputType::PanelVoltage,
            "pcurrent" => InputType::PanelCurrent,
            _ => InputType::Disabled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Disabled => "disabled",
            InputType::BatterySoc => "bsoc",
            InputType::BatteryVoltage => "bvoltage",
            InputType::PanelVoltage => "pvoltage",
            InputType::PanelCurrent => "pcurrent",
        }
    }

    pub fn value(&self, data: &Data) -> Option<f32> {
        match self {
            InputType::Disabled => None,
            InputType::BatterySoc => Some(f32::from(data.battery_charge)),
            InputType::BatteryVoltage => Some(data.battery_voltage),
            InputType::PanelVoltage => Some(data.panel_voltage),
            InputType::PanelCurrent => Some(data.panel_current),
        }
    }
}

impl From<String> for InputType {
    fn from(value: String) -> Self {
        InputType::parse(&value)
    }
}

impl From<InputType> for String {
    fn from(value: InputType) -> Self {
        value.as_str().to_string()
    }
}

/// Thresholds for one output. `min <= max` is expected but not enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub input_type: InputType,
    pub inverted: bool,
    pub min: f32,
    pub max: f32,
    /// Last state the controller applied.
    pub last_state: bool,
}

impl OutputConfig {
    pub fn new(input_type: InputType, min: f32, max: f32) -> Self {
        Self {
            input_type,
            min,
            max,
            ..Self::default()
        }
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.input_type != InputType::Disabled
    }
}

/// Configuration of every controllable output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSet {
    pub load: OutputConfig,
    pub out1: OutputConfig,
    pub out2: OutputConfig,
    pub out3: OutputConfig,
}

impl OutputSet {
    pub fn get(&self, output: OutputId) -> &OutputConfig {
        match output {
            OutputId::Load => &self.load,
            OutputId::Out1 => &self.out1,
            OutputId::Out2 => &self.out2,
            OutputId::Out3 => &self.out3,
        }
    }

    pub fn get_mut(&mut self, output: OutputId) -> &mut OutputConfig {
        match output {
            OutputId::Load => &mut self.load,
            OutputId::Out1 => &mut self.out1,
            OutputId::Out2 => &mut self.out2,
            OutputId::Out3 => &mut self.out3,
        }
    }

    pub fn status(&self) -> OutputStatus {
        let mut status = OutputStatus::default();
        for output in OutputId::ALL {
            status.set(output, self.get(output).last_state);
        }
        status
    }

    /// Restore persisted `last_state` values.
    pub fn restore(&mut self, status: &OutputStatus) {
        for output in OutputId::ALL {
            self.get_mut(output).last_state = status.get(output);
        }
    }
}

/// Target state for `value`, or `None` while it stays inside the dead band.
pub fn evaluate(config: &OutputConfig, value: f32) -> Option<bool> {
    if value >= config.max {
        Some(!config.inverted)
    } else if value < config.min {
        Some(config.inverted)
    } else {
        None
    }
}
