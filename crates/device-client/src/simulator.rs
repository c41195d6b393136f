use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use types::{ChargingState, Data, DeviceInfo, Fault, Faults};

use crate::source::DataSource;
use crate::PollError;

const PANEL_POWER: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationMode {
    /// Noisy values with a battery that cycles between empty and full.
    Simulated,
    /// Fixed values with two fault bits set.
    Constant,
}

/// Open-circuit voltage of a 12 V lead-acid battery at the given state of charge.
pub fn battery_soc_to_volts(soc: f32) -> f32 {
    0.000004 * soc * soc * soc - 0.000848 * soc * soc + 0.061113 * soc + 10.6099
}

/// Synthetic controller for bench and UI work without hardware.
pub struct SimulatedSource {
    mode: SimulationMode,
    rng: StdRng,
    battery_charge: u8,
    charging: bool,
    load_enabled: bool,
}

impl SimulatedSource {
    pub fn new(mode: SimulationMode, seed: u64) -> Self {
        Self {
            mode,
            rng: StdRng::seed_from_u64(seed),
            battery_charge: 0,
            charging: true,
            load_enabled: false,
        }
    }

    pub fn mode(&self) -> SimulationMode {
        self.mode
    }

    fn simulated(&mut self) -> Data {
        let panel_voltage = 14.0 + 0.1 * self.rng.gen_range(-10..10) as f32;
        let panel_current = PANEL_POWER / panel_voltage;

        if self.charging {
            self.battery_charge = self.battery_charge.saturating_add(1);
        } else {
            self.battery_charge = self.battery_charge.saturating_sub(1);
        }
        if self.battery_charge == 0 || self.battery_charge >= 100 {
            self.charging = !self.charging;
        }

        let battery_voltage = battery_soc_to_volts(f32::from(self.battery_charge));
        let battery_current = match (self.load_enabled, self.charging) {
            (true, true) => 3.0 + 0.01 * self.rng.gen_range(-100..100) as f32,
            (true, false) => 0.0,
            (false, _) => PANEL_POWER / battery_voltage,
        };
        let load_current = if self.load_enabled {
            PANEL_POWER / battery_voltage - battery_current
        } else {
            0.0
        };
        let error_state = if battery_voltage <= 11.0 {
            Faults(Fault::BatteryOverDischarge.mask())
        } else {
            Faults::default()
        };

        Data {
            battery_charge: self.battery_charge,
            battery_voltage,
            battery_current,
            battery_temperature: 20 + self.rng.gen_range(-2..2),
            controller_temperature: 21 + self.rng.gen_range(-2..2),
            load_voltage: battery_voltage,
            load_current,
            load_power: battery_voltage * load_current,
            panel_voltage,
            panel_current,
            panel_power: panel_voltage * panel_current,
            charging_state: if self.charging {
                ChargingState::Activated
            } else {
                ChargingState::Deactivated
            },
            error_state,
            load_enabled: self.load_enabled,
            generation: None,
            consumption: None,
            battery: None,
        }
    }

    fn constant(&self) -> Data {
        let panel_voltage = 14.25;
        let panel_current = PANEL_POWER / panel_voltage;
        let battery_charge = 80;
        let battery_voltage = battery_soc_to_volts(f32::from(battery_charge));
        let battery_current = if self.load_enabled {
            3.45
        } else {
            PANEL_POWER / battery_voltage
        };
        let load_current = if self.load_enabled {
            PANEL_POWER / battery_voltage - battery_current
        } else {
            0.0
        };

        Data {
            battery_charge,
            battery_voltage,
            battery_current,
            battery_temperature: 20,
            controller_temperature: 21,
            load_voltage: battery_voltage,
            load_current,
            load_power: battery_voltage * load_current,
            panel_voltage,
            panel_current,
            panel_power: PANEL_POWER,
            charging_state: ChargingState::Mppt,
            error_state: Faults(Fault::AmbientTemperatureTooHigh.mask() | Fault::BatteryOverVoltage.mask()),
            load_enabled: self.load_enabled,
            generation: None,
            consumption: None,
            battery: None,
        }
    }
}

impl DataSource for SimulatedSource {
    fn acquire(&mut self, _current: &Data) -> Result<Data, PollError> {
        Ok(match self.mode {
            SimulationMode::Simulated => self.simulated(),
            SimulationMode::Constant => self.constant(),
        })
    }

    fn set_load(&mut self, enable: bool) -> Result<(), PollError> {
        self.load_enabled = enable;
        Ok(())
    }

    fn identify(&mut self) -> Result<Option<DeviceInfo>, PollError> {
        Ok(Some(DeviceInfo {
            model: "RNG-SIMULATOR".to_string(),
            software_version: 1,
            hardware_version: 1,
            serial: 0,
            address: 1,
        }))
    }
}
