use std::ops::AddAssign;

use types::Data;

/// Approximate rolling mean: each sample moves the average by `1/window` of the
/// difference, so older samples decay exponentially.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingAverage {
    average: f32,
    window: u32,
}

impl RollingAverage {
    pub fn new(window: u32) -> Self {
        Self {
            average: 0.0,
            window: window.max(1),
        }
    }

    pub fn average(&self) -> f32 {
        self.average
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    /// Replace the average outright.
    pub fn seed(&mut self, value: f32) {
        self.average = value;
    }

    pub fn add(&mut self, sample: f32) {
        let window = self.window as f32;
        self.average -= self.average / window;
        self.average += sample / window;
    }

    pub fn reset(&mut self) {
        self.average = 0.0;
    }
}

impl AddAssign<f32> for RollingAverage {
    fn add_assign(&mut self, sample: f32) {
        self.add(sample);
    }
}

/// Smoothed values accumulated between two cloud reports.
#[derive(Debug, Clone)]
pub struct EnergyAggregator {
    initial: bool,
    power_generation: RollingAverage,
    power_consumption: RollingAverage,
    temperature: RollingAverage,
    voltage: RollingAverage,
    energy_generation: Option<u32>,
    energy_consumption: Option<u32>,
}

impl EnergyAggregator {
    pub fn new(window: u32) -> Self {
        Self {
            initial: true,
            power_generation: RollingAverage::new(window),
            power_consumption: RollingAverage::new(window),
            temperature: RollingAverage::new(window),
            voltage: RollingAverage::new(window),
            energy_generation: None,
            energy_consumption: None,
        }
    }

    pub fn update_data(&mut self, data: &Data) {
        let generation = data.panel_voltage * data.panel_current;
        let consumption = data.load_voltage * data.load_current;
        let temperature = f32::from(data.battery_temperature);

        if self.initial {
            self.initial = false;
            self.power_generation.seed(generation);
            self.power_consumption.seed(consumption);
            self.temperature.seed(temperature);
            self.voltage.seed(data.battery_voltage);
        } else {
            self.power_generation += generation;
            self.power_consumption += consumption;
            self.temperature += temperature;
            self.voltage += data.battery_voltage;
        }

        // Counters are cumulative on the device; the latest reading wins.
        self.energy_generation = data.generation;
        self.energy_consumption = data.consumption;
    }

    /// Back to the start-up state; the next sample seeds every average again.
    pub fn reset(&mut self) {
        let window = self.power_generation.window();
        *self = Self::new(window);
    }

    pub fn is_initial(&self) -> bool {
        self.initial
    }

    pub fn power_generation(&self) -> f32 {
        self.power_generation.average()
    }

    pub fn power_consumption(&self) -> f32 {
        self.power_consumption.average()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.average()
    }

    pub fn voltage(&self) -> f32 {
        self.voltage.average()
    }

    pub fn energy_generation(&self) -> Option<u32> {
        self.energy_generation
    }

    pub fn energy_consumption(&self) -> Option<u32> {
        self.energy_consumption
    }
}
