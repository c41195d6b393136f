mod config;
mod pins;

use thiserror::Error;
use tracing::{debug, info, warn};

use telemetry::Observable;
use types::{Data, OutputId, OutputStatus};

pub use config::{evaluate, InputType, OutputConfig, OutputSet};
pub use pins::{LogPin, OutputPin, SysfsPin};

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("output driver rejected {output}: {reason}")]
    Rejected { output: OutputId, reason: String },
    #[error("{0} cannot be driven")]
    Unsupported(OutputId),
    #[error("gpio io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hardware side of the outputs: the device's load switch and the bridge's own pins.
pub trait OutputDriver {
    fn drive(&mut self, output: OutputId, enable: bool) -> Result<(), DriveError>;
}

/// Threshold controller with hysteresis for all outputs.
pub struct OutputController {
    outputs: OutputSet,
    status: Observable<OutputStatus>,
}

impl OutputController {
    pub fn new(outputs: OutputSet) -> Self {
        for output in OutputId::ALL {
            warn_inverted_band(output, outputs.get(output));
        }
        Self {
            status: Observable::with_value(outputs.status()),
            outputs,
        }
    }

    /// Evaluate every enabled output against `data`, in `OutputId::ALL` order.
    /// Returns the outputs that were switched.
    pub fn update(&mut self, data: &Data, driver: &mut dyn OutputDriver) -> Vec<OutputId> {
        let mut switched = Vec::new();
        for output in OutputId::ALL {
            let config = *self.outputs.get(output);
            let Some(value) = config.input_type.value(data) else {
                continue;
            };
            let Some(target) = evaluate(&config, value) else {
                continue;
            };
            if target == config.last_state {
                continue;
            }

            debug!(
                %output,
                input = config.input_type.as_str(),
                value,
                min = config.min,
                max = config.max,
                target,
                "threshold crossed"
            );
            if self.apply(output, target, driver).is_ok() {
                switched.push(output);
            }
        }
        switched
    }

    /// Drive `output` regardless of its thresholds.
    pub fn enable(&mut self, output: OutputId, enable: bool, driver: &mut dyn OutputDriver) -> Result<(), DriveError> {
        self.apply(output, enable, driver)
    }

    pub fn enable_load(&mut self, enable: bool, driver: &mut dyn OutputDriver) -> Result<(), DriveError> {
        self.enable(OutputId::Load, enable, driver)
    }

    pub fn enable_out1(&mut self, enable: bool, driver: &mut dyn OutputDriver) -> Result<(), DriveError> {
        self.enable(OutputId::Out1, enable, driver)
    }

    pub fn enable_out2(&mut self, enable: bool, driver: &mut dyn OutputDriver) -> Result<(), DriveError> {
        self.enable(OutputId::Out2, enable, driver)
    }

    pub fn enable_out3(&mut self, enable: bool, driver: &mut dyn OutputDriver) -> Result<(), DriveError> {
        self.enable(OutputId::Out3, enable, driver)
    }

    fn apply(&mut self, output: OutputId, enable: bool, driver: &mut dyn OutputDriver) -> Result<(), DriveError> {
        if let Err(err) = driver.drive(output, enable) {
            warn!(%output, enable, error = %err, "could not drive output");
            return Err(err);
        }

        self.outputs.get_mut(output).last_state = enable;
        info!(%output, enable, "output switched");
        self.status.notify(self.outputs.status());
        Ok(())
    }

    /// Replace thresholds for one output. `last_state` stays owned by the controller.
    pub fn update_config(&mut self, output: OutputId, config: OutputConfig) {
        warn_inverted_band(output, &config);
        let slot = self.outputs.get_mut(output);
        let last_state = slot.last_state;
        *slot = OutputConfig { last_state, ..config };
    }

    pub fn update_outputs(&mut self, outputs: OutputSet) {
        for output in OutputId::ALL {
            self.update_config(output, *outputs.get(output));
        }
    }

    pub fn outputs(&self) -> &OutputSet {
        &self.outputs
    }

    pub fn output_status(&self) -> OutputStatus {
        self.outputs.status()
    }

    pub fn status(&mut self) -> &mut Observable<OutputStatus> {
        &mut self.status
    }
}

fn warn_inverted_band(output: OutputId, config: &OutputConfig) {
    if config.is_enabled() && config.min > config.max {
        warn!(
            %output,
            min = config.min,
            max = config.max,
            "min is above max; output will follow max only"
        );
    }
}
