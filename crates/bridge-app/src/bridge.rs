use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use device_client::{DataSource, DeviceClient};
use output_control::{DriveError, OutputController, OutputDriver, OutputPin};
use telemetry::{ReportSink, Reporter};
use types::{Data, OutputId};

/// Work items the control loop schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Poll,
    Report,
    Watchdog,
}

/// Pins behind out1, out2 and out3.
pub type Pins = [Box<dyn OutputPin>; 3];

/// Routes each output to its hardware: the load to the controller's switch, the rest to pins.
struct BridgeDriver<'a, S> {
    device: &'a mut DeviceClient<S>,
    pins: &'a mut Pins,
}

impl<S: DataSource> OutputDriver for BridgeDriver<'_, S> {
    fn drive(&mut self, output: OutputId, enable: bool) -> Result<(), DriveError> {
        match output {
            OutputId::Load => self
                .device
                .enable_load(enable)
                .map_err(|err| DriveError::Rejected {
                    output,
                    reason: err.to_string(),
                }),
            OutputId::Out1 => self.pins[0].set(enable),
            OutputId::Out2 => self.pins[1].set(enable),
            OutputId::Out3 => self.pins[2].set(enable),
        }
    }
}

/// Everything the control loop touches, owned in one place.
pub struct Bridge<S, R> {
    device: DeviceClient<S>,
    controller: OutputController,
    pins: Pins,
    reporter: Option<Reporter<R>>,
}

impl<S: DataSource, R: ReportSink> Bridge<S, R> {
    pub fn new(
        device: DeviceClient<S>,
        controller: OutputController,
        pins: Pins,
        reporter: Option<Reporter<R>>,
    ) -> Self {
        Self {
            device,
            controller,
            pins,
            reporter,
        }
    }

    /// Poll the controller and hand a fresh snapshot to the outputs and the reporter.
    /// A failed poll is already logged by the device client and leaves everything untouched.
    pub fn poll_cycle(&mut self) -> bool {
        let data: Data = match self.device.poll() {
            Ok(data) => data.clone(),
            Err(_) => return false,
        };

        let mut driver = BridgeDriver {
            device: &mut self.device,
            pins: &mut self.pins,
        };
        let switched = self.controller.update(&data, &mut driver);
        if !switched.is_empty() {
            debug!(?switched, "outputs switched by thresholds");
        }

        if let Some(reporter) = self.reporter.as_mut() {
            reporter.update_data(&data);
        }
        true
    }

    /// Drive out1..out3 to their restored `last_state`. Pins open low, so this runs once
    /// at boot before the first poll.
    pub fn apply_restored_state(&mut self) {
        let status = self.controller.output_status();
        let outputs = [OutputId::Out1, OutputId::Out2, OutputId::Out3];
        for (pin, output) in self.pins.iter_mut().zip(outputs) {
            let level = status.get(output);
            if let Err(err) = pin.set(level) {
                warn!(%output, level, error = %err, "could not restore output level");
            }
        }
    }

    pub fn report_tick(&mut self, now: DateTime<Utc>) {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.tick(now);
        }
    }

    /// Manual switch, bypassing thresholds.
    pub fn enable_output(&mut self, output: OutputId, enable: bool) -> Result<(), DriveError> {
        let mut driver = BridgeDriver {
            device: &mut self.device,
            pins: &mut self.pins,
        };
        self.controller.enable(output, enable, &mut driver)
    }

    pub fn run_task(&mut self, task: Task) {
        match task {
            Task::Poll => {
                self.poll_cycle();
            }
            Task::Report => self.report_tick(Utc::now()),
            Task::Watchdog => crate::service::notify_watchdog(),
        }
    }

    pub fn device(&self) -> &DeviceClient<S> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut DeviceClient<S> {
        &mut self.device
    }

    pub fn controller(&self) -> &OutputController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut OutputController {
        &mut self.controller
    }

    pub fn reporter(&self) -> Option<&Reporter<R>> {
        self.reporter.as_ref()
    }

    pub fn reporter_mut(&mut self) -> Option<&mut Reporter<R>> {
        self.reporter.as_mut()
    }
}
