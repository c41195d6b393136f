use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use tracing::{info, warn};

use device_client::{DataSource, ModbusSource, SimulatedSource};
use modbus_client::ModbusTransport;
use output_control::{LogPin, OutputController, OutputPin, SysfsPin};
use scheduler::Scheduler;
use telemetry::Reporter;
use types::{OutputId, OutputStatus};

pub mod bridge;
pub mod config;
pub mod service;
pub mod sink;
pub mod state;

pub use bridge::{Bridge, Pins, Task};
pub use config::BridgeConfig;
pub use sink::LogSink;
pub use state::OutputStateStore;

const REPORT_TICK: Duration = Duration::from_secs(1);

/// Simulator when configured, otherwise the Modbus link to the controller.
pub fn open_source(config: &BridgeConfig, runtime: Rc<Runtime>) -> Result<Box<dyn DataSource>> {
    if let Some(mode) = config.device.simulation {
        info!(?mode, seed = config.device.seed, "using simulated controller");
        return Ok(Box::new(SimulatedSource::new(mode, config.device.seed)));
    }

    let transport = ModbusTransport::connect(config.modbus.clone(), runtime)
        .with_context(|| format!("connect to controller over {:?}", config.modbus.link))?;
    let source = ModbusSource::new(transport, config.device.profile).with_word_order(config.word_order());
    info!(
        profile = config.device.profile.as_str(),
        word_order = ?source.word_order(),
        "modbus source ready"
    );
    Ok(Box::new(source))
}

pub fn open_pins(gpio: &config::GpioConfig) -> Pins {
    [
        open_pin(gpio, OutputId::Out1),
        open_pin(gpio, OutputId::Out2),
        open_pin(gpio, OutputId::Out3),
    ]
}

fn open_pin(gpio: &config::GpioConfig, output: OutputId) -> Box<dyn OutputPin> {
    let Some(line) = gpio.line(output) else {
        return Box::new(LogPin::new(output.as_str()));
    };
    match SysfsPin::open(&gpio.root, line) {
        Ok(pin) => Box::new(pin),
        Err(err) => {
            warn!(%output, line, error = %err, "could not open gpio line, logging level changes instead");
            Box::new(LogPin::new(output.as_str()))
        }
    }
}

/// Build the controller from config, restore persisted output state and save every change.
pub fn output_controller(config: &BridgeConfig, mut store: OutputStateStore) -> OutputController {
    let mut outputs = config.outputs;
    match store.load() {
        Ok(Some(status)) => {
            info!(path = %store.path().display(), "output state restored");
            outputs.restore(&status);
        }
        Ok(None) => {}
        Err(err) => warn!("could not restore output state: {err:#}"),
    }

    let mut controller = OutputController::new(outputs);
    controller.status().observe(move |status: &OutputStatus| {
        if let Err(err) = store.save(status) {
            warn!("could not save output state: {err:#}");
        }
    });
    controller
}

pub fn reporter(config: &BridgeConfig) -> Option<Reporter<LogSink>> {
    if !config.pvoutput.enabled {
        return None;
    }
    Some(Reporter::new(
        LogSink::new(config.pvoutput.status_interval_min),
        config.pvoutput.window,
        config.pvoutput.time_offset_hours,
    ))
}

pub fn schedule(config: &BridgeConfig, watchdog: Option<Duration>) -> Scheduler<Task> {
    let mut scheduler = Scheduler::new();
    scheduler.every(Task::Poll, config.poll_interval);
    if config.pvoutput.enabled {
        scheduler.every(Task::Report, REPORT_TICK);
    }
    if let Some(interval) = watchdog {
        scheduler.every(Task::Watchdog, interval);
    }
    scheduler
}
