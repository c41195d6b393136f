use std::rc::Rc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use bridge_app::service::{notify_ready, parse_config_arg, watchdog_interval};
use bridge_app::{open_pins, open_source, output_controller, reporter, schedule, Bridge, BridgeConfig, OutputStateStore};
use device_client::DeviceClient;
use scheduler::RuntimeClock;
use types::Data;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = BridgeConfig::load_or_default(parse_config_arg());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build runtime failed")?;
    let runtime = Rc::new(runtime);

    let source = open_source(&config, Rc::clone(&runtime)).context("open data source failed")?;
    let mut device = DeviceClient::new(source);
    device
        .status()
        .observe(|status: &String| info!(%status, "controller status"));
    device.listener().observe(|data: &Data| {
        debug!(
            soc = data.battery_charge,
            battery_voltage = data.battery_voltage,
            panel_power = data.panel_power,
            load_power = data.load_power,
            faults = data.error_state.bits(),
            "snapshot"
        )
    });

    let controller = output_controller(&config, OutputStateStore::new(&config.state_path));
    let mut uplink = reporter(&config);
    if let Some(uplink) = uplink.as_mut() {
        uplink
            .status_mut()
            .observe(|status: &String| info!(%status, "report status"));
    }
    let mut bridge = Bridge::new(device, controller, open_pins(&config.gpio), uplink);
    bridge.apply_restored_state();

    let watchdog = watchdog_interval();
    let mut scheduler = schedule(&config, watchdog);
    notify_ready();
    info!(
        poll_interval_ms = config.poll_interval.as_millis(),
        tasks = scheduler.len(),
        watchdog_ms = watchdog.map(|interval| interval.as_millis()),
        "rngbridge running"
    );

    let mut clock = RuntimeClock::new(runtime);
    scheduler.run(&mut clock, |task| bridge.run_task(*task));
    Ok(())
}
