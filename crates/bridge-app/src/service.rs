use std::env;
use std::time::Duration;

#[cfg(target_os = "linux")]
use tracing::warn;

#[cfg(target_os = "linux")]
pub fn notify_ready() {
    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %err, "systemd ready notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
pub fn notify_ready() {}

#[cfg(target_os = "linux")]
pub fn notify_watchdog() {
    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
        warn!(error = %err, "systemd watchdog notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
pub fn notify_watchdog() {}

/// Half the systemd watchdog timeout, or `None` when the watchdog is off or meant for another process.
pub fn watchdog_interval() -> Option<Duration> {
    let watchdog_usec = env::var("WATCHDOG_USEC").ok()?.parse::<u64>().ok()?;
    if let Some(pid) = env::var("WATCHDOG_PID")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        if pid != std::process::id() {
            return None;
        }
    }

    let interval = watchdog_usec.saturating_div(2).max(100_000);
    Some(Duration::from_micros(interval))
}

pub fn parse_config_arg() -> Option<String> {
    parse_config_from(env::args().skip(1))
}

fn parse_config_from(args: impl IntoIterator<Item = String>) -> Option<String> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}
