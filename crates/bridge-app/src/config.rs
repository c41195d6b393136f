use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use device_client::{Profile, SimulationMode};
use modbus_client::{ClientConfig, Link};
use output_control::{InputType, OutputConfig, OutputSet, SysfsPin};
use register_decoder::WordOrder;
use types::OutputId;

const DEFAULT_SERIAL_PATH: &str = "/dev/ttyUSB0";
const DEFAULT_BAUD_RATE: u32 = 9_600;
const DEFAULT_TCP_PORT: u16 = 502;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_STATUS_INTERVAL_MIN: u32 = 15;
const DEFAULT_REPORT_WINDOW: u32 = 10;
const DEFAULT_STATE_PATH: &str = "rngbridge-state.json";

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceConfig {
    pub profile: Profile,
    /// Overrides the profile's own word order when set.
    pub word_order: Option<WordOrder>,
    /// `None` talks to real hardware.
    pub simulation: Option<SimulationMode>,
    pub seed: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            word_order: None,
            simulation: None,
            seed: 0,
        }
    }
}

/// GPIO line numbers behind out1..out3. Unset lines are logged instead of driven.
#[derive(Clone, Debug, PartialEq)]
pub struct GpioConfig {
    pub root: String,
    pub out1: Option<u32>,
    pub out2: Option<u32>,
    pub out3: Option<u32>,
}

impl GpioConfig {
    pub fn line(&self, output: OutputId) -> Option<u32> {
        match output {
            OutputId::Load => None,
            OutputId::Out1 => self.out1,
            OutputId::Out2 => self.out2,
            OutputId::Out3 => self.out3,
        }
    }
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            root: SysfsPin::DEFAULT_ROOT.to_string(),
            out1: None,
            out2: None,
            out3: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PvOutputConfig {
    pub enabled: bool,
    /// Used while the service does not hand out its own interval.
    pub status_interval_min: u32,
    pub time_offset_hours: i32,
    pub window: u32,
}

impl Default for PvOutputConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            status_interval_min: DEFAULT_STATUS_INTERVAL_MIN,
            time_offset_hours: 0,
            window: DEFAULT_REPORT_WINDOW,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub modbus: ClientConfig,
    pub device: DeviceConfig,
    pub poll_interval: Duration,
    pub outputs: OutputSet,
    pub gpio: GpioConfig,
    pub pvoutput: PvOutputConfig,
    pub state_path: String,
}

impl BridgeConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config)?;
        }

        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Load and validate, falling back to the built-in defaults when either fails.
    pub fn load_or_default(config_path: Option<String>) -> Self {
        let config = match Self::load_with_path(config_path) {
            Ok(config) => config,
            Err(err) => {
                warn!("could not load config, using defaults: {err:#}");
                return Self::default();
            }
        };
        match config.validate() {
            Ok(()) => config,
            Err(err) => {
                warn!("invalid config, using defaults: {err}");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.modbus.link {
            Link::Rtu { path, baud_rate } => {
                if path.trim().is_empty() {
                    anyhow::bail!("modbus.path must be non-empty");
                }
                if *baud_rate == 0 {
                    anyhow::bail!("modbus.baud_rate must be >= 1");
                }
            }
            Link::Tcp { host, port } => {
                if host.trim().is_empty() {
                    anyhow::bail!("modbus.host must be non-empty for tcp");
                }
                if *port == 0 {
                    anyhow::bail!("modbus.port must be between 1 and 65535");
                }
            }
        }
        if self.modbus.unit_id == 0 || self.modbus.unit_id > 247 {
            anyhow::bail!("modbus.unit_id must be between 1 and 247");
        }
        if self.modbus.timeout_ms == 0 {
            anyhow::bail!("modbus.timeout_ms must be >= 1");
        }
        if let Some(max_batch) = self.modbus.max_batch_size {
            if max_batch == 0 {
                anyhow::bail!("modbus.max_batch_size must be >= 1");
            }
        }
        if let Some(delay) = self.modbus.inter_read_delay_ms {
            if delay == 0 {
                anyhow::bail!("modbus.inter_read_delay_ms must be >= 1 when set");
            }
        }
        if self.poll_interval.as_millis() == 0 {
            anyhow::bail!("poller.interval_ms must be >= 1");
        }
        for output in OutputId::ALL {
            let config = self.outputs.get(output);
            if !config.min.is_finite() || !config.max.is_finite() {
                anyhow::bail!("outputs.{output} thresholds must be finite numbers");
            }
        }
        validate_gpio(&self.gpio)?;
        if self.pvoutput.status_interval_min == 0 {
            anyhow::bail!("pvoutput.status_interval_min must be >= 1");
        }
        if self.pvoutput.window == 0 {
            anyhow::bail!("pvoutput.window must be >= 1");
        }
        if !(-12..=14).contains(&self.pvoutput.time_offset_hours) {
            anyhow::bail!("pvoutput.time_offset_hours must be between -12 and 14");
        }
        if self.state_path.trim().is_empty() {
            anyhow::bail!("state_path must be non-empty");
        }

        Ok(())
    }

    pub fn word_order(&self) -> WordOrder {
        self.device
            .word_order
            .unwrap_or_else(|| self.device.profile.default_word_order())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            modbus: ClientConfig::default(),
            device: DeviceConfig::default(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            outputs: OutputSet::default(),
            gpio: GpioConfig::default(),
            pvoutput: PvOutputConfig::default(),
            state_path: DEFAULT_STATE_PATH.to_string(),
        }
    }
}

fn apply_env_overrides(config: &mut BridgeConfig) -> Result<()> {
    if let Ok(host) = env::var("RNGBRIDGE_HOST") {
        let port = parse_env_u16("RNGBRIDGE_PORT").unwrap_or(DEFAULT_TCP_PORT);
        config.modbus.link = Link::Tcp { host, port };
    } else if let Ok(path) = env::var("RNGBRIDGE_SERIAL_PATH") {
        let baud_rate = match &config.modbus.link {
            Link::Rtu { baud_rate, .. } => *baud_rate,
            Link::Tcp { .. } => DEFAULT_BAUD_RATE,
        };
        config.modbus.link = Link::Rtu { path, baud_rate };
    }

    if let Some(rate) = parse_env_u32("RNGBRIDGE_BAUD_RATE") {
        if let Link::Rtu { baud_rate, .. } = &mut config.modbus.link {
            *baud_rate = rate;
        }
    }

    if let Some(unit_id) = parse_env_u8("RNGBRIDGE_UNIT_ID") {
        config.modbus.unit_id = unit_id;
    }

    if let Some(timeout_ms) = parse_env_u64("RNGBRIDGE_TIMEOUT_MS") {
        config.modbus.timeout_ms = timeout_ms;
    }

    if let Some(max_batch) = parse_env_u16("RNGBRIDGE_MAX_BATCH_SIZE") {
        config.modbus.max_batch_size = Some(max_batch);
    }

    if let Ok(value) = env::var("RNGBRIDGE_PROFILE") {
        config.device.profile = parse_profile(&value)?;
    }

    if let Ok(value) = env::var("RNGBRIDGE_WORD_ORDER") {
        config.device.word_order = Some(parse_word_order(&value)?);
    }

    if let Ok(value) = env::var("RNGBRIDGE_SIMULATION") {
        config.device.simulation = parse_simulation(&value)?;
    }

    if let Some(interval_ms) = parse_env_u64("RNGBRIDGE_POLL_INTERVAL_MS") {
        config.poll_interval = Duration::from_millis(interval_ms);
    }

    config.pvoutput.enabled =
        parse_env_bool("RNGBRIDGE_PVOUTPUT_ENABLED").unwrap_or(config.pvoutput.enabled);

    if let Ok(path) = env::var("RNGBRIDGE_STATE_PATH") {
        config.state_path = path;
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    modbus: Option<FileModbusConfig>,
    device: Option<FileDeviceConfig>,
    poller: Option<FilePollerConfig>,
    outputs: Option<FileOutputsConfig>,
    pvoutput: Option<FilePvOutputConfig>,
    state_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileModbusConfig {
    transport: Option<String>,
    path: Option<String>,
    baud_rate: Option<u32>,
    host: Option<String>,
    port: Option<u16>,
    unit_id: Option<u8>,
    timeout_ms: Option<u64>,
    max_batch_size: Option<u16>,
    inter_read_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileDeviceConfig {
    profile: Option<String>,
    word_order: Option<String>,
    simulation: Option<String>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FilePollerConfig {
    interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileOutputsConfig {
    gpio_root: Option<String>,
    load: Option<FileOutputConfig>,
    out1: Option<FileOutputConfig>,
    out2: Option<FileOutputConfig>,
    out3: Option<FileOutputConfig>,
}

#[derive(Debug, Deserialize)]
struct FileOutputConfig {
    input_type: Option<String>,
    inverted: Option<bool>,
    min: Option<f32>,
    max: Option<f32>,
    last_state: Option<bool>,
    gpio: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FilePvOutputConfig {
    enabled: Option<bool>,
    status_interval_min: Option<u32>,
    time_offset_hours: Option<i32>,
    window: Option<u32>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("RNGBRIDGE_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut BridgeConfig, file: FileConfig) -> Result<()> {
    if let Some(modbus) = file.modbus {
        apply_link(config, &modbus)?;
        if let Some(unit_id) = modbus.unit_id {
            config.modbus.unit_id = unit_id;
        }
        if let Some(timeout_ms) = modbus.timeout_ms {
            config.modbus.timeout_ms = timeout_ms;
        }
        if let Some(max_batch) = modbus.max_batch_size {
            config.modbus.max_batch_size = Some(max_batch);
        }
        if let Some(delay) = modbus.inter_read_delay_ms {
            config.modbus.inter_read_delay_ms = Some(delay);
        }
    }

    if let Some(device) = file.device {
        if let Some(profile) = device.profile {
            config.device.profile = parse_profile(&profile)?;
        }
        if let Some(order) = device.word_order {
            config.device.word_order = Some(parse_word_order(&order)?);
        }
        if let Some(simulation) = device.simulation {
            config.device.simulation = parse_simulation(&simulation)?;
        }
        if let Some(seed) = device.seed {
            config.device.seed = seed;
        }
    }

    if let Some(poller) = file.poller {
        if let Some(interval_ms) = poller.interval_ms {
            config.poll_interval = Duration::from_millis(interval_ms);
        }
    }

    if let Some(outputs) = file.outputs {
        if let Some(root) = outputs.gpio_root {
            config.gpio.root = root;
        }
        let entries = [
            (OutputId::Load, outputs.load),
            (OutputId::Out1, outputs.out1),
            (OutputId::Out2, outputs.out2),
            (OutputId::Out3, outputs.out3),
        ];
        for (output, entry) in entries {
            if let Some(entry) = entry {
                apply_output(config, output, entry)?;
            }
        }
    }

    if let Some(pvoutput) = file.pvoutput {
        if let Some(enabled) = pvoutput.enabled {
            config.pvoutput.enabled = enabled;
        }
        if let Some(interval) = pvoutput.status_interval_min {
            config.pvoutput.status_interval_min = interval;
        }
        if let Some(offset) = pvoutput.time_offset_hours {
            config.pvoutput.time_offset_hours = offset;
        }
        if let Some(window) = pvoutput.window {
            config.pvoutput.window = window;
        }
    }

    if let Some(path) = file.state_path {
        config.state_path = path;
    }

    Ok(())
}

fn apply_link(config: &mut BridgeConfig, modbus: &FileModbusConfig) -> Result<()> {
    let (mut path, mut baud_rate) = (DEFAULT_SERIAL_PATH.to_string(), DEFAULT_BAUD_RATE);
    let (mut host, mut port) = (String::new(), DEFAULT_TCP_PORT);
    let mut tcp = match &config.modbus.link {
        Link::Rtu {
            path: current,
            baud_rate: rate,
        } => {
            path = current.clone();
            baud_rate = *rate;
            false
        }
        Link::Tcp {
            host: current,
            port: current_port,
        } => {
            host = current.clone();
            port = *current_port;
            true
        }
    };

    tcp = match modbus.transport.as_deref() {
        Some("tcp") => true,
        Some("rtu") => false,
        Some(other) => anyhow::bail!("modbus.transport must be rtu or tcp, got {other}"),
        None => tcp || modbus.host.is_some(),
    };
    if let Some(value) = &modbus.path {
        path = value.clone();
    }
    if let Some(value) = modbus.baud_rate {
        baud_rate = value;
    }
    if let Some(value) = &modbus.host {
        host = value.clone();
    }
    if let Some(value) = modbus.port {
        port = value;
    }

    config.modbus.link = if tcp {
        Link::Tcp { host, port }
    } else {
        Link::Rtu { path, baud_rate }
    };
    Ok(())
}

fn apply_output(config: &mut BridgeConfig, output: OutputId, entry: FileOutputConfig) -> Result<()> {
    let slot: &mut OutputConfig = config.outputs.get_mut(output);
    if let Some(input_type) = entry.input_type {
        slot.input_type = InputType::parse(&input_type);
    }
    if let Some(inverted) = entry.inverted {
        slot.inverted = inverted;
    }
    if let Some(min) = entry.min {
        slot.min = min;
    }
    if let Some(max) = entry.max {
        slot.max = max;
    }
    if let Some(last_state) = entry.last_state {
        slot.last_state = last_state;
    }

    if let Some(line) = entry.gpio {
        match output {
            OutputId::Load => {
                anyhow::bail!("outputs.load.gpio is not supported, load is switched by the controller")
            }
            OutputId::Out1 => config.gpio.out1 = Some(line),
            OutputId::Out2 => config.gpio.out2 = Some(line),
            OutputId::Out3 => config.gpio.out3 = Some(line),
        }
    }
    Ok(())
}

fn validate_gpio(gpio: &GpioConfig) -> Result<()> {
    let lines: Vec<u32> = [gpio.out1, gpio.out2, gpio.out3].into_iter().flatten().collect();
    for (index, line) in lines.iter().enumerate() {
        if lines[index + 1..].contains(line) {
            anyhow::bail!("gpio line {line} is assigned to more than one output");
        }
    }
    if !lines.is_empty() && gpio.root.trim().is_empty() {
        anyhow::bail!("outputs.gpio_root must be non-empty when gpio lines are set");
    }
    Ok(())
}

pub fn parse_profile(value: &str) -> Result<Profile> {
    match value.trim().to_ascii_lowercase().as_str() {
        "rover" => Ok(Profile::Rover),
        "tracer" => Ok(Profile::Tracer),
        "battery" => Ok(Profile::Battery),
        other => anyhow::bail!("unknown device profile {other}"),
    }
}

pub fn parse_word_order(value: &str) -> Result<WordOrder> {
    match value.trim().to_ascii_lowercase().as_str() {
        "high_first" => Ok(WordOrder::HighFirst),
        "low_first" => Ok(WordOrder::LowFirst),
        other => anyhow::bail!("unknown word order {other}"),
    }
}

/// `off` selects real hardware.
pub fn parse_simulation(value: &str) -> Result<Option<SimulationMode>> {
    match value.trim().to_ascii_lowercase().as_str() {
        "off" | "" => Ok(None),
        "simulated" => Ok(Some(SimulationMode::Simulated)),
        "constant" => Ok(Some(SimulationMode::Constant)),
        other => anyhow::bail!("unknown simulation mode {other}"),
    }
}

fn parse_env_u8(key: &str) -> Option<u8> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u16(key: &str) -> Option<u16> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}
