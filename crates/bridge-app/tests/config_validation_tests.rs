use std::env;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use bridge_app::BridgeConfig;
use device_client::{Profile, SimulationMode};
use modbus_client::Link;
use output_control::InputType;
use register_decoder::WordOrder;

static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn toml_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("RNGBRIDGE_CONFIG", fixture_path("config-valid.toml"));

    let config = BridgeConfig::load().expect("load config");
    config.validate().expect("validate config");

    assert_eq!(
        config.modbus.link,
        Link::Rtu {
            path: "/dev/ttyAMA0".to_string(),
            baud_rate: 9_600
        }
    );
    assert_eq!(config.modbus.timeout_ms, 800);
    assert_eq!(config.device.profile, Profile::Rover);
    assert_eq!(config.device.simulation, None);
    assert_eq!(config.poll_interval, Duration::from_millis(2_000));
    assert_eq!(config.outputs.load.input_type, InputType::BatteryVoltage);
    assert!(config.outputs.out1.inverted);
    assert_eq!(config.gpio.out1, Some(17));
    assert_eq!(config.gpio.out2, Some(27));
    assert_eq!(config.gpio.out3, None);
    assert!(config.pvoutput.enabled);
    assert_eq!(config.pvoutput.status_interval_min, 5);
    assert_eq!(config.pvoutput.time_offset_hours, 2);
    assert_eq!(config.pvoutput.window, 12);
    assert_eq!(config.state_path, "/var/lib/rngbridge/outputs.json");

    env::remove_var("RNGBRIDGE_CONFIG");
}

#[test]
fn json_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("RNGBRIDGE_CONFIG", fixture_path("config-valid.json"));

    let config = BridgeConfig::load().expect("load config");
    config.validate().expect("validate config");

    assert_eq!(
        config.modbus.link,
        Link::Tcp {
            host: "192.168.1.40".to_string(),
            port: 8899
        }
    );
    assert_eq!(config.modbus.unit_id, 16);
    assert_eq!(config.modbus.max_batch_size, Some(32));
    assert_eq!(config.device.profile, Profile::Tracer);
    assert_eq!(config.word_order(), WordOrder::HighFirst);
    assert!(!config.pvoutput.enabled);

    // an inverted band is kept as written
    let out3 = config.outputs.out3;
    assert_eq!(out3.input_type, InputType::PanelVoltage);
    assert_eq!((out3.min, out3.max), (30.0, 18.0));
    assert!(out3.last_state);

    env::remove_var("RNGBRIDGE_CONFIG");
}

#[test]
fn invalid_config_fails_validation() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("RNGBRIDGE_CONFIG", fixture_path("config-invalid.toml"));

    let config = BridgeConfig::load().expect("load config");
    assert!(config.validate().is_err());

    let fallback = BridgeConfig::load_or_default(None);
    assert_eq!(fallback.poll_interval, Duration::from_millis(2_000));
    assert_eq!(fallback.modbus.link, BridgeConfig::default().modbus.link);

    env::remove_var("RNGBRIDGE_CONFIG");
}

#[test]
fn malformed_config_falls_back_to_defaults() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    let path = fixture_path("config-malformed.toml");

    assert!(BridgeConfig::load_with_path(Some(path.clone())).is_err());
    let config = BridgeConfig::load_or_default(Some(path));
    assert_eq!(config.device.profile, Profile::Rover);
    assert_eq!(config.state_path, BridgeConfig::default().state_path);
}

#[test]
fn missing_config_falls_back_to_defaults() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    let config = BridgeConfig::load_or_default(Some(fixture_path("does-not-exist.toml")));
    config.validate().expect("defaults validate");
}

#[test]
fn load_output_cannot_take_a_gpio_line() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    let result = BridgeConfig::load_with_path(Some(fixture_path("config-load-gpio.toml")));
    assert!(result.is_err());
}

#[test]
fn env_overrides_file_values() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("RNGBRIDGE_CONFIG", fixture_path("config-valid.toml"));
    env::set_var("RNGBRIDGE_POLL_INTERVAL_MS", "500");
    env::set_var("RNGBRIDGE_SIMULATION", "constant");
    env::set_var("RNGBRIDGE_HOST", "10.1.1.9");

    let config = BridgeConfig::load().expect("load config");

    assert_eq!(config.poll_interval, Duration::from_millis(500));
    assert_eq!(config.device.simulation, Some(SimulationMode::Constant));
    assert_eq!(
        config.modbus.link,
        Link::Tcp {
            host: "10.1.1.9".to_string(),
            port: 502
        }
    );

    env::remove_var("RNGBRIDGE_CONFIG");
    env::remove_var("RNGBRIDGE_POLL_INTERVAL_MS");
    env::remove_var("RNGBRIDGE_SIMULATION");
    env::remove_var("RNGBRIDGE_HOST");
}

#[test]
fn unknown_profile_in_env_is_an_error() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("RNGBRIDGE_PROFILE", "wanderer");

    let result = BridgeConfig::load_with_path(None);

    env::remove_var("RNGBRIDGE_PROFILE");
    assert!(result.is_err());
}

#[test]
fn duplicate_gpio_lines_fail_validation() {
    let mut config = BridgeConfig::default();
    config.gpio.out1 = Some(4);
    config.gpio.out3 = Some(4);
    assert!(config.validate().is_err());

    config.gpio.out3 = Some(5);
    config.validate().expect("distinct lines");
}

fn fixture_path(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path.to_string_lossy().to_string()
}
