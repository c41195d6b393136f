use std::cell::RefCell;
use std::rc::Rc;

use device_client::{DeviceClient, ModbusSource, PollError, Profile};
use modbus_client::mock::MockTransport;
use modbus_client::{RegisterKind, TransportError, WriteTarget};
use register_decoder::{DecodeError, WordOrder};
use tracing_test::traced_test;
use types::{ChargingState, Data, Fault};

fn rover_registers() -> Vec<u16> {
    let mut words = vec![0u16; 35];
    words[0] = 85;
    words[1] = 128;
    words[2] = 520;
    words[3] = 0x1985;
    words[4] = 128;
    words[5] = 150;
    words[6] = 19;
    words[7] = 186;
    words[8] = 310;
    words[9] = 57;
    words[19] = 340;
    words[20] = 120;
    words[32] = 0x8002;
    words[33] = 0x0002;
    words[34] = 0x0000;
    words
}

fn rover_info_registers() -> Vec<u16> {
    let mut words = vec![0u16; 19];
    let model = b"  ML2420N\0\0\0\0\0\0\0";
    for (index, pair) in model.chunks(2).enumerate() {
        words[index] = (u16::from(pair[0]) << 8) | u16::from(pair[1]);
    }
    words[9] = 0x0104;
    words[11] = 0x0200;
    words[12] = 0x0001;
    words[13] = 0xE240;
    words[14] = 0x0001;
    words
}

fn rover_client() -> (DeviceClient<ModbusSource<MockTransport>>, MockTransport) {
    let transport = MockTransport::new();
    transport.set_registers(RegisterKind::Holding, 0x0100, &rover_registers());
    let handle = transport.clone();
    (DeviceClient::new(ModbusSource::new(transport, Profile::Rover)), handle)
}

fn record_data(client: &mut DeviceClient<ModbusSource<MockTransport>>) -> Rc<RefCell<Vec<Data>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    client
        .listener()
        .observe(move |data: &Data| sink.borrow_mut().push(data.clone()));
    seen
}

#[test]
fn rover_poll_decodes_full_snapshot() {
    let (mut client, _) = rover_client();
    let seen = record_data(&mut client);

    let data = client.poll().expect("poll").clone();

    assert_eq!(data.battery_charge, 85);
    assert!((data.battery_voltage - 12.8).abs() < 1e-4);
    assert!((data.battery_current - 5.2).abs() < 1e-4);
    assert_eq!(data.controller_temperature, 25);
    assert_eq!(data.battery_temperature, -5);
    assert!((data.panel_voltage - 18.6).abs() < 1e-4);
    assert_eq!(data.panel_power, 57.0);
    assert_eq!(data.load_power, 19.0);
    assert_eq!(data.generation, Some(340));
    assert_eq!(data.consumption, Some(120));
    assert_eq!(data.charging_state, ChargingState::Mppt);
    assert!(data.load_enabled);
    assert!(data.error_state.contains(Fault::BatteryOverVoltage));
    assert_eq!(data.error_state.active().count(), 1);

    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0], data);
    assert!(client.has_data());
}

#[test]
fn failed_polls_never_touch_the_snapshot() {
    let (mut client, transport) = rover_client();
    let seen = record_data(&mut client);
    let statuses = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&statuses);
    client
        .status()
        .observe(move |status: &String| sink.borrow_mut().push(status.clone()));

    let baseline = client.poll().expect("first poll").clone();

    for _ in 0..3 {
        transport.leave_garbage(vec![0xFFFF; 35]);
        transport.fail_next(TransportError::ResponseTimedOut);
        let err = client.poll().expect_err("timeout");
        assert_eq!(err.mnemonic(), "ResponseTimedOut");
    }

    assert_eq!(client.data(), &baseline);
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0], baseline);

    let stats = client.stats();
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.failures, 3);
    assert_eq!(stats.consecutive_failures, 3);
    assert_eq!(
        *statuses.borrow(),
        vec!["Connected".to_string(), "ResponseTimedOut".to_string()]
    );

    client.poll().expect("recovered");
    assert_eq!(client.stats().consecutive_failures, 0);
    assert_eq!(statuses.borrow().last().map(String::as_str), Some("Connected"));
}

#[test]
#[traced_test]
fn transport_failures_are_logged_with_mnemonic() {
    let (mut client, transport) = rover_client();
    transport.fail_next(TransportError::ResponseTimedOut);

    let err = client.poll().expect_err("timeout");
    assert!(matches!(err, PollError::Read { address: 0x0100, .. }));
    assert!(logs_contain("could not read registers 0x0100: ResponseTimedOut (0xE2)"));
}

#[test]
fn partial_register_map_is_rejected_without_commit() {
    let transport = MockTransport::new();
    transport.set_registers(RegisterKind::Holding, 0x0100, &rover_registers()[..20]);
    let mut client = DeviceClient::new(ModbusSource::new(transport, Profile::Rover));

    let err = client.poll().expect_err("short");
    assert_eq!(err.mnemonic(), "IllegalDataAddress");
    assert!(!client.has_data());
    assert_eq!(client.data(), &Data::default());
}

#[test]
fn truncated_buffer_is_a_decode_error() {
    let mut data = Data::default();
    let err = Profile::Rover
        .apply(0, &rover_registers()[..33], WordOrder::HighFirst, &mut data)
        .expect_err("fault word missing");
    assert_eq!(
        err,
        DecodeError::OutOfRange {
            offset: 33,
            words: 2,
            len: 33
        }
    );
}

#[test]
fn identification_retries_until_it_succeeds() {
    let (mut client, transport) = rover_client();

    client.poll().expect("poll");
    assert!(client.info().is_none());

    transport.set_registers(RegisterKind::Holding, 0x000C, &rover_info_registers());
    client.poll().expect("poll");

    let info = client.info().expect("identified");
    assert_eq!(info.model, "ML2420N");
    assert_eq!(info.software_version, 0x0000_0104);
    assert_eq!(info.hardware_version, 0x0000_0200);
    assert_eq!(info.serial, 123_456);
    assert_eq!(info.address, 1);

    client.poll().expect("poll");
    let info_reads = transport
        .reads()
        .iter()
        .filter(|(_, start, _)| *start == 0x000C)
        .count();
    assert_eq!(info_reads, 2);
}

#[test]
#[traced_test]
fn enable_load_writes_once_and_reports_failure() {
    let (mut client, transport) = rover_client();

    transport.fail_next(TransportError::IllegalDataValue);
    let err = client.enable_load(true).expect_err("rejected");
    assert_eq!(err.mnemonic(), "IllegalDataValue");
    assert!(transport.writes().is_empty());
    assert!(logs_contain("could not turn load on"));

    client.enable_load(false).expect("write");
    assert_eq!(transport.writes(), vec![(WriteTarget::Register, 0x010A, 0)]);
}

#[test]
fn word_order_override_changes_fault_decoding() {
    let transport = MockTransport::new();
    transport.set_registers(RegisterKind::Holding, 0x0100, &rover_registers());
    let source = ModbusSource::new(transport, Profile::Rover).with_word_order(WordOrder::LowFirst);
    let mut client = DeviceClient::new(source);

    let data = client.poll().expect("poll");
    assert_eq!(data.error_state.bits(), 0x0000_0002);
}

fn tracer_transport() -> MockTransport {
    let transport = MockTransport::new();
    let mut realtime = vec![0u16; 18];
    realtime[0] = 1862;
    realtime[1] = 310;
    realtime[2] = 5772;
    realtime[4] = 1325;
    realtime[5] = 412;
    realtime[12] = 1320;
    realtime[13] = 150;
    realtime[14] = 1980;
    realtime[16] = 2160;
    realtime[17] = 3049;
    transport.set_registers(RegisterKind::Input, 0x3100, &realtime);
    transport.set_registers(RegisterKind::Input, 0x311A, &[76]);
    transport.set_registers(RegisterKind::Input, 0x3200, &[0x0000, 0x0009 | (1 << 8), 0]);
    let mut energy = vec![0u16; 10];
    energy[0] = 35;
    energy[8] = 0x86A0;
    energy[9] = 0x0001;
    transport.set_registers(RegisterKind::Input, 0x3304, &energy);
    transport.set_registers(RegisterKind::Coils, 0x0002, &[1]);
    transport
}

#[test]
fn tracer_poll_combines_all_reads() {
    let transport = tracer_transport();
    let mut client = DeviceClient::new(ModbusSource::new(transport, Profile::Tracer));

    let data = client.poll().expect("poll");
    assert!((data.panel_voltage - 18.62).abs() < 1e-4);
    assert!((data.panel_power - 57.72).abs() < 1e-3);
    assert!((data.battery_voltage - 13.25).abs() < 1e-4);
    assert!((data.load_power - 19.8).abs() < 1e-3);
    assert_eq!(data.battery_temperature, 22);
    assert_eq!(data.controller_temperature, 30);
    assert_eq!(data.battery_charge, 76);
    assert_eq!(data.charging_state, ChargingState::Boost);
    assert!(data.error_state.contains(Fault::LoadShortCircuit));
    assert_eq!(data.consumption, Some(350));
    assert_eq!(data.generation, Some(1_000_000));
    assert!(data.load_enabled);
}

#[test]
fn tracer_failure_mid_cycle_commits_nothing() {
    let transport = MockTransport::new();
    let complete = tracer_transport();
    for (kind, start, count) in [
        (RegisterKind::Input, 0x3100u16, 18u16),
        (RegisterKind::Input, 0x311A, 1),
        (RegisterKind::Input, 0x3200, 3),
    ] {
        let values: Vec<u16> = (0..count)
            .map(|offset| complete.register(kind, start + offset).unwrap_or(0))
            .collect();
        transport.set_registers(kind, start, &values);
    }
    let handle = transport.clone();
    let mut client = DeviceClient::new(ModbusSource::new(transport, Profile::Tracer));

    let err = client.poll().expect_err("energy block missing");
    assert!(matches!(err, PollError::Read { address: 0x3304, .. }));
    assert_eq!(client.data(), &Data::default());
    assert_eq!(handle.reads().len(), 4);
}

#[test]
fn tracer_load_uses_coil() {
    let transport = tracer_transport();
    let handle = transport.clone();
    let mut client = DeviceClient::new(ModbusSource::new(transport, Profile::Tracer));

    client.enable_load(true).expect("write");
    assert_eq!(handle.writes(), vec![(WriteTarget::Coil, 0x0002, 1)]);
}

#[test]
fn battery_profile_decodes_bms_block() {
    let mut words = vec![0u16; 53];
    words[0] = 4;
    words[1..5].copy_from_slice(&[33, 33, 34, 33]);
    words[17] = 2;
    words[18] = 215;
    words[19] = (-15i16) as u16;
    words[34] = 240;
    words[35] = 1;
    words[36] = 180;
    words[38] = 0;
    words[41] = (-250i16) as u16;
    words[42] = 133;
    words[43] = 0x0000;
    words[44] = 0xC350;
    words[45] = 0x0001;
    words[46] = 0x86A0;
    words[47] = 12;
    words[48] = 144;
    words[50] = 5000;
    let transport = MockTransport::new();
    transport.set_registers(RegisterKind::Holding, 5000, &words);
    let mut client = DeviceClient::new(ModbusSource::new(transport, Profile::Battery));

    let data = client.poll().expect("poll").clone();
    let detail = data.battery.as_ref().expect("bms detail");
    assert_eq!(detail.cell_count(), 4);
    assert!((detail.cell_voltage[2] - 3.4).abs() < 1e-4);
    assert_eq!(detail.cell_temperature.len(), 2);
    assert!((detail.cell_temperature[1] + 1.5).abs() < 1e-4);
    assert_eq!(detail.ambient_temperature.len(), 1);
    assert!(detail.heater_temperature.is_empty());
    assert!((detail.remaining - 50.0).abs() < 1e-3);
    assert!((detail.total - 100.0).abs() < 1e-3);
    assert_eq!(detail.cycles, 12);
    assert_eq!(data.battery_charge, 50);
    assert!((data.battery_current + 2.5).abs() < 1e-4);
    assert_eq!(data.battery_temperature, 24);

    let err = client.enable_load(true).expect_err("no load switch");
    assert!(matches!(err, PollError::Unsupported("battery")));
}
