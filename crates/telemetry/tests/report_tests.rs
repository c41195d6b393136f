use std::cell::RefCell;
use std::rc::Rc;

use chrono::{Duration, TimeZone, Utc};
use telemetry::{ReportSink, Reporter, SinkError, StatusReport};
use types::Data;

#[derive(Default)]
struct FakeSink {
    intervals: Vec<Result<u32, SinkError>>,
    fail_send: bool,
    sent: Vec<StatusReport>,
}

impl ReportSink for FakeSink {
    fn status_interval(&mut self) -> Result<u32, SinkError> {
        if self.intervals.is_empty() {
            return Err(SinkError::Unavailable("no script".to_string()));
        }
        self.intervals.remove(0)
    }

    fn send(&mut self, report: &StatusReport) -> Result<(), SinkError> {
        if self.fail_send {
            return Err(SinkError::Rejected("400".to_string()));
        }
        self.sent.push(report.clone());
        Ok(())
    }
}

fn statuses(reporter: &mut Reporter<FakeSink>) -> Rc<RefCell<Vec<String>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    reporter
        .status_mut()
        .observe(move |status: &String| sink.borrow_mut().push(status.clone()));
    seen
}

#[test]
fn start_retries_until_interval_is_known() {
    let sink = FakeSink {
        intervals: vec![Err(SinkError::Unavailable("dns".to_string())), Ok(5)],
        ..FakeSink::default()
    };
    let mut reporter = Reporter::new(sink, 10, 0);
    let seen = statuses(&mut reporter);
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    reporter.tick(now);
    assert!(!reporter.is_started());
    reporter.tick(now);
    assert!(reporter.is_started());
    assert_eq!(reporter.interval_secs(), 300);

    assert_eq!(
        *seen.borrow(),
        vec![
            "Starting".to_string(),
            "Could not get update interval, retrying".to_string(),
            "Starting".to_string(),
            "Running".to_string(),
        ]
    );
}

#[test]
fn sends_once_per_interval_with_offset_time() {
    let sink = FakeSink {
        intervals: vec![Ok(1)],
        ..FakeSink::default()
    };
    let mut reporter = Reporter::new(sink, 10, 2);
    let seen = statuses(&mut reporter);
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 23, 30, 0).unwrap();

    reporter.update_data(&Data {
        panel_voltage: 18.0,
        panel_current: 5.0,
        battery_voltage: 12.8,
        battery_temperature: 21,
        generation: Some(450),
        ..Data::default()
    });

    reporter.tick(now);
    for second in 1..60 {
        reporter.tick(now + Duration::seconds(second));
    }
    assert!(reporter.sink().sent.is_empty());
    reporter.tick(now + Duration::seconds(60));

    let sent = &reporter.sink().sent;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].date(), "20240602");
    assert_eq!(sent[0].time(), "01:31");
    assert_eq!(sent[0].power_generation, 90);
    assert_eq!(seen.borrow().last().map(String::as_str), Some("Sent data (01:31)"));
}

#[test]
fn failed_send_is_reported_as_status() {
    let sink = FakeSink {
        intervals: vec![Ok(1)],
        fail_send: true,
        ..FakeSink::default()
    };
    let mut reporter = Reporter::new(sink, 10, 0);
    let seen = statuses(&mut reporter);
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

    for second in 0..=60 {
        reporter.tick(now + Duration::seconds(second));
    }

    assert_eq!(
        seen.borrow().last().map(String::as_str),
        Some("Could not send power data")
    );
    assert!(reporter.is_started());
}

#[test]
fn interval_follows_wall_time_not_tick_count() {
    let sink = FakeSink {
        intervals: vec![Ok(1)],
        ..FakeSink::default()
    };
    let mut reporter = Reporter::new(sink, 10, 0);
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

    reporter.tick(start);
    for _ in 0..200 {
        reporter.tick(start + Duration::seconds(30));
    }
    assert!(reporter.sink().sent.is_empty());

    // a poll blocked the loop for a while; one late tick still sends
    reporter.tick(start + Duration::seconds(150));
    assert_eq!(reporter.sink().sent.len(), 1);
    assert_eq!(reporter.sink().sent[0].time(), "10:02");

    reporter.tick(start + Duration::seconds(209));
    assert_eq!(reporter.sink().sent.len(), 1);
    reporter.tick(start + Duration::seconds(210));
    assert_eq!(reporter.sink().sent.len(), 2);
}

#[test]
fn query_omits_missing_energy_counters() {
    let report = StatusReport {
        timestamp: Utc
            .with_ymd_and_hms(2024, 1, 5, 7, 4, 0)
            .unwrap()
            .naive_utc(),
        energy_generation: None,
        power_generation: 120,
        energy_consumption: Some(30),
        power_consumption: 15,
        temperature: 21.26,
        voltage: 12.84,
    };

    assert_eq!(
        report.query(),
        "d=20240105&t=07:04&v2=120&v3=30&v4=15&v5=21.3&v6=12.8"
    );
    assert!(report.path().starts_with("/service/r2/addstatus.jsp?d=20240105"));
}
