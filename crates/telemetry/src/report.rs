use std::fmt::Write as _;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use types::Data;

use crate::{EnergyAggregator, Observable};

pub const ADD_STATUS_PATH: &str = "/service/r2/addstatus.jsp";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("report service unavailable: {0}")]
    Unavailable(String),
    #[error("report service rejected request: {0}")]
    Rejected(String),
}

/// Remote reporting service. Implementations own the HTTP plumbing.
pub trait ReportSink {
    /// Status interval configured for the system, in minutes.
    fn status_interval(&mut self) -> Result<u32, SinkError>;

    fn send(&mut self, report: &StatusReport) -> Result<(), SinkError>;
}

/// One `addstatus` sample.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub timestamp: NaiveDateTime,
    /// v1, Wh today.
    pub energy_generation: Option<u32>,
    /// v2, W.
    pub power_generation: u32,
    /// v3, Wh today.
    pub energy_consumption: Option<u32>,
    /// v4, W.
    pub power_consumption: u32,
    /// v5, °C.
    pub temperature: f32,
    /// v6, V.
    pub voltage: f32,
}

impl StatusReport {
    pub fn from_aggregator(aggregator: &EnergyAggregator, timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            energy_generation: aggregator.energy_generation(),
            power_generation: aggregator.power_generation().max(0.0).round() as u32,
            energy_consumption: aggregator.energy_consumption(),
            power_consumption: aggregator.power_consumption().max(0.0).round() as u32,
            temperature: aggregator.temperature(),
            voltage: aggregator.voltage(),
        }
    }

    pub fn date(&self) -> String {
        self.timestamp.format("%Y%m%d").to_string()
    }

    pub fn time(&self) -> String {
        self.timestamp.format("%H:%M").to_string()
    }

    pub fn query(&self) -> String {
        let mut query = format!("d={}&t={}", self.date(), self.time());
        if let Some(energy) = self.energy_generation {
            let _ = write!(query, "&v1={energy}");
        }
        let _ = write!(query, "&v2={}", self.power_generation);
        if let Some(energy) = self.energy_consumption {
            let _ = write!(query, "&v3={energy}");
        }
        let _ = write!(
            query,
            "&v4={}&v5={:.1}&v6={:.1}",
            self.power_consumption, self.temperature, self.voltage
        );
        query
    }

    pub fn path(&self) -> String {
        format!("{ADD_STATUS_PATH}?{}", self.query())
    }
}

/// Periodic uploader driven by a one-second tick.
pub struct Reporter<S> {
    sink: S,
    aggregator: EnergyAggregator,
    status: Observable<String>,
    started: bool,
    interval_secs: u32,
    next_send: Option<DateTime<Utc>>,
    time_offset: Duration,
}

impl<S: ReportSink> Reporter<S> {
    pub fn new(sink: S, window: u32, time_offset_hours: i32) -> Self {
        Self {
            sink,
            aggregator: EnergyAggregator::new(window),
            status: Observable::new(),
            started: false,
            interval_secs: 0,
            next_send: None,
            time_offset: Duration::hours(i64::from(time_offset_hours)),
        }
    }

    pub fn status(&self) -> &Observable<String> {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut Observable<String> {
        &mut self.status
    }

    pub fn aggregator(&self) -> &EnergyAggregator {
        &self.aggregator
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn interval_secs(&self) -> u32 {
        self.interval_secs
    }

    pub fn update_data(&mut self, data: &Data) {
        self.aggregator.update_data(data);
    }

    /// Fetch the status interval; until that succeeds nothing is sent.
    pub fn start(&mut self) {
        info!("report uplink starting");
        self.status.notify("Starting".to_string());

        match self.sink.status_interval() {
            Ok(minutes) if minutes > 0 => {
                self.started = true;
                self.interval_secs = minutes.saturating_mul(60);
                info!(interval_secs = self.interval_secs, "report uplink running");
                self.status.notify("Running".to_string());
            }
            outcome => {
                self.started = false;
                match outcome {
                    Err(err) => warn!(error = %err, "could not get status interval"),
                    Ok(_) => warn!("status interval is zero"),
                }
                self.status
                    .notify("Could not get update interval, retrying".to_string());
            }
        }
    }

    /// Sends are spaced by the wall time in `now`, so late or skipped ticks do not
    /// stretch the interval.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if !self.started {
            self.next_send = None;
            self.start();
            if self.started {
                self.next_send = Some(now + self.interval());
            }
            return;
        }

        let interval = self.interval();
        let Some(due) = self.next_send else {
            self.next_send = Some(now + interval);
            return;
        };
        if now < due {
            return;
        }

        let mut next = due + interval;
        if next <= now {
            debug!(late_secs = (now - due).num_seconds(), "report sent late");
            next = now + interval;
        }
        self.next_send = Some(next);
        self.send(now);
    }

    fn interval(&self) -> Duration {
        Duration::seconds(i64::from(self.interval_secs))
    }

    fn send(&mut self, now: DateTime<Utc>) {
        let local = now.naive_utc() + self.time_offset;
        let report = StatusReport::from_aggregator(&self.aggregator, local);
        debug!(query = %report.query(), "sending status report");

        match self.sink.send(&report) {
            Ok(()) => {
                let status = format!("Sent data ({})", report.time());
                info!("{status}");
                self.status.notify(status);
            }
            Err(err) => {
                warn!(error = %err, "could not send power data");
                self.status.notify("Could not send power data".to_string());
            }
        }
    }
}
