use tracing::info;

use telemetry::{ReportSink, SinkError, StatusReport};

/// Report sink for setups without an uplink: hands out the configured interval
/// and logs every report it would have sent.
#[derive(Debug, Clone)]
pub struct LogSink {
    interval_min: u32,
    sent: u64,
}

impl LogSink {
    pub fn new(interval_min: u32) -> Self {
        Self {
            interval_min,
            sent: 0,
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl ReportSink for LogSink {
    fn status_interval(&mut self) -> Result<u32, SinkError> {
        Ok(self.interval_min)
    }

    fn send(&mut self, report: &StatusReport) -> Result<(), SinkError> {
        self.sent += 1;
        info!(path = %report.path(), "status report");
        Ok(())
    }
}
