mod aggregate;
mod observable;
mod report;

pub use aggregate::{EnergyAggregator, RollingAverage};
pub use observable::{Observable, Observer};
pub use report::{ReportSink, Reporter, SinkError, StatusReport};
