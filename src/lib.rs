pub mod aggregator;
pub mod cli;
pub mod config;
pub mod connection;
pub mod feedback;
pub mod probe;
pub mod report;
pub mod sanitize;
pub mod transport;
pub mod util;

pub use aggregator::{ProbeAggregator, ProbeRun};
pub use feedback::{FeedbackCollector, FeedbackJoin};
pub use probe::{ProbeKind, ProbeResult};
pub use report::{FinalReport, ReportData, Screenshot};
