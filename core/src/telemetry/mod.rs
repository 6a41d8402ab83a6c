pub mod log;
pub mod metrics;

pub use self::log::StatusLog;
pub use metrics::{MetricsRecorder, MetricsSnapshot};
