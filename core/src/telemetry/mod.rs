pub mod log;
pub mod metrics;

pub use self::log::{LogManager, LogRecord};
pub use metrics::{Metrics, MetricsRecorder};
