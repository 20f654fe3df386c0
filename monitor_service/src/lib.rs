// monitor_service/src/lib.rs
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod task;
pub mod tasks;

pub use error::MonitorError;
pub use metrics::MonitorMetrics;
pub use monitor::{Monitor, ERROR_EVENT};
pub use task::{Interval, MonitorContext, MonitorTask};
