// shared/src/lib.rs
pub mod config;

pub use config::{
    Chain, ConfigError, MonitorConfig, MonitorSettings, ProviderCapability, ProviderConfig,
    PurgeSettings,
};

use chrono::{DateTime, Utc};

/// Milliseconds since the unix epoch for `when`.
pub fn epoch_msecs(when: DateTime<Utc>) -> i64 {
    when.timestamp_millis()
}

/// Current wall clock time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
