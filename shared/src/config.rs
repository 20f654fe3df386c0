// shared/src/config.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Main,
    #[default]
    Test,
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::Main => write!(f, "main"),
            Chain::Test => write!(f, "test"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCapability {
    MerklePath,
    RawTx,
    PostBeef,
    UtxoStatus,
    ChainTracker,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub addr: String,
    #[serde(default)]
    pub capabilities: Vec<ProviderCapability>,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

fn default_requests_per_second() -> u32 {
    3
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub task_run_wait_msecs: u64,
    pub check_for_proofs_msecs: i64,
    pub check_no_sends_msecs: i64,
    pub send_waiting_msecs: i64,
    pub send_waiting_min_age_msecs: i64,
    pub fail_abandoned_msecs: i64,
    pub abandoned_msecs: i64,
    pub purge_msecs: i64,
    pub review_status_msecs: i64,
    pub new_header_msecs: i64,
    pub clock_msecs: i64,
    pub unproven_attempts_limit_main: u32,
    pub unproven_attempts_limit_test: u32,
    pub page_limit: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        const MINUTE: i64 = 60 * 1000;
        Self {
            task_run_wait_msecs: 5000,
            check_for_proofs_msecs: 2 * 60 * MINUTE,
            check_no_sends_msecs: 24 * 60 * MINUTE,
            send_waiting_msecs: 8 * 1000,
            send_waiting_min_age_msecs: 7 * 1000,
            fail_abandoned_msecs: 8 * MINUTE,
            abandoned_msecs: 5 * MINUTE,
            purge_msecs: 6 * 60 * MINUTE,
            review_status_msecs: 15 * MINUTE,
            new_header_msecs: MINUTE,
            clock_msecs: MINUTE,
            unproven_attempts_limit_main: 144,
            unproven_attempts_limit_test: 2016,
            page_limit: 100,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeSettings {
    pub purge_spent: bool,
    pub purge_completed: bool,
    pub purge_failed: bool,
    pub purge_spent_age_msecs: i64,
    pub purge_completed_age_msecs: i64,
    pub purge_failed_age_msecs: i64,
}

impl Default for PurgeSettings {
    fn default() -> Self {
        const DAY: i64 = 24 * 60 * 60 * 1000;
        Self {
            purge_spent: false,
            purge_completed: false,
            purge_failed: true,
            purge_spent_age_msecs: 2 * 7 * DAY,
            purge_completed_age_msecs: 2 * 7 * DAY,
            purge_failed_age_msecs: 5 * DAY,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub chain: Chain,
    pub storage_path: String,
    pub log_level: String,
    pub monitor: MonitorSettings,
    pub purge: PurgeSettings,
    pub providers: Vec<ProviderConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            chain: Chain::Test,
            storage_path: "./wallet_db".to_string(),
            log_level: "info".to_string(),
            monitor: MonitorSettings::default(),
            purge: PurgeSettings::default(),
            providers: Vec::new(),
        }
    }
}

impl MonitorConfig {
    pub fn from_toml(config_str: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path)?;
        Self::from_toml(&config_str)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.page_limit == 0 {
            return Err(ConfigError::Invalid("monitor.page_limit must be positive".to_string()));
        }
        for provider in &self.providers {
            if provider.requests_per_second == 0 {
                return Err(ConfigError::Invalid(format!(
                    "provider {} requests_per_second must be positive",
                    provider.name
                )));
            }
        }
        Ok(())
    }

    /// Attempts allowed before an unproven Proof Record is declared invalid.
    pub fn unproven_attempts_limit(&self) -> u32 {
        match self.chain {
            Chain::Main => self.monitor.unproven_attempts_limit_main,
            Chain::Test => self.monitor.unproven_attempts_limit_test,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_config_with_defaults() {
        let config = MonitorConfig::from_toml(
            r#"
chain = "main"

[monitor]
page_limit = 10

[[providers]]
name = "arc"
addr = "127.0.0.1:50070"
capabilities = ["post_beef", "merkle_path"]
"#,
        )
        .unwrap();
        assert_eq!(config.chain, Chain::Main);
        assert_eq!(config.monitor.page_limit, 10);
        assert_eq!(config.unproven_attempts_limit(), 144);
        assert_eq!(config.providers[0].requests_per_second, 3);
        assert_eq!(
            config.providers[0].capabilities,
            vec![ProviderCapability::PostBeef, ProviderCapability::MerklePath]
        );
    }

    #[test]
    fn rejects_zero_page_limit() {
        let err = MonitorConfig::from_toml("[monitor]\npage_limit = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
