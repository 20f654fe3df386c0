// monitor_service/src/task.rs
use crate::error::MonitorError;
use async_channel::Receiver;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use network_service::{BlockHeader, Services};
use shared::{epoch_msecs, MonitorConfig};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use storage_service::WalletStorage;

/// A unit of scheduled work. The monitor asks every task whether it is due,
/// then runs the due ones one after another.
#[async_trait]
pub trait MonitorTask: Send {
    fn name(&self) -> &str;

    /// One-time preparation before the first cycle.
    async fn setup(&mut self) -> Result<(), MonitorError> {
        Ok(())
    }

    async fn trigger(&mut self, now: DateTime<Utc>) -> Result<bool, MonitorError>;

    /// Returns a log of what was done; empty when there was nothing to do.
    async fn run(&mut self, now: DateTime<Utc>) -> Result<String, MonitorError>;
}

/// State shared by the monitor and its tasks.
#[derive(Clone)]
pub struct MonitorContext {
    pub storage: Arc<dyn WalletStorage>,
    pub services: Arc<Services>,
    pub config: Arc<MonitorConfig>,
    /// Set when a new block header arrives; the next proof pass runs
    /// immediately and counts its attempts.
    pub check_now: Arc<AtomicBool>,
    pub last_header: Arc<Mutex<Option<BlockHeader>>>,
    pub headers: Receiver<BlockHeader>,
}

impl MonitorContext {
    pub fn last_header(&self) -> Option<BlockHeader> {
        self.last_header
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_last_header(&self, header: BlockHeader) {
        *self
            .last_header
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(header);
    }
}

/// Fires once every `msecs`, and on the first check.
#[derive(Clone, Copy, Debug)]
pub struct Interval {
    msecs: i64,
    last_msecs: i64,
}

impl Interval {
    pub fn new(msecs: i64) -> Self {
        Self { msecs, last_msecs: 0 }
    }

    pub fn due(&self, now: DateTime<Utc>) -> bool {
        epoch_msecs(now) - self.last_msecs >= self.msecs
    }

    pub fn mark(&mut self, now: DateTime<Utc>) {
        self.last_msecs = epoch_msecs(now);
    }

    /// Checks and marks in one step.
    pub fn elapsed(&mut self, now: DateTime<Utc>) -> bool {
        if self.due(now) {
            self.mark(now);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn interval_fires_first_time_then_waits() {
        let start = Utc::now();
        let mut interval = Interval::new(60_000);
        assert!(interval.elapsed(start));
        assert!(!interval.elapsed(start + Duration::seconds(59)));
        assert!(interval.elapsed(start + Duration::seconds(60)));
    }
}
