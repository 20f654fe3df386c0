// monitor_service/src/tasks/purge.rs
use crate::error::MonitorError;
use crate::task::{Interval, MonitorContext, MonitorTask};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Retention purge of aged terminal records, per `[purge]` settings.
pub struct Purge {
    ctx: MonitorContext,
    interval: Interval,
}

impl Purge {
    pub const NAME: &'static str = "Purge";

    pub fn new(ctx: MonitorContext) -> Self {
        let interval = Interval::new(ctx.config.monitor.purge_msecs);
        Self { ctx, interval }
    }
}

#[async_trait]
impl MonitorTask for Purge {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn trigger(&mut self, now: DateTime<Utc>) -> Result<bool, MonitorError> {
        let purge = &self.ctx.config.purge;
        if !(purge.purge_spent || purge.purge_completed || purge.purge_failed) {
            return Ok(false);
        }
        Ok(self.interval.elapsed(now))
    }

    async fn run(&mut self, now: DateTime<Utc>) -> Result<String, MonitorError> {
        let results = self.ctx.storage.purge_data(&self.ctx.config.purge, now).await?;
        Ok(results.log)
    }
}
