// monitor_service/src/tasks/check_no_sends.rs
use crate::error::MonitorError;
use crate::task::{Interval, MonitorContext, MonitorTask};
use crate::tasks::check_for_proofs::get_proofs;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use storage_service::ProvenTxReqStatus;

/// Looks for proofs of `nosend` transactions, which were handed to the
/// network by some other party. Every pass counts as an attempt.
pub struct CheckNoSends {
    ctx: MonitorContext,
    interval: Interval,
}

impl CheckNoSends {
    pub const NAME: &'static str = "CheckNoSends";

    pub fn new(ctx: MonitorContext) -> Self {
        let interval = Interval::new(ctx.config.monitor.check_no_sends_msecs);
        Self { ctx, interval }
    }
}

#[async_trait]
impl MonitorTask for CheckNoSends {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn trigger(&mut self, now: DateTime<Utc>) -> Result<bool, MonitorError> {
        Ok(self.interval.elapsed(now))
    }

    async fn run(&mut self, now: DateTime<Utc>) -> Result<String, MonitorError> {
        get_proofs(&self.ctx, &[ProvenTxReqStatus::Nosend], true, now).await
    }
}
