// monitor_service/src/tasks/fail_abandoned.rs
use crate::error::MonitorError;
use crate::task::{Interval, MonitorContext, MonitorTask};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use storage_service::{FindTransactionsArgs, TransactionStatus};
use tracing::info;

/// Fails local transactions left unsigned or unprocessed for longer than
/// `monitor.abandoned_msecs`, releasing the outputs they reserved.
pub struct FailAbandoned {
    ctx: MonitorContext,
    interval: Interval,
}

impl FailAbandoned {
    pub const NAME: &'static str = "FailAbandoned";

    pub fn new(ctx: MonitorContext) -> Self {
        let interval = Interval::new(ctx.config.monitor.fail_abandoned_msecs);
        Self { ctx, interval }
    }
}

#[async_trait]
impl MonitorTask for FailAbandoned {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn trigger(&mut self, now: DateTime<Utc>) -> Result<bool, MonitorError> {
        Ok(self.interval.elapsed(now))
    }

    async fn run(&mut self, now: DateTime<Utc>) -> Result<String, MonitorError> {
        let cutoff = now - Duration::milliseconds(self.ctx.config.monitor.abandoned_msecs);
        let abandoned = self
            .ctx
            .storage
            .find_transactions(&FindTransactionsArgs {
                statuses: vec![TransactionStatus::Unsigned, TransactionStatus::Unprocessed],
                updated_before: Some(cutoff),
                ..Default::default()
            })
            .await?;
        let mut log = String::new();
        for tx in &abandoned {
            self.ctx
                .storage
                .update_transaction_status(TransactionStatus::Failed, tx.transaction_id, now)
                .await?;
            log.push_str(&format!(
                "transaction {} ({}) abandoned in {}\n",
                tx.transaction_id, tx.reference, tx.status
            ));
        }
        if !abandoned.is_empty() {
            info!("Failed {} abandoned transactions", abandoned.len());
        }
        Ok(log)
    }
}
