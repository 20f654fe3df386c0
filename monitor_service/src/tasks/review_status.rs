// monitor_service/src/tasks/review_status.rs
use crate::error::MonitorError;
use crate::task::{Interval, MonitorContext, MonitorTask};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use storage_service::{
    FindProvenTxReqsArgs, HistoryNote, ProvenTxReqPartial, ProvenTxReqStatus, TransactionStatus,
};
use tracing::info;

/// Tells local transactions how their Proof Record ended, once.
///
/// Terminal records with `notified == false` push `completed` (with the
/// proven tx link) or `failed` to each transaction in `notify`, then are
/// marked notified.
pub struct ReviewStatus {
    ctx: MonitorContext,
    interval: Interval,
}

impl ReviewStatus {
    pub const NAME: &'static str = "ReviewStatus";

    pub fn new(ctx: MonitorContext) -> Self {
        let interval = Interval::new(ctx.config.monitor.review_status_msecs);
        Self { ctx, interval }
    }
}

#[async_trait]
impl MonitorTask for ReviewStatus {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn trigger(&mut self, now: DateTime<Utc>) -> Result<bool, MonitorError> {
        Ok(self.interval.elapsed(now))
    }

    async fn run(&mut self, now: DateTime<Utc>) -> Result<String, MonitorError> {
        let storage = &self.ctx.storage;
        let pending = storage
            .find_proven_tx_reqs(&FindProvenTxReqsArgs {
                partial: ProvenTxReqPartial {
                    notified: Some(false),
                    ..Default::default()
                },
                ..FindProvenTxReqsArgs::with_statuses(&ProvenTxReqStatus::TERMINAL)
            })
            .await?;

        let mut log = String::new();
        for mut req in pending {
            let ids = req.notify.transaction_ids.clone();
            match (req.status, req.proven_tx_id) {
                (ProvenTxReqStatus::Completed, proven_tx_id) => {
                    // Status and proof link land together for every waiting transaction.
                    storage.run_in_transaction(&|stx| {
                        for id in &ids {
                            let Some(mut tx) = stx.get_transaction(*id)? else {
                                continue;
                            };
                            tx.status = TransactionStatus::Completed;
                            if proven_tx_id.is_some() {
                                tx.proven_tx_id = proven_tx_id;
                            }
                            tx.updated_at = now;
                            stx.put_transaction(&tx)?;
                        }
                        Ok(())
                    })?;
                }
                _ => {
                    storage
                        .update_transactions_status(TransactionStatus::Failed, &ids, now)
                        .await?;
                }
            }
            req.notified = true;
            req.history_note(
                HistoryNote::new("notified")
                    .attr("status", req.status)
                    .attr("transactions", ids.len()),
                now,
            );
            let mut update = req.to_update();
            update.updated_at = now;
            storage
                .update_proven_tx_req(req.proven_tx_req_id, &update)
                .await?;
            log.push_str(&format!(
                "req {} {} notified {} transactions\n",
                req.proven_tx_req_id,
                req.status,
                ids.len()
            ));
        }
        if !log.is_empty() {
            info!("{}", log.trim_end());
        }
        Ok(log)
    }
}
