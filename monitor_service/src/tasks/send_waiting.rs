// monitor_service/src/tasks/send_waiting.rs
use crate::error::MonitorError;
use crate::task::{Interval, MonitorContext, MonitorTask};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use network_service::{PostTxResultForTxid, PostTxStatus, Services, TxBundle};
use storage_service::{
    FindProvenTxReqsArgs, HistoryNote, ProvenTxReq, ProvenTxReqPartial, ProvenTxReqStatus,
    TransactionStatus,
};
use tracing::{debug, info, warn};

/// More submissions than this fail a record before it reaches the network.
pub const MAX_SEND_ATTEMPTS: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchSendStatus {
    /// Every txid in the batch was accepted.
    Success,
    /// At least one txid was rejected or its fate is unknown.
    Error,
    /// Pre-flight validation failed; nothing was sent.
    Invalid,
}

#[derive(Clone, Debug)]
pub struct BatchSendResult {
    pub batch: String,
    pub status: BatchSendStatus,
    pub txid_results: Vec<PostTxResultForTxid>,
    pub details: Option<String>,
}

/// Broadcasts Proof Records waiting in `unsent` (or stuck in `sending`),
/// one batch at a time.
pub struct SendWaiting {
    ctx: MonitorContext,
    interval: Interval,
}

impl SendWaiting {
    pub const NAME: &'static str = "SendWaiting";

    pub fn new(ctx: MonitorContext) -> Self {
        let interval = Interval::new(ctx.config.monitor.send_waiting_msecs);
        Self { ctx, interval }
    }
}

#[async_trait]
impl MonitorTask for SendWaiting {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn trigger(&mut self, now: DateTime<Utc>) -> Result<bool, MonitorError> {
        Ok(self.interval.elapsed(now))
    }

    async fn run(&mut self, now: DateTime<Utc>) -> Result<String, MonitorError> {
        let results = send_waiting(&self.ctx, now).await?;
        let mut log = String::new();
        let mut failed = Vec::new();
        for r in &results {
            log.push_str(&format!("batch {} {:?}", r.batch, r.status));
            if let Some(details) = &r.details {
                log.push_str(&format!(": {}", details));
            }
            log.push('\n');
            if r.status == BatchSendStatus::Error {
                failed.push(r.batch.clone());
            }
        }
        if !failed.is_empty() {
            return Err(MonitorError::Post(format!(
                "{} of {} batches not accepted: {}\n{}",
                failed.len(),
                results.len(),
                failed.join(", "),
                log
            )));
        }
        Ok(log)
    }
}

/// Groups waiting records by batch, keeping first-seen order. Records
/// without a batch go alone.
fn group_by_batch(reqs: Vec<ProvenTxReq>) -> Vec<(String, Vec<ProvenTxReq>)> {
    let mut groups: Vec<(String, Vec<ProvenTxReq>)> = Vec::new();
    for req in reqs {
        let key = req.batch.clone().unwrap_or_else(|| req.txid.clone());
        match groups.iter_mut().find(|(batch, _)| *batch == key) {
            Some((_, members)) => members.push(req),
            None => groups.push((key, vec![req])),
        }
    }
    groups
}

fn preflight(req: &ProvenTxReq) -> Option<String> {
    if req.raw_tx.is_empty() {
        return Some(format!("{} has no raw tx", req.txid));
    }
    if req.notify.is_empty() {
        return Some(format!("{} has no transactions to notify", req.txid));
    }
    if req.attempts > MAX_SEND_ATTEMPTS {
        return Some(format!("{} sent {} times", req.txid, req.attempts));
    }
    None
}

async fn save(ctx: &MonitorContext, req: &ProvenTxReq, now: DateTime<Utc>) -> Result<(), MonitorError> {
    let mut update = req.to_update();
    update.updated_at = now;
    ctx.storage
        .update_proven_tx_req(req.proven_tx_req_id, &update)
        .await?;
    Ok(())
}

/// Every record awaiting broadcast in the batch `selected` belongs to, not
/// only the members old enough to have been selected.
async fn batch_members(
    ctx: &MonitorContext,
    selected: &[ProvenTxReq],
) -> Result<Vec<ProvenTxReq>, MonitorError> {
    let Some(batch) = selected.first().and_then(|req| req.batch.clone()) else {
        return Ok(selected.to_vec());
    };
    let members = ctx
        .storage
        .find_proven_tx_reqs(&FindProvenTxReqsArgs {
            partial: ProvenTxReqPartial {
                batch: Some(batch),
                ..Default::default()
            },
            ..FindProvenTxReqsArgs::with_statuses(&ProvenTxReqStatus::AWAITING_BROADCAST)
        })
        .await?;
    Ok(members)
}

/// Sends every batch whose records are all at least
/// `monitor.send_waiting_min_age_msecs` old. A batch with a younger member
/// waits whole.
pub async fn send_waiting(
    ctx: &MonitorContext,
    now: DateTime<Utc>,
) -> Result<Vec<BatchSendResult>, MonitorError> {
    let cutoff = now - Duration::milliseconds(ctx.config.monitor.send_waiting_min_age_msecs);
    let waiting = ctx
        .storage
        .find_proven_tx_reqs(&FindProvenTxReqsArgs {
            updated_before: Some(cutoff),
            ..FindProvenTxReqsArgs::with_statuses(&ProvenTxReqStatus::AWAITING_BROADCAST)
        })
        .await?;

    let mut results = Vec::new();
    for page in group_by_batch(waiting).chunks(ctx.config.monitor.page_limit.max(1)) {
        for (batch, selected) in page {
            let members = batch_members(ctx, selected).await?;
            if let Some(young) = members.iter().find(|req| req.updated_at >= cutoff) {
                debug!("Batch {} waits for {} to age", batch, young.txid);
                continue;
            }
            results.push(send_batch(ctx, batch, members, now).await?);
        }
    }
    Ok(results)
}

async fn send_batch(
    ctx: &MonitorContext,
    batch: &str,
    mut reqs: Vec<ProvenTxReq>,
    now: DateTime<Utc>,
) -> Result<BatchSendResult, MonitorError> {
    if let Some(reason) = reqs.iter().find_map(preflight) {
        warn!("Batch {} failed pre-flight: {}", batch, reason);
        for req in &mut reqs {
            req.history_note(HistoryNote::new("preflightFailed").attr("reason", &reason), now);
            req.set_status(ProvenTxReqStatus::Invalid, now);
            save(ctx, req, now).await?;
            ctx.storage
                .update_transactions_status(
                    TransactionStatus::Failed,
                    &req.notify.transaction_ids,
                    now,
                )
                .await?;
        }
        return Ok(BatchSendResult {
            batch: batch.to_string(),
            status: BatchSendStatus::Invalid,
            txid_results: Vec::new(),
            details: Some(reason),
        });
    }

    if ctx.services.post_beef_services().is_empty() {
        return Ok(BatchSendResult {
            batch: batch.to_string(),
            status: BatchSendStatus::Error,
            txid_results: Vec::new(),
            details: Some("no post services configured".to_string()),
        });
    }

    let mut bundle = TxBundle::default();
    for req in &mut reqs {
        bundle.add(&req.txid, req.raw_tx.clone(), req.input_beef.clone());
        req.attempts += 1;
        req.history_note(HistoryNote::new("send").attr("attempts", req.attempts), now);
        req.set_status(ProvenTxReqStatus::Sending, now);
        save(ctx, req, now).await?;
    }
    let txids = bundle.txids();
    let posted = ctx.services.post_beef(&bundle, &txids).await;
    let reduced = Services::reduce_post_results(&posted, &txids);
    let providers: Vec<String> = posted.iter().map(|r| r.name.clone()).collect();

    let mut status = BatchSendStatus::Success;
    for req in &mut reqs {
        let Some(r) = reduced.iter().find(|r| r.txid == req.txid) else {
            continue;
        };
        match r.status {
            PostTxStatus::Success => {
                req.history_note(
                    HistoryNote::new("postSuccess").attr("providers", providers.join(",")),
                    now,
                );
                req.set_status(ProvenTxReqStatus::Unmined, now);
                save(ctx, req, now).await?;
                ctx.storage
                    .update_transactions_status(
                        TransactionStatus::Unproven,
                        &req.notify.transaction_ids,
                        now,
                    )
                    .await?;
            }
            PostTxStatus::DoubleSpend => {
                status = BatchSendStatus::Error;
                req.history_note(
                    HistoryNote::new("doubleSpend")
                        .attr("competing_txs", r.competing_txs.join(",")),
                    now,
                );
                req.set_status(ProvenTxReqStatus::DoubleSpend, now);
                save(ctx, req, now).await?;
                ctx.storage
                    .update_transactions_status(
                        TransactionStatus::Failed,
                        &req.notify.transaction_ids,
                        now,
                    )
                    .await?;
                warn!("{} rejected as a double spend", req.txid);
            }
            PostTxStatus::Unknown => {
                status = BatchSendStatus::Error;
                req.history_note(
                    HistoryNote::new("postUnknown")
                        .attr("error", r.error.clone().unwrap_or_default()),
                    now,
                );
                save(ctx, req, now).await?;
            }
        }
    }
    info!("Batch {} of {} txids sent: {:?}", batch, txids.len(), status);
    Ok(BatchSendResult {
        batch: batch.to_string(),
        status,
        txid_results: reduced,
        details: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(txid: &str, batch: Option<&str>) -> ProvenTxReq {
        let mut req = ProvenTxReq::new(txid, vec![1], ProvenTxReqStatus::Unsent, Utc::now());
        req.batch = batch.map(str::to_string);
        req
    }

    #[test]
    fn groups_keep_batches_together_in_order() {
        let groups = group_by_batch(vec![
            req("a", Some("b1")),
            req("b", None),
            req("c", Some("b1")),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "b1");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "b");
    }

    #[test]
    fn preflight_allows_ten_attempts_but_not_eleven() {
        let mut r = req("a", None);
        r.add_notify_transaction_id(7);
        r.attempts = MAX_SEND_ATTEMPTS;
        assert!(preflight(&r).is_none());
        r.attempts += 1;
        assert!(preflight(&r).is_some());
        r.notify.transaction_ids.clear();
        r.attempts = 0;
        assert!(preflight(&r).unwrap().contains("notify"));
    }
}
