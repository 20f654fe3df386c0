// monitor_service/src/tasks/check_for_proofs.rs
use crate::error::MonitorError;
use crate::task::{Interval, MonitorContext, MonitorTask};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use network_service::{verify_txid, GetMerklePathResult, MerklePath};
use std::sync::atomic::Ordering;
use storage_service::{
    FindProvenTxReqsArgs, HistoryNote, ProvenTx, ProvenTxReq, ProvenTxReqStatus,
};
use tracing::{debug, info, warn};

/// Polls merkle path services for Proof Records awaiting confirmation.
/// Runs on its interval, or at once when a new block header set the
/// shared `check_now` flag; only the latter counts attempts.
pub struct CheckForProofs {
    ctx: MonitorContext,
    interval: Interval,
    count_attempts: bool,
}

impl CheckForProofs {
    pub const NAME: &'static str = "CheckForProofs";

    pub fn new(ctx: MonitorContext) -> Self {
        let interval = Interval::new(ctx.config.monitor.check_for_proofs_msecs);
        Self {
            ctx,
            interval,
            count_attempts: false,
        }
    }
}

#[async_trait]
impl MonitorTask for CheckForProofs {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn trigger(&mut self, now: DateTime<Utc>) -> Result<bool, MonitorError> {
        let check_now = self.ctx.check_now.swap(false, Ordering::SeqCst);
        if check_now {
            self.interval.mark(now);
            self.count_attempts = true;
            return Ok(true);
        }
        self.count_attempts = false;
        Ok(self.interval.elapsed(now))
    }

    async fn run(&mut self, now: DateTime<Utc>) -> Result<String, MonitorError> {
        let count_attempts = std::mem::take(&mut self.count_attempts);
        get_proofs(
            &self.ctx,
            &ProvenTxReqStatus::AWAITING_PROOF,
            count_attempts,
            now,
        )
        .await
    }
}

/// Why a merkle path answer did not produce a Confirmation Record.
enum ProofOutcome {
    Proven(ProvenTx),
    NotFound,
    Rejected(String),
}

/// Runs one proof acquisition pass over every Proof Record in `statuses`.
///
/// Ids are snapshotted up front and processed in pages of
/// `monitor.page_limit`; each record is reloaded before processing and
/// skipped if its status has since left `statuses`.
pub async fn get_proofs(
    ctx: &MonitorContext,
    statuses: &[ProvenTxReqStatus],
    count_attempts: bool,
    now: DateTime<Utc>,
) -> Result<String, MonitorError> {
    let ids: Vec<u64> = ctx
        .storage
        .find_proven_tx_reqs(&FindProvenTxReqsArgs::with_statuses(statuses))
        .await?
        .into_iter()
        .map(|req| req.proven_tx_req_id)
        .collect();
    let limit = ctx.config.unproven_attempts_limit();
    let mut log = String::new();

    for page in ids.chunks(ctx.config.monitor.page_limit.max(1)) {
        for id in page {
            let Some(req) = ctx.storage.find_proven_tx_req_by_id(*id).await? else {
                continue;
            };
            if !statuses.contains(&req.status) {
                debug!("Proof record {} moved to {}, skipping", id, req.status);
                continue;
            }
            let line = get_proof(ctx, req, count_attempts, limit, now).await?;
            log.push_str(&line);
            log.push('\n');
        }
    }
    Ok(log)
}

async fn get_proof(
    ctx: &MonitorContext,
    mut req: ProvenTxReq,
    count_attempts: bool,
    limit: u32,
    now: DateTime<Utc>,
) -> Result<String, MonitorError> {
    let id = req.proven_tx_req_id;

    if let Some(proven_tx_id) = req.proven_tx_id {
        req.history_note(
            HistoryNote::new("alreadyProven").attr("proven_tx_id", proven_tx_id),
            now,
        );
        req.set_status(ProvenTxReqStatus::Completed, now);
        save(ctx, &req, now).await?;
        return Ok(format!("req {} already linked to proven tx {}", id, proven_tx_id));
    }

    if req.raw_tx.is_empty() {
        let r = ctx.services.get_raw_tx(&req.txid).await;
        if let Some(raw_tx) = r.raw_tx {
            req.history_note(
                HistoryNote::new("rawTxRecovered").attr("name", r.name.unwrap_or_default()),
                now,
            );
            req.raw_tx = raw_tx;
        }
    }

    if !req.raw_tx.is_empty() && !verify_txid(&req.raw_tx, &req.txid) {
        let note = HistoryNote::new("invalidRawTx").attr("txid", &req.txid);
        req.history_note(note, now);
        req.set_status(ProvenTxReqStatus::Invalid, now);
        save(ctx, &req, now).await?;
        warn!("Proof record {} raw tx does not hash to {}", id, req.txid);
        return Ok(format!("req {} invalid: raw tx does not hash to txid", id));
    }

    if req.attempts_exceeded(limit) {
        req.history_note(
            HistoryNote::new("attemptsExceeded")
                .attr("attempts", req.attempts)
                .attr("limit", limit),
            now,
        );
        req.set_status(ProvenTxReqStatus::Invalid, now);
        save(ctx, &req, now).await?;
        info!("Proof record {} invalid after {} attempts", id, req.attempts);
        return Ok(format!("req {} invalid: {} attempts exceeds {}", id, req.attempts, limit));
    }

    let r = ctx.services.get_merkle_path(&req.txid).await;
    let outcome = check_merkle_path(ctx, &req, &r, now).await;

    if let ProofOutcome::Proven(proven_tx) = &outcome {
        let height = proven_tx.height;
        ctx.storage
            .update_proven_tx_req_with_new_proven_tx(&req, proven_tx, now)
            .await?;
        info!("Proof record {} completed at height {}", id, height);
        return Ok(format!("req {} proven at height {}", id, height));
    }

    let mut note = HistoryNote::new("getMerklePath").attr("attempts", req.attempts);
    if let Some(name) = &r.name {
        note = note.attr("name", name);
    }
    if let Some(error) = &r.error {
        note = note.attr("error", error);
    }
    if let ProofOutcome::Rejected(reason) = &outcome {
        note = note.attr("rejected", reason);
    }
    req.history_note(note, now);
    if count_attempts && r.name.is_some() {
        req.attempts += 1;
    }
    save(ctx, &req, now).await?;
    Ok(match outcome {
        ProofOutcome::Rejected(reason) => format!("req {} proof rejected: {}", id, reason),
        _ => format!("req {} not yet proven, {} attempts", id, req.attempts),
    })
}

async fn check_merkle_path(
    ctx: &MonitorContext,
    req: &ProvenTxReq,
    r: &GetMerklePathResult,
    now: DateTime<Utc>,
) -> ProofOutcome {
    let Some(bytes) = &r.merkle_path else {
        return ProofOutcome::NotFound;
    };
    if req.raw_tx.is_empty() {
        return ProofOutcome::Rejected("raw tx unavailable".to_string());
    }
    let path = match MerklePath::from_bytes(bytes) {
        Ok(path) => path,
        Err(e) => return ProofOutcome::Rejected(e.to_string()),
    };
    let Some(index) = path.leaf_index(&req.txid) else {
        return ProofOutcome::Rejected("txid is not a leaf of the merkle path".to_string());
    };
    let root = match path.compute_root(&req.txid) {
        Ok(root) => root,
        Err(e) => return ProofOutcome::Rejected(e.to_string()),
    };
    let Some(tracker) = ctx.services.chain_tracker() else {
        return ProofOutcome::Rejected("no chain tracker".to_string());
    };
    match tracker.is_valid_root_for_height(&root, path.block_height).await {
        Ok(true) => {}
        Ok(false) => {
            return ProofOutcome::Rejected(format!(
                "root {} not valid at height {}",
                root, path.block_height
            ))
        }
        Err(e) => return ProofOutcome::Rejected(e.to_string()),
    }
    let header = match &r.header {
        Some(header) => Some(header.clone()),
        None => match tracker.find_header_for_height(path.block_height).await {
            Ok(header) => header,
            Err(e) => return ProofOutcome::Rejected(e.to_string()),
        },
    };
    let Some(header) = header else {
        return ProofOutcome::Rejected(format!("no header at height {}", path.block_height));
    };
    if header.height != path.block_height || header.merkle_root != root {
        return ProofOutcome::Rejected(format!(
            "header {} does not match merkle path",
            header.hash
        ));
    }
    ProofOutcome::Proven(ProvenTx {
        proven_tx_id: 0,
        created_at: now,
        updated_at: now,
        txid: req.txid.clone(),
        height: path.block_height,
        index,
        merkle_path: bytes.clone(),
        raw_tx: req.raw_tx.clone(),
        block_hash: header.hash,
        merkle_root: root,
    })
}

async fn save(ctx: &MonitorContext, req: &ProvenTxReq, now: DateTime<Utc>) -> Result<(), MonitorError> {
    let mut update = req.to_update();
    update.updated_at = now;
    ctx.storage
        .update_proven_tx_req(req.proven_tx_req_id, &update)
        .await?;
    Ok(())
}
