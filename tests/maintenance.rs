// tests/maintenance.rs
mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::*;
use galaxy_wallet::monitor_service::tasks::{FailAbandoned, Purge, ReviewStatus};
use galaxy_wallet::network_service::{
    GetUtxoStatusResult, OutputRef, Services, UtxoDetail, UtxoStatusProvider,
};
use galaxy_wallet::shared::{Chain, MonitorConfig, PurgeSettings};
use galaxy_wallet::storage_service::{
    abort_transaction, Output, ProvenTx, ProvenTxReqStatus, StorageError, TransactionStatus,
    WalletStorage,
};
use std::sync::Arc;

const DAY_SECS: i64 = 24 * 60 * 60;

#[tokio::test]
async fn test_abandoned_transactions_fail_and_release_inputs() {
    let h = harness(Services::new(Chain::Test)).await;
    let funding = insert_local_tx(&h.storage, TransactionStatus::Completed, None, ago(3600)).await;
    let stale = insert_local_tx(&h.storage, TransactionStatus::Unsigned, None, ago(600)).await;
    let fresh = insert_local_tx(&h.storage, TransactionStatus::Unprocessed, None, ago(10)).await;

    let mut reserved = Output::new(funding, 0, 5_000, Utc::now());
    reserved.spendable = false;
    reserved.spent_by = Some(stale);
    let reserved_id = h.storage.insert_output(&reserved).await.unwrap();

    h.monitor.run_task(FailAbandoned::NAME).await.unwrap();

    let status = |id| {
        let storage = h.storage.clone();
        async move { storage.find_transaction_by_id(id).await.unwrap().unwrap().status }
    };
    assert_eq!(status(stale).await, TransactionStatus::Failed);
    assert_eq!(status(fresh).await, TransactionStatus::Unprocessed);
    assert_eq!(status(funding).await, TransactionStatus::Completed);

    let released = h
        .storage
        .find_outputs(funding)
        .await
        .unwrap()
        .into_iter()
        .find(|o| o.output_id == reserved_id)
        .unwrap();
    assert!(released.spendable);
    assert_eq!(released.spent_by, None);
}

#[tokio::test]
async fn test_terminal_outcomes_are_notified_exactly_once() {
    let h = harness(Services::new(Chain::Test)).await;
    let now = Utc::now();
    let (raw_done, txid_done) = raw_tx("done");
    let (raw_bad, txid_bad) = raw_tx("bad");
    let done_local = insert_local_tx(
        &h.storage,
        TransactionStatus::Unproven,
        Some(txid_done.as_str()),
        ago(60),
    )
    .await;
    let bad_local = insert_local_tx(
        &h.storage,
        TransactionStatus::Sending,
        Some(txid_bad.as_str()),
        ago(60),
    )
    .await;
    let (proven, _) = h
        .storage
        .find_or_insert_proven_tx(&ProvenTx {
            proven_tx_id: 0,
            created_at: now,
            updated_at: now,
            txid: txid_done.clone(),
            height: 900,
            index: 1,
            merkle_path: Vec::new(),
            raw_tx: raw_done.clone(),
            block_hash: txid_done.clone(),
            merkle_root: txid_done.clone(),
        })
        .await
        .unwrap();
    let done = insert_req(
        &h.storage,
        &txid_done,
        raw_done,
        ProvenTxReqStatus::Completed,
        ago(60),
        |r| {
            r.proven_tx_id = Some(proven.proven_tx_id);
            r.add_notify_transaction_id(done_local);
        },
    )
    .await;
    let bad = insert_req(
        &h.storage,
        &txid_bad,
        raw_bad,
        ProvenTxReqStatus::Invalid,
        ago(60),
        |r| {
            r.add_notify_transaction_id(bad_local);
        },
    )
    .await;

    let log = h.monitor.run_task(ReviewStatus::NAME).await.unwrap();
    assert_eq!(log.lines().count(), 2);

    let local = h.storage.find_transaction_by_id(done_local).await.unwrap().unwrap();
    assert_eq!(local.status, TransactionStatus::Completed);
    assert_eq!(local.proven_tx_id, Some(proven.proven_tx_id));
    let local = h.storage.find_transaction_by_id(bad_local).await.unwrap().unwrap();
    assert_eq!(local.status, TransactionStatus::Failed);

    let done = reload(&h.storage, &done).await;
    let bad = reload(&h.storage, &bad).await;
    assert!(done.notified && bad.notified);
    assert_eq!(done.status, ProvenTxReqStatus::Completed);

    let log = h.monitor.run_task(ReviewStatus::NAME).await.unwrap();
    assert!(log.is_empty());
    assert_eq!(reload(&h.storage, &done).await.history, done.history);
}

#[tokio::test]
async fn test_purge_removes_aged_failures_only() {
    let config = MonitorConfig {
        purge: PurgeSettings {
            purge_failed: true,
            purge_failed_age_msecs: 5 * DAY_SECS * 1000,
            ..Default::default()
        },
        ..test_config()
    };
    let h = harness_with(Services::new(Chain::Test), config).await;
    h.monitor.add_default_tasks().await.unwrap();

    let old_failed =
        insert_local_tx(&h.storage, TransactionStatus::Failed, None, ago(6 * DAY_SECS)).await;
    let new_failed =
        insert_local_tx(&h.storage, TransactionStatus::Failed, None, ago(DAY_SECS)).await;
    let old_output = h
        .storage
        .insert_output(&Output::new(old_failed, 0, 1_000, Utc::now()))
        .await
        .unwrap();

    let (raw_old, txid_old) = raw_tx("purged");
    let (raw_unnotified, txid_unnotified) = raw_tx("unnotified");
    let old_req = insert_req(
        &h.storage,
        &txid_old,
        raw_old,
        ProvenTxReqStatus::Invalid,
        ago(6 * DAY_SECS),
        |r| r.notified = true,
    )
    .await;
    let unnotified = insert_req(
        &h.storage,
        &txid_unnotified,
        raw_unnotified,
        ProvenTxReqStatus::DoubleSpend,
        ago(6 * DAY_SECS),
        |_| {},
    )
    .await;

    let log = h.monitor.run_task(Purge::NAME).await.unwrap();
    assert!(!log.is_empty());

    assert!(h.storage.find_transaction_by_id(old_failed).await.unwrap().is_none());
    assert!(h.storage.find_transaction_by_id(new_failed).await.unwrap().is_some());
    assert!(h
        .storage
        .find_outputs(old_failed)
        .await
        .unwrap()
        .iter()
        .all(|o| o.output_id != old_output));
    assert!(h
        .storage
        .find_proven_tx_req_by_id(old_req.proven_tx_req_id)
        .await
        .unwrap()
        .is_none());
    // Still owed a notification.
    assert!(h
        .storage
        .find_proven_tx_req_by_id(unnotified.proven_tx_req_id)
        .await
        .unwrap()
        .is_some());
}

struct FixedUtxo {
    answer: GetUtxoStatusResult,
}

#[async_trait]
impl UtxoStatusProvider for FixedUtxo {
    async fn get_utxo_status(&self, _output: &OutputRef) -> GetUtxoStatusResult {
        self.answer.clone()
    }
}

#[tokio::test]
async fn test_utxo_status_skips_failing_provider() {
    let services = Services::new(Chain::Test);
    services.add_utxo_status_provider(
        "down",
        Arc::new(FixedUtxo {
            answer: GetUtxoStatusResult {
                error: Some("timeout".to_string()),
                ..Default::default()
            },
        }),
    );
    services.add_utxo_status_provider(
        "up",
        Arc::new(FixedUtxo {
            answer: GetUtxoStatusResult {
                is_utxo: Some(true),
                details: vec![UtxoDetail {
                    height: Some(800_000),
                    index: 3,
                    satoshis: 1_000,
                }],
                ..Default::default()
            },
        }),
    );
    let output = OutputRef {
        txid: raw_tx("utxo").1,
        vout: 0,
    };

    let r = services.get_utxo_status(&output).await;
    assert_eq!(r.name.as_deref(), Some("up"));
    assert_eq!(r.is_utxo, Some(true));
    assert_eq!(r.details[0].satoshis, 1_000);

    services.remove_provider("up");
    let r = services.get_utxo_status(&output).await;
    assert_eq!(r.name.as_deref(), Some("down"));
    assert_eq!(r.is_utxo, None);
    assert!(r.error.is_some());
}

#[tokio::test]
async fn test_storage_transaction_commits_or_rolls_back_as_a_unit() {
    let h = harness(Services::new(Chain::Test)).await;
    let storage: Arc<dyn WalletStorage> = h.storage.clone();
    let first = insert_local_tx(&h.storage, TransactionStatus::Sending, None, ago(60)).await;
    let second = insert_local_tx(&h.storage, TransactionStatus::Sending, None, ago(60)).await;

    let result = storage.run_in_transaction(&|stx| {
        let mut tx = stx.get_transaction(first)?.expect("first transaction");
        tx.status = TransactionStatus::Completed;
        stx.put_transaction(&tx)?;
        Err(abort_transaction(StorageError::Corrupt("second is bad".to_string())))
    });
    assert!(matches!(result, Err(StorageError::Corrupt(_))));
    let status = |id| {
        let storage = storage.clone();
        async move { storage.find_transaction_by_id(id).await.unwrap().unwrap().status }
    };
    assert_eq!(status(first).await, TransactionStatus::Sending);

    storage
        .run_in_transaction(&|stx| {
            for id in [first, second] {
                let mut tx = stx.get_transaction(id)?.expect("transaction");
                tx.status = TransactionStatus::Completed;
                stx.put_transaction(&tx)?;
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(status(first).await, TransactionStatus::Completed);
    assert_eq!(status(second).await, TransactionStatus::Completed);
}
