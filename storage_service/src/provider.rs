// storage_service/src/provider.rs
use crate::entities::{
    MonitorEvent, Output, ProvenTx, ProvenTxReq, ProvenTxReqStatus, ProvenTxReqUpdate,
    Transaction, TransactionStatus,
};
use crate::error::StorageError;
use crate::sled_storage::{StorageTx, TxResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::PurgeSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Paged {
    pub limit: usize,
    pub offset: usize,
}

/// Equality filters on Proof Record fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvenTxReqPartial {
    pub txid: Option<String>,
    pub batch: Option<String>,
    pub notified: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct FindProvenTxReqsArgs {
    /// Empty matches every status.
    pub statuses: Vec<ProvenTxReqStatus>,
    pub partial: ProvenTxReqPartial,
    pub updated_before: Option<DateTime<Utc>>,
    pub paged: Option<Paged>,
}

impl FindProvenTxReqsArgs {
    pub fn with_statuses(statuses: &[ProvenTxReqStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Default::default()
        }
    }

    pub fn matches(&self, req: &ProvenTxReq) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&req.status) {
            return false;
        }
        if let Some(txid) = &self.partial.txid {
            if &req.txid != txid {
                return false;
            }
        }
        if let Some(batch) = &self.partial.batch {
            if req.batch.as_ref() != Some(batch) {
                return false;
            }
        }
        if let Some(notified) = self.partial.notified {
            if req.notified != notified {
                return false;
            }
        }
        if let Some(before) = self.updated_before {
            if req.updated_at >= before {
                return false;
            }
        }
        true
    }
}

#[derive(Clone, Debug, Default)]
pub struct FindTransactionsArgs {
    /// Empty matches every status.
    pub statuses: Vec<TransactionStatus>,
    pub txid: Option<String>,
    pub updated_before: Option<DateTime<Utc>>,
    pub paged: Option<Paged>,
}

impl FindTransactionsArgs {
    pub fn matches(&self, tx: &Transaction) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&tx.status) {
            return false;
        }
        if let Some(txid) = &self.txid {
            if tx.txid.as_ref() != Some(txid) {
                return false;
            }
        }
        if let Some(before) = self.updated_before {
            if tx.updated_at >= before {
                return false;
            }
        }
        true
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PurgeResults {
    pub count: usize,
    pub log: String,
}

/// Unit of work run atomically by `WalletStorage::run_in_transaction`. It may
/// be retried on conflict.
pub type TransactionFn<'a> = dyn Fn(&StorageTx<'_>) -> TxResult<()> + Send + Sync + 'a;

/// Storage operations the monitor depends on.
#[async_trait]
pub trait WalletStorage: Send + Sync {
    /// Runs `f` as one atomic unit: every write it makes lands, or none does.
    fn run_in_transaction(&self, f: &TransactionFn<'_>) -> Result<(), StorageError>;

    async fn find_proven_tx_reqs(
        &self,
        args: &FindProvenTxReqsArgs,
    ) -> Result<Vec<ProvenTxReq>, StorageError>;

    async fn find_proven_tx_req_by_id(&self, id: u64) -> Result<Option<ProvenTxReq>, StorageError>;

    async fn insert_proven_tx_req(&self, req: &ProvenTxReq) -> Result<u64, StorageError>;

    /// Returns the number of rows changed (0 or 1).
    async fn update_proven_tx_req(
        &self,
        id: u64,
        update: &ProvenTxReqUpdate,
    ) -> Result<usize, StorageError>;

    /// Atomically finds or inserts `proven_tx`, links the Proof Record to it
    /// and marks the record completed. Returns the updated record.
    async fn update_proven_tx_req_with_new_proven_tx(
        &self,
        req: &ProvenTxReq,
        proven_tx: &ProvenTx,
        now: DateTime<Utc>,
    ) -> Result<ProvenTxReq, StorageError>;

    async fn find_or_insert_proven_tx(
        &self,
        proven_tx: &ProvenTx,
    ) -> Result<(ProvenTx, bool), StorageError>;

    async fn find_proven_tx_by_txid(&self, txid: &str) -> Result<Option<ProvenTx>, StorageError>;

    async fn insert_transaction(&self, tx: &Transaction) -> Result<u64, StorageError>;

    async fn find_transaction_by_id(&self, id: u64) -> Result<Option<Transaction>, StorageError>;

    async fn find_transactions(
        &self,
        args: &FindTransactionsArgs,
    ) -> Result<Vec<Transaction>, StorageError>;

    /// Moving to `failed` releases every output reserved by the transaction.
    async fn update_transaction_status(
        &self,
        status: TransactionStatus,
        transaction_id: u64,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError>;

    async fn update_transactions_status(
        &self,
        status: TransactionStatus,
        transaction_ids: &[u64],
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let mut count = 0;
        for id in transaction_ids {
            count += self.update_transaction_status(status, *id, now).await?;
        }
        Ok(count)
    }

    async fn set_transaction_proven_tx_id(
        &self,
        transaction_id: u64,
        proven_tx_id: u64,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError>;

    async fn insert_output(&self, output: &Output) -> Result<u64, StorageError>;

    async fn find_outputs(&self, transaction_id: u64) -> Result<Vec<Output>, StorageError>;

    async fn insert_monitor_event(&self, event: &MonitorEvent) -> Result<u64, StorageError>;

    /// Most recent first.
    async fn find_monitor_events(&self, limit: usize) -> Result<Vec<MonitorEvent>, StorageError>;

    async fn purge_data(
        &self,
        params: &PurgeSettings,
        now: DateTime<Utc>,
    ) -> Result<PurgeResults, StorageError>;
}
