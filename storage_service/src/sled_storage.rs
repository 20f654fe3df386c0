// storage_service/src/sled_storage.rs
use crate::entities::{
    HistoryNote, MonitorEvent, Output, ProvenTx, ProvenTxReq, ProvenTxReqStatus,
    ProvenTxReqUpdate, Transaction, TransactionStatus,
};
use crate::error::StorageError;
use crate::provider::{
    FindProvenTxReqsArgs, FindTransactionsArgs, Paged, ProvenTxReqPartial, PurgeResults,
    TransactionFn, WalletStorage,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::PurgeSettings;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use tracing::{debug, info};

/// Result of one step inside a storage transaction.
pub type TxResult<T> = ConflictableTransactionResult<T, StorageError>;

fn id_key(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

fn decode_id(bytes: &[u8]) -> Result<u64, StorageError> {
    let raw = <[u8; 8]>::try_from(bytes)
        .map_err(|_| StorageError::Corrupt(format!("id key of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Aborts the surrounding transaction with `e`, rolling back its writes.
pub fn abort_transaction(e: StorageError) -> ConflictableTransactionError<StorageError> {
    ConflictableTransactionError::Abort(e)
}

fn scan<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, StorageError> {
    let mut values = Vec::new();
    for res in tree.iter().values() {
        values.push(decode(&res?)?);
    }
    Ok(values)
}

fn page<T>(values: Vec<T>, paged: Option<Paged>) -> Vec<T> {
    match paged {
        Some(Paged { limit, offset }) => values.into_iter().skip(offset).take(limit).collect(),
        None => values,
    }
}

/// Typed view over the trees taking part in one sled transaction.
pub struct StorageTx<'a> {
    reqs: &'a TransactionalTree,
    req_txids: &'a TransactionalTree,
    proven_txs: &'a TransactionalTree,
    proven_txids: &'a TransactionalTree,
    transactions: &'a TransactionalTree,
    outputs: &'a TransactionalTree,
}

impl<'a> StorageTx<'a> {
    fn get<T: DeserializeOwned>(tree: &TransactionalTree, id: u64) -> TxResult<Option<T>> {
        match tree.get(id_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes).map_err(abort_transaction)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(tree: &TransactionalTree, id: u64, value: &T) -> TxResult<()> {
        tree.insert(id_key(id), encode(value).map_err(abort_transaction)?)?;
        Ok(())
    }

    pub fn get_req(&self, id: u64) -> TxResult<Option<ProvenTxReq>> {
        Self::get(self.reqs, id)
    }

    pub fn find_req_id_by_txid(&self, txid: &str) -> TxResult<Option<u64>> {
        match self.req_txids.get(txid.as_bytes())? {
            Some(bytes) => Ok(Some(decode_id(&bytes).map_err(abort_transaction)?)),
            None => Ok(None),
        }
    }

    pub fn put_req(&self, req: &ProvenTxReq) -> TxResult<()> {
        Self::put(self.reqs, req.proven_tx_req_id, req)?;
        self.req_txids
            .insert(req.txid.as_bytes().to_vec(), id_key(req.proven_tx_req_id))?;
        Ok(())
    }

    pub fn remove_req(&self, req: &ProvenTxReq) -> TxResult<()> {
        self.reqs.remove(id_key(req.proven_tx_req_id))?;
        self.req_txids.remove(req.txid.as_bytes().to_vec())?;
        Ok(())
    }

    pub fn find_proven_tx_by_txid(&self, txid: &str) -> TxResult<Option<ProvenTx>> {
        match self.proven_txids.get(txid.as_bytes())? {
            Some(bytes) => {
                let id = decode_id(&bytes).map_err(abort_transaction)?;
                Self::get(self.proven_txs, id)
            }
            None => Ok(None),
        }
    }

    pub fn put_proven_tx(&self, proven_tx: &ProvenTx) -> TxResult<()> {
        Self::put(self.proven_txs, proven_tx.proven_tx_id, proven_tx)?;
        self.proven_txids.insert(
            proven_tx.txid.as_bytes().to_vec(),
            id_key(proven_tx.proven_tx_id),
        )?;
        Ok(())
    }

    pub fn get_transaction(&self, id: u64) -> TxResult<Option<Transaction>> {
        Self::get(self.transactions, id)
    }

    pub fn put_transaction(&self, tx: &Transaction) -> TxResult<()> {
        Self::put(self.transactions, tx.transaction_id, tx)
    }

    pub fn remove_transaction(&self, id: u64) -> TxResult<()> {
        self.transactions.remove(id_key(id))?;
        Ok(())
    }

    pub fn put_output(&self, output: &Output) -> TxResult<()> {
        Self::put(self.outputs, output.output_id, output)
    }

    pub fn remove_output(&self, id: u64) -> TxResult<()> {
        self.outputs.remove(id_key(id))?;
        Ok(())
    }
}

pub struct SledStorage {
    db: Db,
    reqs: Tree,
    req_txids: Tree,
    proven_txs: Tree,
    proven_txids: Tree,
    transactions: Tree,
    outputs: Tree,
    events: Tree,
}

impl SledStorage {
    pub fn open(db_path: &str) -> Result<Self, StorageError> {
        let db = sled::open(db_path)?;
        info!("Opened wallet storage at {}", db_path);
        Self::from_db(db)
    }

    /// Storage deleted on drop, for tests and dry runs.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        Ok(Self {
            reqs: db.open_tree("proven_tx_reqs")?,
            req_txids: db.open_tree("proven_tx_reqs_by_txid")?,
            proven_txs: db.open_tree("proven_txs")?,
            proven_txids: db.open_tree("proven_txs_by_txid")?,
            transactions: db.open_tree("transactions")?,
            outputs: db.open_tree("outputs")?,
            events: db.open_tree("monitor_events")?,
            db,
        })
    }

    fn next_id(&self) -> Result<u64, StorageError> {
        Ok(self.db.generate_id()? + 1)
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Runs `f` atomically across every entity tree. `f` may be retried on
    /// conflict so it must not have side effects outside the transaction.
    pub fn run_in_transaction<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: Fn(&StorageTx<'_>) -> TxResult<T>,
    {
        (
            &self.reqs,
            &self.req_txids,
            &self.proven_txs,
            &self.proven_txids,
            &self.transactions,
            &self.outputs,
        )
            .transaction(
                |(reqs, req_txids, proven_txs, proven_txids, transactions, outputs)| {
                    let tx = StorageTx {
                        reqs,
                        req_txids,
                        proven_txs,
                        proven_txids,
                        transactions,
                        outputs,
                    };
                    f(&tx)
                },
            )
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => StorageError::Sled(e),
            })
    }

    fn outputs_where(&self, pred: impl Fn(&Output) -> bool) -> Result<Vec<Output>, StorageError> {
        Ok(scan::<Output>(&self.outputs)?.into_iter().filter(|o| pred(o)).collect())
    }

    /// Deletes a transaction with its outputs, returning the inputs it
    /// reserved to spendable.
    fn purge_transaction(&self, tx: &Transaction, now: DateTime<Utc>) -> Result<(), StorageError> {
        let id = tx.transaction_id;
        let owned = self.outputs_where(|o| o.transaction_id == id)?;
        let reserved = self.outputs_where(|o| o.spent_by == Some(id) && o.transaction_id != id)?;
        self.run_in_transaction(|stx| {
            for output in &owned {
                stx.remove_output(output.output_id)?;
            }
            for output in &reserved {
                let mut output = output.clone();
                output.spent_by = None;
                output.spendable = true;
                output.updated_at = now;
                stx.put_output(&output)?;
            }
            stx.remove_transaction(id)
        })
    }

    fn delete_reqs(&self, reqs: &[ProvenTxReq]) -> Result<usize, StorageError> {
        self.run_in_transaction(|stx| {
            for req in reqs {
                stx.remove_req(req)?;
            }
            Ok(reqs.len())
        })
    }
}

#[async_trait]
impl WalletStorage for SledStorage {
    fn run_in_transaction(&self, f: &TransactionFn<'_>) -> Result<(), StorageError> {
        SledStorage::run_in_transaction(self, f)
    }

    async fn find_proven_tx_reqs(
        &self,
        args: &FindProvenTxReqsArgs,
    ) -> Result<Vec<ProvenTxReq>, StorageError> {
        if let Some(txid) = &args.partial.txid {
            let found = match self.req_txids.get(txid.as_bytes())? {
                Some(bytes) => self.find_proven_tx_req_by_id(decode_id(&bytes)?).await?,
                None => None,
            };
            let matched: Vec<ProvenTxReq> = found.into_iter().filter(|r| args.matches(r)).collect();
            return Ok(page(matched, args.paged));
        }
        let matched: Vec<ProvenTxReq> = scan::<ProvenTxReq>(&self.reqs)?
            .into_iter()
            .filter(|r| args.matches(r))
            .collect();
        Ok(page(matched, args.paged))
    }

    async fn find_proven_tx_req_by_id(&self, id: u64) -> Result<Option<ProvenTxReq>, StorageError> {
        match self.reqs.get(id_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn insert_proven_tx_req(&self, req: &ProvenTxReq) -> Result<u64, StorageError> {
        let id = self.next_id()?;
        let mut req = req.clone();
        req.proven_tx_req_id = id;
        self.run_in_transaction(|stx| {
            if stx.find_req_id_by_txid(&req.txid)?.is_some() {
                return Err(abort_transaction(StorageError::Duplicate(format!(
                    "proven tx req for {}",
                    req.txid
                ))));
            }
            stx.put_req(&req)
        })?;
        debug!("Inserted proven tx req {} for {}", id, req.txid);
        Ok(id)
    }

    async fn update_proven_tx_req(
        &self,
        id: u64,
        update: &ProvenTxReqUpdate,
    ) -> Result<usize, StorageError> {
        self.run_in_transaction(|stx| match stx.get_req(id)? {
            Some(mut req) => {
                update.apply(&mut req);
                stx.put_req(&req)?;
                Ok(1)
            }
            None => Ok(0),
        })
    }

    async fn update_proven_tx_req_with_new_proven_tx(
        &self,
        req: &ProvenTxReq,
        proven_tx: &ProvenTx,
        now: DateTime<Utc>,
    ) -> Result<ProvenTxReq, StorageError> {
        let new_id = self.next_id()?;
        self.run_in_transaction(|stx| {
            if stx.get_req(req.proven_tx_req_id)?.is_none() {
                return Err(abort_transaction(StorageError::NotFound(format!(
                    "proven tx req {}",
                    req.proven_tx_req_id
                ))));
            }
            let proven = match stx.find_proven_tx_by_txid(&proven_tx.txid)? {
                Some(existing) => existing,
                None => {
                    let mut inserted = proven_tx.clone();
                    inserted.proven_tx_id = new_id;
                    stx.put_proven_tx(&inserted)?;
                    inserted
                }
            };
            let mut updated = req.clone();
            updated.proven_tx_id = Some(proven.proven_tx_id);
            updated.history_note(
                HistoryNote::new("provenTx")
                    .attr("proven_tx_id", proven.proven_tx_id)
                    .attr("height", proven.height),
                now,
            );
            updated.set_status(ProvenTxReqStatus::Completed, now);
            updated.notified = false;
            updated.updated_at = now;
            stx.put_req(&updated)?;
            Ok(updated)
        })
    }

    async fn find_or_insert_proven_tx(
        &self,
        proven_tx: &ProvenTx,
    ) -> Result<(ProvenTx, bool), StorageError> {
        let new_id = self.next_id()?;
        self.run_in_transaction(|stx| match stx.find_proven_tx_by_txid(&proven_tx.txid)? {
            Some(existing) => Ok((existing, false)),
            None => {
                let mut inserted = proven_tx.clone();
                inserted.proven_tx_id = new_id;
                stx.put_proven_tx(&inserted)?;
                Ok((inserted, true))
            }
        })
    }

    async fn find_proven_tx_by_txid(&self, txid: &str) -> Result<Option<ProvenTx>, StorageError> {
        let id = match self.proven_txids.get(txid.as_bytes())? {
            Some(bytes) => decode_id(&bytes)?,
            None => return Ok(None),
        };
        match self.proven_txs.get(id_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<u64, StorageError> {
        let id = self.next_id()?;
        let mut tx = tx.clone();
        tx.transaction_id = id;
        self.transactions.insert(id_key(id), encode(&tx)?)?;
        Ok(id)
    }

    async fn find_transaction_by_id(&self, id: u64) -> Result<Option<Transaction>, StorageError> {
        match self.transactions.get(id_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_transactions(
        &self,
        args: &FindTransactionsArgs,
    ) -> Result<Vec<Transaction>, StorageError> {
        let matched: Vec<Transaction> = scan::<Transaction>(&self.transactions)?
            .into_iter()
            .filter(|t| args.matches(t))
            .collect();
        Ok(page(matched, args.paged))
    }

    async fn update_transaction_status(
        &self,
        status: TransactionStatus,
        transaction_id: u64,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let reserved = if status == TransactionStatus::Failed {
            self.outputs_where(|o| o.spent_by == Some(transaction_id))?
        } else {
            Vec::new()
        };
        self.run_in_transaction(|stx| {
            let mut tx = match stx.get_transaction(transaction_id)? {
                Some(tx) => tx,
                None => return Ok(0),
            };
            tx.status = status;
            tx.updated_at = now;
            stx.put_transaction(&tx)?;
            for output in &reserved {
                let mut output = output.clone();
                output.spent_by = None;
                output.spendable = true;
                output.updated_at = now;
                stx.put_output(&output)?;
            }
            Ok(1)
        })
    }

    async fn set_transaction_proven_tx_id(
        &self,
        transaction_id: u64,
        proven_tx_id: u64,
        now: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        self.run_in_transaction(|stx| match stx.get_transaction(transaction_id)? {
            Some(mut tx) => {
                tx.proven_tx_id = Some(proven_tx_id);
                tx.updated_at = now;
                stx.put_transaction(&tx)?;
                Ok(1)
            }
            None => Ok(0),
        })
    }

    async fn insert_output(&self, output: &Output) -> Result<u64, StorageError> {
        let id = self.next_id()?;
        let mut output = output.clone();
        output.output_id = id;
        self.outputs.insert(id_key(id), encode(&output)?)?;
        Ok(id)
    }

    async fn find_outputs(&self, transaction_id: u64) -> Result<Vec<Output>, StorageError> {
        self.outputs_where(|o| o.transaction_id == transaction_id)
    }

    async fn insert_monitor_event(&self, event: &MonitorEvent) -> Result<u64, StorageError> {
        let id = self.next_id()?;
        let mut event = event.clone();
        event.id = id;
        self.events.insert(id_key(id), encode(&event)?)?;
        Ok(id)
    }

    async fn find_monitor_events(&self, limit: usize) -> Result<Vec<MonitorEvent>, StorageError> {
        let mut events = Vec::new();
        for res in self.events.iter().values().rev().take(limit) {
            events.push(decode(&res?)?);
        }
        Ok(events)
    }

    async fn purge_data(
        &self,
        params: &PurgeSettings,
        now: DateTime<Utc>,
    ) -> Result<PurgeResults, StorageError> {
        let mut results = PurgeResults::default();

        if params.purge_failed {
            let cutoff = now - Duration::milliseconds(params.purge_failed_age_msecs);
            let failed = self
                .find_transactions(&FindTransactionsArgs {
                    statuses: vec![TransactionStatus::Failed],
                    updated_before: Some(cutoff),
                    ..Default::default()
                })
                .await?;
            for tx in &failed {
                self.purge_transaction(tx, now)?;
            }
            let reqs = self
                .find_proven_tx_reqs(&FindProvenTxReqsArgs {
                    statuses: vec![ProvenTxReqStatus::Invalid, ProvenTxReqStatus::DoubleSpend],
                    partial: ProvenTxReqPartial {
                        notified: Some(true),
                        ..Default::default()
                    },
                    updated_before: Some(cutoff),
                    paged: None,
                })
                .await?;
            let deleted = self.delete_reqs(&reqs)?;
            if !failed.is_empty() || deleted > 0 {
                results.log.push_str(&format!(
                    "{} failed transactions and {} failed proof requests purged\n",
                    failed.len(),
                    deleted
                ));
            }
            results.count += failed.len() + deleted;
        }

        if params.purge_completed {
            let cutoff = now - Duration::milliseconds(params.purge_completed_age_msecs);
            let completed = self
                .find_transactions(&FindTransactionsArgs {
                    statuses: vec![TransactionStatus::Completed],
                    updated_before: Some(cutoff),
                    ..Default::default()
                })
                .await?;
            let stale: Vec<Transaction> = completed
                .into_iter()
                .filter(|t| t.proven_tx_id.is_some() && (t.raw_tx.is_some() || t.input_beef.is_some()))
                .collect();
            self.run_in_transaction(|stx| {
                for tx in &stale {
                    let mut tx = tx.clone();
                    tx.raw_tx = None;
                    tx.input_beef = None;
                    stx.put_transaction(&tx)?;
                }
                Ok(())
            })?;
            let reqs = self
                .find_proven_tx_reqs(&FindProvenTxReqsArgs {
                    statuses: vec![ProvenTxReqStatus::Completed],
                    partial: ProvenTxReqPartial {
                        notified: Some(true),
                        ..Default::default()
                    },
                    updated_before: Some(cutoff),
                    paged: None,
                })
                .await?;
            let deleted = self.delete_reqs(&reqs)?;
            if !stale.is_empty() || deleted > 0 {
                results.log.push_str(&format!(
                    "{} completed transactions cleared and {} completed proof requests purged\n",
                    stale.len(),
                    deleted
                ));
            }
            results.count += stale.len() + deleted;
        }

        if params.purge_spent {
            let cutoff = now - Duration::milliseconds(params.purge_spent_age_msecs);
            let mut spent = Vec::new();
            for output in self.outputs_where(|o| !o.spendable && o.locking_script.is_some())? {
                let Some(spender) = output.spent_by else { continue };
                if let Some(tx) = self.find_transaction_by_id(spender).await? {
                    if tx.status == TransactionStatus::Completed && tx.updated_at < cutoff {
                        spent.push(output);
                    }
                }
            }
            self.run_in_transaction(|stx| {
                for output in &spent {
                    let mut output = output.clone();
                    output.locking_script = None;
                    stx.put_output(&output)?;
                }
                Ok(())
            })?;
            if !spent.is_empty() {
                results
                    .log
                    .push_str(&format!("{} spent outputs cleared\n", spent.len()));
            }
            results.count += spent.len();
        }

        if results.count > 0 {
            info!("Purged {} records", results.count);
        }
        Ok(results)
    }
}
