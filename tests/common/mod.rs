// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use galaxy_wallet::monitor_service::Monitor;
use galaxy_wallet::network_service::{
    txid_for_raw_tx, BlockHeader, ChainTracker, GetMerklePathResult, GetRawTxResult, MerklePath,
    MerklePathProvider, PostBeefProvider, PostBeefResult, PostTxResultForTxid, PostTxStatus,
    ProviderError, RawTxProvider, Services, TxBundle,
};
use galaxy_wallet::shared::{Chain, MonitorConfig};
use galaxy_wallet::storage_service::{
    ProvenTxReq, ProvenTxReqStatus, SledStorage, Transaction, TransactionStatus, WalletStorage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn raw_tx(seed: &str) -> (Vec<u8>, String) {
    let raw = format!("raw-tx-{}", seed).into_bytes();
    let txid = txid_for_raw_tx(&raw);
    (raw, txid)
}

pub fn ago(secs: i64) -> DateTime<Utc> {
    Utc::now() - Duration::seconds(secs)
}

/// A block holding `txids` in order, with a header committing to them.
pub struct MinedBlock {
    pub header: BlockHeader,
    pub txids: Vec<String>,
}

impl MinedBlock {
    pub fn new(height: u32, txids: Vec<String>) -> Self {
        let (_, merkle_root) = MerklePath::from_block_txids(height, &txids, &txids[0]).unwrap();
        let header = BlockHeader {
            height,
            hash: txid_for_raw_tx(format!("block-{}-{}", height, merkle_root).as_bytes()),
            previous_hash: txid_for_raw_tx(format!("block-{}", height - 1).as_bytes()),
            merkle_root,
            time: 1_700_000_000 + height,
        };
        Self { header, txids }
    }

    pub fn proof(&self, txid: &str) -> GetMerklePathResult {
        let (path, _) = MerklePath::from_block_txids(self.header.height, &self.txids, txid).unwrap();
        GetMerklePathResult {
            name: None,
            merkle_path: Some(path.to_bytes()),
            header: Some(self.header.clone()),
            error: None,
        }
    }
}

#[derive(Default)]
pub struct MockMerklePath {
    results: Mutex<HashMap<String, GetMerklePathResult>>,
    fail_with: Option<String>,
    pub calls: AtomicUsize,
}

impl MockMerklePath {
    pub fn failing(error: &str) -> Self {
        Self {
            fail_with: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn with_result(self, txid: &str, result: GetMerklePathResult) -> Self {
        self.results.lock().unwrap().insert(txid.to_string(), result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MerklePathProvider for MockMerklePath {
    async fn get_merkle_path(&self, txid: &str) -> GetMerklePathResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.fail_with {
            return GetMerklePathResult {
                error: Some(error.clone()),
                ..Default::default()
            };
        }
        self.results
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Default)]
pub struct MockRawTx {
    raw_txs: HashMap<String, Vec<u8>>,
}

impl MockRawTx {
    pub fn with_raw_tx(mut self, txid: &str, raw_tx: Vec<u8>) -> Self {
        self.raw_txs.insert(txid.to_string(), raw_tx);
        self
    }
}

#[async_trait]
impl RawTxProvider for MockRawTx {
    async fn get_raw_tx(&self, txid: &str) -> GetRawTxResult {
        GetRawTxResult {
            txid: txid.to_string(),
            name: None,
            raw_tx: self.raw_txs.get(txid).cloned(),
            error: None,
        }
    }
}

/// Answers every submission with a fixed status per txid; `Unknown` for
/// txids it was not told about.
#[derive(Default)]
pub struct MockPostBeef {
    statuses: HashMap<String, PostTxStatus>,
    pub calls: AtomicUsize,
    pub posted: Mutex<Vec<Vec<String>>>,
}

impl MockPostBeef {
    pub fn with_status(mut self, txid: &str, status: PostTxStatus) -> Self {
        self.statuses.insert(txid.to_string(), status);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostBeefProvider for MockPostBeef {
    async fn post_beef(&self, bundle: &TxBundle, txids: &[String]) -> PostBeefResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.posted.lock().unwrap().push(bundle.txids());
        let txid_results = txids
            .iter()
            .map(|txid| {
                let status = self
                    .statuses
                    .get(txid)
                    .copied()
                    .unwrap_or(PostTxStatus::Unknown);
                let mut r = PostTxResultForTxid::new(txid, status);
                if status == PostTxStatus::DoubleSpend {
                    r.competing_txs.push(raw_tx("competing").1);
                }
                r
            })
            .collect();
        PostBeefResult {
            name: "mock".to_string(),
            txid_results,
            error: None,
        }
    }
}

#[derive(Default)]
pub struct MockChainTracker {
    headers: Mutex<Vec<BlockHeader>>,
}

impl MockChainTracker {
    pub fn new(headers: Vec<BlockHeader>) -> Self {
        Self {
            headers: Mutex::new(headers),
        }
    }

    pub fn push(&self, header: BlockHeader) {
        self.headers.lock().unwrap().push(header);
    }
}

#[async_trait]
impl ChainTracker for MockChainTracker {
    async fn is_valid_root_for_height(
        &self,
        root: &str,
        height: u32,
    ) -> Result<bool, ProviderError> {
        Ok(self
            .headers
            .lock()
            .unwrap()
            .iter()
            .any(|h| h.height == height && h.merkle_root == root))
    }

    async fn current_height(&self) -> Result<u32, ProviderError> {
        self.headers
            .lock()
            .unwrap()
            .iter()
            .map(|h| h.height)
            .max()
            .ok_or_else(|| ProviderError::Provider("no headers".to_string()))
    }

    async fn find_header_for_height(
        &self,
        height: u32,
    ) -> Result<Option<BlockHeader>, ProviderError> {
        Ok(self
            .headers
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|h| h.height == height)
            .cloned())
    }

    async fn find_header_by_hash(&self, hash: &str) -> Result<Option<BlockHeader>, ProviderError> {
        Ok(self
            .headers
            .lock()
            .unwrap()
            .iter()
            .find(|h| h.hash == hash)
            .cloned())
    }
}

pub fn test_config() -> MonitorConfig {
    MonitorConfig {
        chain: Chain::Test,
        ..Default::default()
    }
}

pub struct Harness {
    pub storage: Arc<SledStorage>,
    pub monitor: Arc<Monitor>,
}

pub async fn harness_with(services: Services, config: MonitorConfig) -> Harness {
    let storage = Arc::new(SledStorage::temporary().unwrap());
    let monitor = Monitor::new(storage.clone(), Arc::new(services), config).unwrap();
    Harness {
        storage,
        monitor: Arc::new(monitor),
    }
}

pub async fn harness(services: Services) -> Harness {
    let h = harness_with(services, test_config()).await;
    h.monitor.add_default_tasks().await.unwrap();
    h
}

pub async fn insert_local_tx(
    storage: &SledStorage,
    status: TransactionStatus,
    txid: Option<&str>,
    when: DateTime<Utc>,
) -> u64 {
    let mut tx = Transaction::new("reference", status, when);
    tx.txid = txid.map(str::to_string);
    storage.insert_transaction(&tx).await.unwrap()
}

/// Inserts a Proof Record last touched at `when`, after `tweak` adjusts it.
pub async fn insert_req(
    storage: &SledStorage,
    txid: &str,
    raw_tx: Vec<u8>,
    status: ProvenTxReqStatus,
    when: DateTime<Utc>,
    tweak: impl FnOnce(&mut ProvenTxReq),
) -> ProvenTxReq {
    let mut req = ProvenTxReq::new(txid, raw_tx, status, when);
    tweak(&mut req);
    let id = storage.insert_proven_tx_req(&req).await.unwrap();
    storage.find_proven_tx_req_by_id(id).await.unwrap().unwrap()
}

pub async fn reload(storage: &SledStorage, req: &ProvenTxReq) -> ProvenTxReq {
    storage
        .find_proven_tx_req_by_id(req.proven_tx_req_id)
        .await
        .unwrap()
        .unwrap()
}
