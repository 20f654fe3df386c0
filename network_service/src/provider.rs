// network_service/src/provider.rs
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u32,
    pub hash: String,
    pub previous_hash: String,
    pub merkle_root: String,
    pub time: u32,
}

/// Outcome of asking one or more providers for a merkle path. All `None`
/// means no provider was available to ask.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetMerklePathResult {
    pub name: Option<String>,
    pub merkle_path: Option<Vec<u8>>,
    pub header: Option<BlockHeader>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRawTxResult {
    pub txid: String,
    pub name: Option<String>,
    pub raw_tx: Option<Vec<u8>>,
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostTxStatus {
    Success,
    DoubleSpend,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostTxResultForTxid {
    pub txid: String,
    pub status: PostTxStatus,
    pub competing_txs: Vec<String>,
    pub error: Option<String>,
}

impl PostTxResultForTxid {
    pub fn new(txid: &str, status: PostTxStatus) -> Self {
        Self {
            txid: txid.to_string(),
            status,
            competing_txs: Vec::new(),
            error: None,
        }
    }
}

/// One provider's answer to a bundle submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostBeefResult {
    pub name: String,
    pub txid_results: Vec<PostTxResultForTxid>,
    pub error: Option<String>,
}

impl PostBeefResult {
    pub fn failed(name: &str, txids: &[String], error: String) -> Self {
        Self {
            name: name.to_string(),
            txid_results: txids
                .iter()
                .map(|txid| PostTxResultForTxid {
                    error: Some(error.clone()),
                    ..PostTxResultForTxid::new(txid, PostTxStatus::Unknown)
                })
                .collect(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && self
                .txid_results
                .iter()
                .all(|r| r.status == PostTxStatus::Success)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleTx {
    pub txid: String,
    pub raw_tx: Vec<u8>,
}

/// Transactions submitted together, with the ancestry each one needs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxBundle {
    pub txs: Vec<BundleTx>,
    pub input_beefs: Vec<Vec<u8>>,
}

impl TxBundle {
    pub fn add(&mut self, txid: &str, raw_tx: Vec<u8>, input_beef: Option<Vec<u8>>) {
        if self.txs.iter().any(|tx| tx.txid == txid) {
            return;
        }
        self.txs.push(BundleTx {
            txid: txid.to_string(),
            raw_tx,
        });
        if let Some(beef) = input_beef {
            if !self.input_beefs.contains(&beef) {
                self.input_beefs.push(beef);
            }
        }
    }

    pub fn txids(&self) -> Vec<String> {
        self.txs.iter().map(|tx| tx.txid.clone()).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub txid: String,
    pub vout: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoDetail {
    pub height: Option<u32>,
    pub index: u32,
    pub satoshis: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetUtxoStatusResult {
    pub name: Option<String>,
    pub is_utxo: Option<bool>,
    pub details: Vec<UtxoDetail>,
    pub error: Option<String>,
}

#[async_trait]
pub trait MerklePathProvider: Send + Sync {
    async fn get_merkle_path(&self, txid: &str) -> GetMerklePathResult;
}

#[async_trait]
pub trait RawTxProvider: Send + Sync {
    async fn get_raw_tx(&self, txid: &str) -> GetRawTxResult;
}

#[async_trait]
pub trait PostBeefProvider: Send + Sync {
    async fn post_beef(&self, bundle: &TxBundle, txids: &[String]) -> PostBeefResult;
}

#[async_trait]
pub trait UtxoStatusProvider: Send + Sync {
    async fn get_utxo_status(&self, output: &OutputRef) -> GetUtxoStatusResult;
}

/// Source of trusted block headers.
#[async_trait]
pub trait ChainTracker: Send + Sync {
    async fn is_valid_root_for_height(&self, root: &str, height: u32)
        -> Result<bool, ProviderError>;

    async fn current_height(&self) -> Result<u32, ProviderError>;

    async fn find_header_for_height(&self, height: u32)
        -> Result<Option<BlockHeader>, ProviderError>;

    async fn find_header_by_hash(&self, hash: &str) -> Result<Option<BlockHeader>, ProviderError>;
}
