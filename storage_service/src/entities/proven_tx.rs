// storage_service/src/entities/proven_tx.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accepted merkle proof for a txid. Never updated once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenTx {
    pub proven_tx_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub txid: String,
    pub height: u32,
    pub index: u64,
    /// Binary encoded merkle path.
    pub merkle_path: Vec<u8>,
    pub raw_tx: Vec<u8>,
    pub block_hash: String,
    pub merkle_root: String,
}
