// storage_service/src/entities/transaction.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a wallet's own transaction row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionStatus {
    Completed,
    Failed,
    Unprocessed,
    Sending,
    Unproven,
    Unsigned,
    Nosend,
    Nonfinal,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Unprocessed => "unprocessed",
            TransactionStatus::Sending => "sending",
            TransactionStatus::Unproven => "unproven",
            TransactionStatus::Unsigned => "unsigned",
            TransactionStatus::Nosend => "nosend",
            TransactionStatus::Nonfinal => "nonfinal",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: TransactionStatus,
    pub reference: String,
    pub description: String,
    pub satoshis: i64,
    pub txid: Option<String>,
    pub proven_tx_id: Option<u64>,
    pub raw_tx: Option<Vec<u8>>,
    pub input_beef: Option<Vec<u8>>,
    pub labels: Vec<String>,
}

impl Transaction {
    pub fn new(reference: &str, status: TransactionStatus, now: DateTime<Utc>) -> Self {
        Self {
            transaction_id: 0,
            created_at: now,
            updated_at: now,
            status,
            reference: reference.to_string(),
            description: String::new(),
            satoshis: 0,
            txid: None,
            proven_tx_id: None,
            raw_tx: None,
            input_beef: None,
            labels: Vec::new(),
        }
    }
}

/// Output owned by a wallet transaction. `spent_by` holds the id of the
/// transaction reserving or spending it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub output_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub transaction_id: u64,
    pub vout: u32,
    pub satoshis: u64,
    pub spendable: bool,
    pub spent_by: Option<u64>,
    pub locking_script: Option<Vec<u8>>,
}

impl Output {
    pub fn new(transaction_id: u64, vout: u32, satoshis: u64, now: DateTime<Utc>) -> Self {
        Self {
            output_id: 0,
            created_at: now,
            updated_at: now,
            transaction_id,
            vout,
            satoshis,
            spendable: true,
            spent_by: None,
            locking_script: None,
        }
    }
}
