// storage_service/src/entities/mod.rs
mod monitor_event;
mod proven_tx;
mod proven_tx_req;
mod transaction;

pub use monitor_event::MonitorEvent;
pub use proven_tx::ProvenTx;
pub use proven_tx_req::{
    HistoryNote, ProvenTxReq, ProvenTxReqHistory, ProvenTxReqNotify, ProvenTxReqStatus,
    ProvenTxReqUpdate,
};
pub use transaction::{Output, Transaction, TransactionStatus};

use std::collections::HashMap;

/// Translates ids assigned by a foreign storage replica into local ids.
#[derive(Clone, Debug, Default)]
pub struct EntityIdMap {
    pub proven_tx_ids: HashMap<u64, u64>,
    pub transaction_ids: HashMap<u64, u64>,
}

impl EntityIdMap {
    pub fn map_proven_tx_id(&self, foreign: u64) -> Option<u64> {
        self.proven_tx_ids.get(&foreign).copied()
    }

    pub fn map_transaction_id(&self, foreign: u64) -> Option<u64> {
        self.transaction_ids.get(&foreign).copied()
    }
}
