// storage_service/src/lib.rs
pub mod entities;
pub mod error;
pub mod provider;
pub mod sled_storage;

pub use entities::{
    EntityIdMap, HistoryNote, MonitorEvent, Output, ProvenTx, ProvenTxReq, ProvenTxReqHistory,
    ProvenTxReqNotify, ProvenTxReqStatus, ProvenTxReqUpdate, Transaction, TransactionStatus,
};
pub use error::StorageError;
pub use provider::{
    FindProvenTxReqsArgs, FindTransactionsArgs, Paged, ProvenTxReqPartial, PurgeResults,
    TransactionFn, WalletStorage,
};
pub use sled_storage::{abort_transaction, SledStorage, StorageTx, TxResult};
