// network_service/src/lib.rs
pub mod collection;
pub mod error;
pub mod merkle_path;
pub mod provider;
pub mod services;
pub mod tcp;
pub mod txid;

pub use collection::{ServiceCollection, ServiceEntry};
pub use error::{MerklePathError, ProviderError};
pub use merkle_path::{MerklePath, MerklePathLeaf};
pub use provider::{
    BlockHeader, BundleTx, ChainTracker, GetMerklePathResult, GetRawTxResult,
    GetUtxoStatusResult, MerklePathProvider, OutputRef, PostBeefProvider, PostBeefResult,
    PostTxResultForTxid, PostTxStatus, RawTxProvider, TxBundle, UtxoDetail, UtxoStatusProvider,
};
pub use services::Services;
pub use tcp::TcpProvider;
pub use txid::{txid_for_raw_tx, verify_txid};
