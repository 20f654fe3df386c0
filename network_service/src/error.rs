// network_service/src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] bincode::Error),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Unexpected response from {0}")]
    UnexpectedResponse(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MerklePathError {
    #[error("Merkle path truncated at byte {0}")]
    Truncated(usize),
    #[error("Invalid hash: {0}")]
    InvalidHash(String),
    #[error("Invalid leaf flags {0}")]
    InvalidFlags(u8),
    #[error("Merkle path is empty")]
    Empty,
    #[error("Txid {0} is not a leaf of this path")]
    TxidNotFound(String),
    #[error("Missing sibling at level {level} offset {offset}")]
    MissingSibling { level: usize, offset: u64 },
}
