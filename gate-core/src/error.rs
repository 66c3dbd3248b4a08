//! Error types for the gate core

use thiserror::Error;

/// Result type for gate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Gate errors
///
/// None of these are fatal to the process: the engine resolves every one of
/// them to a denied, ledgered state.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A durable write that must precede a state change could not be confirmed
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Ledger hash chain does not verify
    #[error("Ledger chain broken at seq {seq}: {detail}")]
    ChainBroken {
        /// First entry whose link fails
        seq: u64,
        /// What did not match
        detail: String,
    },

    /// Actuator or fetch transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

/// Failure to hand a command or request to the network
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Socket refused the datagram or the send would block
    #[error("send failed: {0}")]
    Send(String),

    /// Fetching an event document failed
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Pointer document did not name a usable resource
    #[error("unresolvable pointer: {0}")]
    Pointer(String),
}
