//! Error types for the escrow engine

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors
///
/// Mutating operations fail atomically: when any of these is returned the
/// entity state is unchanged. Retry policy belongs to the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request (zero amount, zero count, empty passphrase, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Submitted passphrase does not match the stored commitment
    #[error("Invalid password")]
    InvalidPassword,

    /// Caller has already claimed from this red packet
    #[error("Already claimed")]
    AlreadyClaimed,

    /// Caller has already paid into this collection
    #[error("Already paid")]
    AlreadyPaid,

    /// No claim slots remain on the red packet
    #[error("No red packets remaining")]
    Exhausted,

    /// Entity is not in the Active state
    #[error("Not active")]
    NotActive,

    /// Deadline has passed for an active-only action
    #[error("Expired")]
    Expired,

    /// Refund or expiry handling attempted before the deadline
    #[error("Not expired yet")]
    NotExpired,

    /// Refund attempted by someone other than the creator
    #[error("Only creator can refund")]
    Unauthorized,

    /// FixedSplit payment not equal to the per-participant share
    #[error("Wrong amount: expected {expected}, got {got}")]
    WrongAmount {
        /// Exact per-participant share
        expected: u128,
        /// Amount actually submitted
        got: u128,
    },

    /// Red packet id is unassigned
    #[error("Red packet not found: {0}")]
    PacketNotFound(u64),

    /// Collection id is unassigned
    #[error("Collection not found: {0}")]
    CollectionNotFound(u64),

    /// Invariant violation (money conservation, escrow underflow, ...)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

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

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
