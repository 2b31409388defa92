//! Error types for shardcache

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Routing Errors ===
    #[error("Hash ring is empty: no shards configured")]
    EmptyRing,

    #[error("Shard not found: {0}")]
    ShardNotFound(usize),

    // === Shard Errors ===
    #[error("Shard {shard} is mid-failover, retry after {retry_after_ms} ms")]
    NodeInFailover { shard: usize, retry_after_ms: u64 },

    #[error("Shard {shard} unavailable: primary and replica both failed ({detail})")]
    NodeUnavailable { shard: usize, detail: String },

    #[error("Failover failed on shard {shard}: {reason}")]
    FailoverFailed { shard: usize, reason: String },

    // === Wire Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Shard error reply: {0}")]
    ErrorReply(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::NodeInFailover { .. }
        )
    }

    /// Short machine-readable kind, for front-ends mapping errors to responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::EmptyRing => "EMPTY_RING",
            Error::NodeInFailover { .. } => "NODE_IN_FAILOVER",
            Error::NodeUnavailable { .. } => "NODE_UNAVAILABLE",
            Error::FailoverFailed { .. } => "FAILOVER_FAILED",
            Error::InvalidConfig(_) => "CONFIG_ERROR",
            Error::Timeout(_) => "TIMEOUT",
            Error::ConnectionFailed(_) => "CONNECTION_FAILED",
            Error::Protocol(_) | Error::ErrorReply(_) => "PROTOCOL_ERROR",
            Error::ShardNotFound(_) => "SHARD_NOT_FOUND",
            Error::Io(_) | Error::Internal(_) | Error::Other(_) => "INTERNAL",
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
