use std::io;
use thiserror::Error;

/// Custom error types for the TFTP server
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    #[error("invalid block number: {0}")]
    InvalidBlock(u16),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("access violation: {0}")]
    AccessViolation(String),

    #[error("storage write failed: {0}")]
    SinkWrite(String),

    #[error("network error: {0}")]
    Network(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new malformed-packet error
    pub fn malformed_packet(msg: impl Into<String>) -> Self {
        Error::MalformedPacket(msg.into())
    }

    /// Creates a new illegal-operation error
    pub fn illegal_operation(msg: impl Into<String>) -> Self {
        Error::IllegalOperation(msg.into())
    }

    /// Creates a new not-found error
    pub fn not_found(filename: impl Into<String>) -> Self {
        Error::NotFound(filename.into())
    }

    /// Creates a new access-violation error
    pub fn access_violation(msg: impl Into<String>) -> Self {
        Error::AccessViolation(msg.into())
    }

    /// Creates a new sink-write error
    pub fn sink_write(msg: impl Into<String>) -> Self {
        Error::SinkWrite(msg.into())
    }

    /// Creates a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }
}
