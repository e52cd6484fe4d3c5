//! tftpd: a minimal Trivial File Transfer Protocol server
//!
//! This library implements the TFTP lock-step transfer scheme over UDP: a
//! rendezvous socket accepts read (RRQ) and write (WRQ) requests and each
//! accepted request is driven to completion on its own ephemeral transport.
pub mod core;

pub mod protocol;
pub mod server;
pub mod storage;
pub mod transfer;

// Re-export commonly used items
pub use crate::core::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
