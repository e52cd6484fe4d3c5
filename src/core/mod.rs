//! Core types and constants for the TFTP server
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{ServerConfig, TransferConfig};

/// Maximum TFTP datagram size in bytes; any DATA packet below this size is the
/// final block of a transfer
pub const MTU: usize = 516;

/// DATA packet header: 2-byte opcode + 2-byte block number
pub const DATA_HEADER_SIZE: usize = 4;

/// Maximum data payload carried by one DATA packet
pub const BLOCK_SIZE: usize = MTU - DATA_HEADER_SIZE;

/// ERROR packet overhead: 2-byte opcode + 2-byte error code + terminating null
pub const ERROR_HEADER_SIZE: usize = 5;

/// Maximum ASCII message carried by one ERROR packet
pub const MAX_ERROR_MESSAGE_SIZE: usize = MTU - ERROR_HEADER_SIZE;

/// ACK packets are always exactly this long
pub const ACK_PACKET_SIZE: usize = 4;

/// Default listening port (69 is traditional; this deployment uses 3001)
pub const DEFAULT_PORT: u16 = 3001;
