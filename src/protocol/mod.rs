//! TFTP wire format
//!
//! This module encodes and decodes the five TFTP packet kinds. It is pure
//! byte manipulation; no sockets are touched here.

pub mod packet;

pub use self::packet::{ErrorCode, Opcode, RequestHeader};
