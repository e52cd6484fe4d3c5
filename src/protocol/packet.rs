use bytes::{BufMut, Bytes, BytesMut};

use crate::core::{Error, Result, ACK_PACKET_SIZE, DATA_HEADER_SIZE, ERROR_HEADER_SIZE, MAX_ERROR_MESSAGE_SIZE};

/// TFTP packet opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Read request
    Rrq = 1,
    /// Write request
    Wrq = 2,
    /// File data block
    Data = 3,
    /// Block acknowledgement
    Ack = 4,
    /// Error report
    Error = 5,
}

impl Opcode {
    /// Maps a wire opcode to a known packet kind
    pub fn from_u16(value: u16) -> Option<Opcode> {
        match value {
            1 => Some(Opcode::Rrq),
            2 => Some(Opcode::Wrq),
            3 => Some(Opcode::Data),
            4 => Some(Opcode::Ack),
            5 => Some(Opcode::Error),
            _ => None,
        }
    }

    /// Wire representation of the opcode
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// TFTP error codes carried by ERROR packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unknown = 0,
    NotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOp = 4,
    UnknownId = 5,
    FileExists = 6,
    NoUser = 7,
}

impl ErrorCode {
    /// Maps a wire error code to a known code, defaulting to `Unknown`
    pub fn from_u16(value: u16) -> ErrorCode {
        match value {
            1 => ErrorCode::NotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOp,
            5 => ErrorCode::UnknownId,
            6 => ErrorCode::FileExists,
            7 => ErrorCode::NoUser,
            _ => ErrorCode::Unknown,
        }
    }

    /// Wire representation of the error code
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Filename and mode parsed from the first datagram of a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// Name of the file to read or write
    pub filename: String,
    /// Transfer mode ("octet", "netascii", ...)
    pub mode: String,
}

/// Reads the big-endian opcode from the first two bytes of a datagram
pub fn opcode(buf: &[u8]) -> Result<u16> {
    if buf.len() < 2 {
        return Err(Error::malformed_packet("datagram shorter than an opcode"));
    }
    Ok(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Parses the filename and mode out of an RRQ/WRQ datagram
///
/// Layout: `opcode(2)` `filename` `0x00` `mode` `0x00`. The opcode and the
/// trailing null are stripped; the remainder is split at the first null byte.
pub fn parse_request(buf: &[u8]) -> Result<RequestHeader> {
    if buf.len() < DATA_HEADER_SIZE {
        return Err(Error::malformed_packet("request header too short"));
    }

    let body = &buf[2..buf.len() - 1];
    let split = body
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::malformed_packet("request header has no null separator"))?;

    let filename = std::str::from_utf8(&body[..split])
        .map_err(|_| Error::malformed_packet("filename is not valid ascii"))?;
    let mode = std::str::from_utf8(&body[split + 1..])
        .map_err(|_| Error::malformed_packet("mode is not valid ascii"))?;

    Ok(RequestHeader {
        filename: filename.to_string(),
        mode: mode.to_string(),
    })
}

/// Builds a DATA packet: `[opcode=3][block][payload]`
pub fn encode_data(block: u16, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(DATA_HEADER_SIZE + payload.len());
    buf.put_u16(Opcode::Data.as_u16());
    buf.put_u16(block);
    buf.put_slice(payload);
    buf.freeze()
}

/// Builds an ACK packet: `[opcode=4][block]`, fixed 4 bytes
pub fn encode_ack(block: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(ACK_PACKET_SIZE);
    buf.put_u16(Opcode::Ack.as_u16());
    buf.put_u16(block);
    buf.freeze()
}

/// Builds an ERROR packet: `[opcode=5][code][message][0x00]`
///
/// # Panics
///
/// Panics if `message` exceeds 511 bytes. Wire messages have a hard upper
/// bound; passing a longer one is a caller bug, not a runtime condition.
pub fn encode_error(code: ErrorCode, message: &str) -> Bytes {
    assert!(
        message.len() <= MAX_ERROR_MESSAGE_SIZE,
        "error message exceeds {MAX_ERROR_MESSAGE_SIZE} bytes"
    );
    let mut buf = BytesMut::with_capacity(ERROR_HEADER_SIZE + message.len());
    buf.put_u16(Opcode::Error.as_u16());
    buf.put_u16(code.as_u16());
    buf.put_slice(message.as_bytes());
    buf.put_u8(0);
    buf.freeze()
}

/// Reads the block number from bytes [2..4) of a DATA packet
pub fn data_block(buf: &[u8]) -> Result<u16> {
    if buf.len() < DATA_HEADER_SIZE {
        return Err(Error::malformed_packet("data packet shorter than its header"));
    }
    Ok(u16::from_be_bytes([buf[2], buf[3]]))
}

/// Returns the payload of a DATA packet, bytes [4..)
pub fn data_payload(buf: &[u8]) -> &[u8] {
    buf.get(DATA_HEADER_SIZE..).unwrap_or(&[])
}
