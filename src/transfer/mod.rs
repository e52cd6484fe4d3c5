//! Per-request transfer sessions
//!
//! Each accepted RRQ/WRQ gets its own session owning one ephemeral UDP
//! socket connected to the requesting peer. A session runs to a terminal
//! state (completed or abandoned) and is then discarded along with its
//! transport.

mod read;
mod write;

pub use self::read::ReadTransfer;
pub use self::write::WriteTransfer;

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::UdpSocket;
use tracing::{debug, error};

use crate::core::{Result, MAX_ERROR_MESSAGE_SIZE};
use crate::protocol::packet;
use crate::protocol::ErrorCode;

/// Lifecycle of one transfer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Session created, first exchange not yet made
    Awaiting,
    /// Blocks are moving
    Transferring,
    /// Every block exchanged; the session lingers briefly for stray datagrams
    Completed,
    /// Peer went silent past the retry cap; resources released
    Abandoned,
}

/// Filenames with an in-flight transfer. A second request for a busy name is
/// refused before any storage call is made.
#[derive(Clone, Default)]
pub(crate) struct TransferLocks {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl TransferLocks {
    pub(crate) fn acquire(&self, filename: &str) -> Option<TransferGuard> {
        let mut held = self.lock();
        if !held.insert(filename.to_string()) {
            return None;
        }
        Some(TransferGuard {
            filename: filename.to_string(),
            locks: self.clone(),
        })
    }

    fn release(&self, filename: &str) {
        self.lock().remove(filename);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the filename lock when dropped. Sessions drop it on the
/// `Completed` transition, so a finished file is free for the next request
/// even while the old session lingers for stray datagrams.
pub(crate) struct TransferGuard {
    filename: String,
    locks: TransferLocks,
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.locks.release(&self.filename);
    }
}

/// Opens an ephemeral socket connected to the peer, so only that peer's
/// datagrams are delivered to the session
pub(crate) async fn connect_to_peer(peer: SocketAddr) -> Result<UdpSocket> {
    let bind_addr = if peer.is_ipv4() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    } else {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(peer).await?;
    Ok(socket)
}

/// Sends one ERROR packet to a peer on a fresh transport, without starting a
/// session. Used when a request is refused outright.
pub(crate) async fn reject_peer(peer: SocketAddr, code: ErrorCode, message: &str) -> Result<()> {
    let socket = connect_to_peer(peer).await?;
    send_packet(&socket, &packet::encode_error(code, clamp_message(message))).await;
    Ok(())
}

/// Sends a packet, logging the outcome. Send failures are never fatal to the
/// session that triggered them.
pub(crate) async fn send_packet(socket: &UdpSocket, data: &[u8]) {
    match socket.send(data).await {
        Ok(bytes) => debug!(bytes, "replied"),
        Err(e) => error!(error = %e, "reply error"),
    }
}

/// Truncates a runtime-derived message to what an ERROR packet can carry
pub(crate) fn clamp_message(message: &str) -> &str {
    if message.len() <= MAX_ERROR_MESSAGE_SIZE {
        return message;
    }
    let mut end = MAX_ERROR_MESSAGE_SIZE;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}
