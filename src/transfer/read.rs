use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::core::{Result, TransferConfig, BLOCK_SIZE, MTU};
use crate::protocol::packet;
use crate::protocol::{ErrorCode, Opcode};
use super::{send_packet, TransferGuard, TransferState};

/// Drives one RRQ conversation: the whole file is sent to the peer in
/// lock-step 512-byte blocks, each of which must be acknowledged before the
/// next is put on the wire.
pub struct ReadTransfer {
    socket: UdpSocket,
    file: Bytes,
    /// Next block to send, 1-based. Logical counter; truncated to 16 bits
    /// only when a packet is built, so comparisons never wrap.
    cursor: u32,
    total_blocks: u32,
    state: TransferState,
    last_packet: Bytes,
    lock: Option<TransferGuard>,
    config: TransferConfig,
}

impl ReadTransfer {
    /// Opens a transport connected to the peer and prepares the session
    pub async fn connect(peer: SocketAddr, file: Bytes, config: TransferConfig) -> Result<Self> {
        let socket = super::connect_to_peer(peer).await?;
        Ok(ReadTransfer::new(socket, file, config))
    }

    /// Builds a session on an already connected socket
    pub(crate) fn new(socket: UdpSocket, file: Bytes, config: TransferConfig) -> Self {
        let total_blocks = file.len().div_ceil(BLOCK_SIZE) as u32;
        ReadTransfer {
            socket,
            file,
            cursor: 1,
            total_blocks,
            state: TransferState::Awaiting,
            last_packet: Bytes::new(),
            lock: None,
            config,
        }
    }

    /// Attaches the filename lock; it is released the moment the transfer
    /// completes, not when the session's linger ends
    pub(crate) fn with_lock(mut self, lock: TransferGuard) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Runs the conversation until every block is acknowledged or the peer
    /// goes silent past the retry cap
    pub async fn run(mut self) -> Result<()> {
        debug!(bytes = self.file.len(), blocks = self.total_blocks, "starting read transfer");

        // Block 1 goes out unprompted; everything after is ACK-driven.
        self.send_current_block().await;
        self.cursor += 1;
        self.state = TransferState::Transferring;

        let mut retries = 0u32;
        let mut buf = [0u8; MTU];

        loop {
            let wait = if self.state == TransferState::Completed {
                self.config.idle_timeout
            } else {
                self.config.retransmit_timeout
            };

            match timeout(wait, self.socket.recv(&mut buf)).await {
                Ok(Ok(len)) => {
                    retries = 0;
                    self.handle_datagram(&buf[..len]).await;
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    if self.state == TransferState::Completed {
                        debug!("transfer complete, releasing transport");
                        return Ok(());
                    }
                    if retries >= self.config.max_retries {
                        self.state = TransferState::Abandoned;
                        info!("peer went silent, abandoning read transfer");
                        return Ok(());
                    }
                    retries += 1;
                    debug!(retries, "retransmitting last block");
                    send_packet(&self.socket, &self.last_packet).await;
                }
            }
        }
    }

    async fn handle_datagram(&mut self, buf: &[u8]) {
        let opcode = packet::opcode(buf).unwrap_or(0);
        debug!(size = buf.len(), opcode, "peer packet received");

        match Opcode::from_u16(opcode) {
            Some(Opcode::Ack) => {
                // The acknowledged block number is deliberately not compared
                // to the cursor; any ACK advances the transfer.
                if self.cursor <= self.total_blocks {
                    self.send_current_block().await;
                    self.cursor += 1;
                } else if self.state != TransferState::Completed {
                    self.state = TransferState::Completed;
                    self.lock.take();
                    info!(blocks = self.total_blocks, "file sent");
                }
            }
            Some(Opcode::Error) => {
                // A peer error is treated as a retry signal: the pending
                // block goes out again, cursor unchanged.
                self.send_current_block().await;
            }
            _ => {
                send_packet(
                    &self.socket,
                    &packet::encode_error(ErrorCode::IllegalOp, "illegal op"),
                )
                .await;
            }
        }
    }

    async fn send_current_block(&mut self) {
        let wire_block = (self.cursor & 0xffff) as u16;
        let data = packet::encode_data(wire_block, self.payload_for(self.cursor));
        self.last_packet = data.clone();
        send_packet(&self.socket, &data).await;
    }

    fn payload_for(&self, block: u32) -> &[u8] {
        let start = (block as usize - 1) * BLOCK_SIZE;
        if start >= self.file.len() {
            return &[];
        }
        let end = (start + BLOCK_SIZE).min(self.file.len());
        &self.file[start..end]
    }
}
