use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::core::{Result, TransferConfig, MTU};
use crate::protocol::packet;
use crate::protocol::{ErrorCode, Opcode};
use crate::storage::FileSink;
use super::{clamp_message, send_packet, TransferGuard, TransferState};

/// Drives one WRQ conversation: the peer's DATA blocks are written to a
/// storage sink and acknowledged one by one. A DATA packet shorter than the
/// MTU marks the final block.
pub struct WriteTransfer {
    socket: UdpSocket,
    sink: Box<dyn FileSink>,
    /// Count of blocks accepted so far. Logical counter; the wire block
    /// number is only echoed back in the ACK.
    blocks_written: u32,
    state: TransferState,
    last_packet: Bytes,
    lock: Option<TransferGuard>,
    config: TransferConfig,
}

impl WriteTransfer {
    /// Opens a transport connected to the peer and prepares the session
    pub async fn connect(
        peer: SocketAddr,
        sink: Box<dyn FileSink>,
        config: TransferConfig,
    ) -> Result<Self> {
        let socket = super::connect_to_peer(peer).await?;
        Ok(WriteTransfer::new(socket, sink, config))
    }

    /// Builds a session on an already connected socket
    pub(crate) fn new(socket: UdpSocket, sink: Box<dyn FileSink>, config: TransferConfig) -> Self {
        WriteTransfer {
            socket,
            sink,
            blocks_written: 0,
            state: TransferState::Awaiting,
            last_packet: packet::encode_ack(0),
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

    /// Runs the conversation until the final block is saved or the peer goes
    /// silent past the retry cap
    pub async fn run(mut self) -> Result<()> {
        // ACK(0) signals readiness to receive block 1.
        send_packet(&self.socket, &self.last_packet).await;

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
                Ok(Err(e)) => {
                    self.close_sink().await;
                    return Err(e.into());
                }
                Err(_) => {
                    if self.state == TransferState::Completed {
                        debug!("transfer complete, releasing transport");
                        return Ok(());
                    }
                    if retries >= self.config.max_retries {
                        self.state = TransferState::Abandoned;
                        info!("peer went silent, abandoning write transfer");
                        self.close_sink().await;
                        return Ok(());
                    }
                    retries += 1;
                    debug!(retries, "retransmitting last ack");
                    send_packet(&self.socket, &self.last_packet).await;
                }
            }
        }
    }

    async fn handle_datagram(&mut self, buf: &[u8]) {
        let opcode = packet::opcode(buf).unwrap_or(0);
        debug!(size = buf.len(), opcode, "peer packet received");

        match Opcode::from_u16(opcode) {
            Some(Opcode::Data) => self.handle_data(buf).await,
            Some(Opcode::Error) => {
                // The peer aborted; nothing has been promised for the
                // current block yet, so there is nothing to roll back.
                debug!("peer reported an error");
            }
            _ => {
                self.send_error(ErrorCode::IllegalOp, "illegal op").await;
            }
        }
    }

    async fn handle_data(&mut self, buf: &[u8]) {
        if self.state == TransferState::Completed {
            self.send_error(ErrorCode::Unknown, "file is already saved").await;
            return;
        }

        let block = match packet::data_block(buf) {
            Ok(block) if block != 0 => block,
            _ => {
                self.send_error(ErrorCode::Unknown, "invalid block number").await;
                return;
            }
        };

        self.state = TransferState::Transferring;

        // Write, then acknowledge, then close: one sequenced chain, so the
        // sink is never closed underneath an in-flight write.
        let payload = packet::data_payload(buf);
        if let Err(e) = self.sink.write(payload).await {
            info!(error = %e, block, "failed to save a block");
            let msg = e.to_string();
            self.send_error(ErrorCode::Unknown, &msg).await;
            return;
        }

        let ack = packet::encode_ack(block);
        self.last_packet = ack.clone();
        debug!(block, "sending an ack");
        send_packet(&self.socket, &ack).await;
        self.blocks_written += 1;

        if buf.len() < MTU {
            // Anything shorter than a full datagram is the final block.
            self.close_sink().await;
            self.state = TransferState::Completed;
            self.lock.take();
            info!(blocks = self.blocks_written, "file saved");
        }
    }

    async fn close_sink(&mut self) {
        if let Err(e) = self.sink.close().await {
            info!(error = %e, "failed to close the sink");
        }
    }

    async fn send_error(&self, code: ErrorCode, message: &str) {
        send_packet(
            &self.socket,
            &packet::encode_error(code, clamp_message(message)),
        )
        .await;
    }
}
