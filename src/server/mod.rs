//! Request dispatcher
//!
//! Owns the rendezvous UDP socket, classifies inbound datagrams by opcode
//! and spawns an isolated session task for each accepted RRQ/WRQ. Packets
//! that only make sense inside an established conversation (DATA, ACK,
//! ERROR) are logged and dropped when they arrive here.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, error, info, info_span, Instrument};

use crate::core::{Error, Result, ServerConfig, MTU};
use crate::protocol::packet;
use crate::protocol::{ErrorCode, Opcode, RequestHeader};
use crate::storage::Storage;
use crate::transfer::{reject_peer, ReadTransfer, TransferLocks, WriteTransfer};

/// Handle for stopping a running server
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    /// Asks the accept loop to exit after the datagram it is processing
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// TFTP server: one rendezvous socket, one task per accepted request
pub struct TftpServer {
    socket: Arc<UdpSocket>,
    storage: Arc<dyn Storage>,
    config: ServerConfig,
    locks: TransferLocks,
    shutdown: Arc<Notify>,
}

impl TftpServer {
    /// Binds the rendezvous socket. Failure here is fatal to accepting
    /// requests; there is no automatic rebind.
    pub async fn bind(config: ServerConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|e| Error::network(format!("failed to bind {}: {}", config.bind_addr, e)))?;
        info!(addr = %socket.local_addr()?, "tftp server is listening");

        Ok(TftpServer {
            socket: Arc::new(socket),
            storage,
            config,
            locks: TransferLocks::default(),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Address the rendezvous socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(Into::into)
    }

    /// Returns a handle that can stop the accept loop
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Accept loop. Runs until a listener error or a shutdown request;
    /// sessions spawned earlier keep running independently.
    pub async fn run(&self) -> Result<()> {
        let mut buf = [0u8; MTU];
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = received
                        .map_err(|e| Error::network(format!("listener error: {e}")))?;
                    self.dispatch(&buf[..len], peer);
                }
            }
        }
    }

    /// Classifies one datagram from the rendezvous socket
    fn dispatch(&self, buf: &[u8], peer: SocketAddr) {
        let span = info_span!("request", peer = %peer);
        let _enter = span.enter();
        info!(size = buf.len(), "request received");

        let opcode = match packet::opcode(buf) {
            Ok(opcode) => opcode,
            Err(e) => {
                debug!(error = %e, "dropping malformed datagram");
                return;
            }
        };

        match Opcode::from_u16(opcode) {
            Some(Opcode::Rrq) => {
                debug!("read request");
                if let Some(header) = self.parse_header(buf) {
                    self.spawn_read(header, peer);
                }
            }
            Some(Opcode::Wrq) => {
                debug!("write request");
                if let Some(header) = self.parse_header(buf) {
                    self.spawn_write(header, peer);
                }
            }
            Some(other) => {
                debug!(opcode = other.as_u16(), "dropping packet outside a conversation");
            }
            None => {
                debug!(opcode, "dropping packet with unknown opcode");
            }
        }
    }

    fn parse_header(&self, buf: &[u8]) -> Option<RequestHeader> {
        match packet::parse_request(buf) {
            Ok(header) => {
                info!(filename = %header.filename, mode = %header.mode, "request parsed");
                Some(header)
            }
            Err(e) => {
                debug!(error = %e, "dropping request with malformed header");
                None
            }
        }
    }

    fn spawn_read(&self, header: RequestHeader, peer: SocketAddr) {
        let storage = Arc::clone(&self.storage);
        let config = self.config.transfer.clone();
        let locks = self.locks.clone();
        let span = info_span!("rrq", peer = %peer, filename = %header.filename);

        tokio::spawn(
            async move {
                let Some(guard) = locks.acquire(&header.filename) else {
                    refuse_busy(peer).await;
                    return;
                };

                match storage.get_file(&header.filename).await {
                    Ok(file) => match ReadTransfer::connect(peer, file, config).await {
                        Ok(session) => {
                            if let Err(e) = session.with_lock(guard).run().await {
                                error!(error = %e, "read transfer failed");
                            }
                        }
                        Err(e) => error!(error = %e, "failed to open a transport"),
                    },
                    Err(e) => {
                        info!(error = %e, "failed to send a file");
                        if let Err(e) = reject_peer(peer, ErrorCode::NotFound, "file not found").await
                        {
                            error!(error = %e, "reply error");
                        }
                    }
                }
            }
            .instrument(span),
        );
    }

    fn spawn_write(&self, header: RequestHeader, peer: SocketAddr) {
        let storage = Arc::clone(&self.storage);
        let config = self.config.transfer.clone();
        let locks = self.locks.clone();
        let span = info_span!("wrq", peer = %peer, filename = %header.filename);

        tokio::spawn(
            async move {
                let Some(guard) = locks.acquire(&header.filename) else {
                    refuse_busy(peer).await;
                    return;
                };

                match storage.save_file(&header.filename).await {
                    Ok(sink) => match WriteTransfer::connect(peer, sink, config).await {
                        Ok(session) => {
                            if let Err(e) = session.with_lock(guard).run().await {
                                error!(error = %e, "write transfer failed");
                            }
                        }
                        Err(e) => error!(error = %e, "failed to open a transport"),
                    },
                    Err(e) => {
                        info!(error = %e, "failed to open a sink");
                        let message = e.to_string();
                        if let Err(e) = reject_peer(peer, ErrorCode::Unknown, &message).await {
                            error!(error = %e, "reply error");
                        }
                    }
                }
            }
            .instrument(span),
        );
    }
}

async fn refuse_busy(peer: SocketAddr) {
    info!("file is busy with another transfer");
    if let Err(e) = reject_peer(peer, ErrorCode::AccessViolation, "file is busy").await {
        error!(error = %e, "reply error");
    }
}
