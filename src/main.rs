//! Process bootstrap for the TFTP server binary
//!
//! Wires the logger, the filesystem storage and the dispatcher together.
//! `TFTPD_ROOT` selects the served directory (default `files`) and
//! `TFTPD_PORT` overrides the listening port.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tftpd::core::{ServerConfig, DEFAULT_PORT};
use tftpd::server::TftpServer;
use tftpd::storage::FsStorage;
use tftpd::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let root = std::env::var("TFTPD_ROOT").unwrap_or_else(|_| "files".to_string());
    let port = std::env::var("TFTPD_PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let config = ServerConfig {
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        ..ServerConfig::default()
    };

    let storage = Arc::new(FsStorage::new(root));
    let server = TftpServer::bind(config, storage).await?;
    server.run().await
}
