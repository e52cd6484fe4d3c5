use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use super::DEFAULT_PORT;

/// Timing parameters applied to every transfer session
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// How long to wait for the peer's next datagram before retransmitting
    pub retransmit_timeout: Duration,
    /// How many retransmissions to attempt before abandoning the session
    pub max_retries: u32,
    /// How long a completed session keeps answering stray datagrams
    pub idle_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            retransmit_timeout: Duration::from_secs(3),
            max_retries: 5,
            idle_timeout: Duration::from_secs(10),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address of the rendezvous socket
    pub bind_addr: SocketAddr,
    /// Timing parameters handed to each spawned session
    pub transfer: TransferConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            transfer: TransferConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert!(config.transfer.max_retries > 0);
    }
}
