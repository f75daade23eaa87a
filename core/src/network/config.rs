//! Network configuration

use std::net::Ipv4Addr;
use std::time::Duration;

use libp2p::{multiaddr::Protocol, Multiaddr};

/// Gossipsub topic every DisasterNet node joins.
pub const CHAT_TOPIC: &str = "disasternet-chat";

/// Configuration for the P2P network node
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Addresses to listen on (TCP and WebSocket by default)
    pub listen_addrs: Vec<Multiaddr>,

    /// Enable mDNS for local peer discovery
    pub enable_mdns: bool,

    /// How often mDNS queries the local network
    pub mdns_query_interval: Duration,

    /// Upper bound on established connections
    pub max_connections: u32,

    /// Interval of the background dial to known but unconnected peers
    pub auto_dial_interval: Duration,

    /// Interval of the periodic connection status log line
    pub status_interval: Duration,

    /// Keepalive ping interval
    pub ping_interval: Duration,

    /// Idle connection timeout
    pub idle_timeout: Duration,
}

/// `/ip4/<ip>/tcp/0`
fn tcp_addr(ip: Ipv4Addr) -> Multiaddr {
    Multiaddr::empty().with(Protocol::Ip4(ip)).with(Protocol::Tcp(0))
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec![
                tcp_addr(Ipv4Addr::UNSPECIFIED),
                tcp_addr(Ipv4Addr::UNSPECIFIED).with(Protocol::Ws("/".into())),
            ],
            enable_mdns: true,
            mdns_query_interval: Duration::from_secs(10),
            max_connections: 100,
            auto_dial_interval: Duration::from_secs(5),
            status_interval: Duration::from_secs(30),
            ping_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl NetworkConfig {
    /// Loopback-only TCP node with discovery switched off.
    ///
    /// Peers have to be dialed explicitly, which keeps tests on one host
    /// from wandering into each other.
    pub fn local_only() -> Self {
        Self {
            listen_addrs: vec![tcp_addr(Ipv4Addr::LOCALHOST)],
            enable_mdns: false,
            ..Self::default()
        }
    }

    /// Replace the listen addresses, keeping the defaults when `addrs` is empty.
    pub fn with_listen_addrs(mut self, addrs: Vec<Multiaddr>) -> Self {
        if !addrs.is_empty() {
            self.listen_addrs = addrs;
        }
        self
    }
}
