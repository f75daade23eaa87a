//! Network behaviour combining the libp2p protocols a chat node speaks

use libp2p::{
    connection_limits::{self, ConnectionLimits},
    gossipsub, identify, identity, mdns, ping,
    swarm::{behaviour::toggle::Toggle, NetworkBehaviour},
};

use crate::network::config::NetworkConfig;
use crate::network::error::NetworkError;

/// Identify protocol version advertised to peers
pub const IDENTIFY_PROTOCOL: &str = "/disasternet/id/1.0.0";

/// Combined network behaviour for our chat node
#[derive(NetworkBehaviour)]
pub struct NodeBehaviour {
    /// Caps the number of established connections
    pub limits: connection_limits::Behaviour,

    /// Gossip pub/sub carrying chat lines
    pub gossipsub: gossipsub::Behaviour,

    /// mDNS for local network peer discovery (off in loopback setups)
    pub mdns: Toggle<mdns::tokio::Behaviour>,

    /// Identify protocol for exchanging listen addresses
    pub identify: identify::Behaviour,

    /// Ping for keepalive and latency checks
    pub ping: ping::Behaviour,
}

impl NodeBehaviour {
    /// Create the behaviour for the given keypair
    pub fn new(local_key: &identity::Keypair, config: &NetworkConfig) -> Result<Self, NetworkError> {
        let local_peer_id = local_key.public().to_peer_id();

        let limits = connection_limits::Behaviour::new(
            ConnectionLimits::default().with_max_established(Some(config.max_connections)),
        );

        // Signed messages carry the origin peer id, which echo suppression relies on.
        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(std::time::Duration::from_secs(1))
            .validation_mode(gossipsub::ValidationMode::Strict)
            .build()
            .map_err(|e| NetworkError::Behaviour(e.to_string()))?;
        let gossipsub = gossipsub::Behaviour::new(
            gossipsub::MessageAuthenticity::Signed(local_key.clone()),
            gossipsub_config,
        )
        .map_err(|e| NetworkError::Behaviour(e.to_string()))?;

        let mdns = if config.enable_mdns {
            let mdns_config = mdns::Config {
                query_interval: config.mdns_query_interval,
                ..Default::default()
            };
            Some(mdns::tokio::Behaviour::new(mdns_config, local_peer_id)?)
        } else {
            None
        };

        let identify = identify::Behaviour::new(identify::Config::new(
            IDENTIFY_PROTOCOL.to_string(),
            local_key.public(),
        ));

        let ping = ping::Behaviour::new(ping::Config::new().with_interval(config.ping_interval));

        Ok(Self {
            limits,
            gossipsub,
            mdns: Toggle::from(mdns),
            identify,
            ping,
        })
    }
}
