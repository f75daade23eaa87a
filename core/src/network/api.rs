//! Network API consumed by the chat bridge, the dial orchestrator and the
//! HTTP layer.
//!
//! [`PeerNetwork`] is implemented by [`NodeHandle`](crate::network::NodeHandle)
//! for the real libp2p node. Everything above the network module only
//! talks to this trait, so it can be driven by an in-process fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};

use crate::network::dial::DialFailure;
use crate::network::error::NetworkError;

/// Result of broadcasting one chat line on the topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to at least one subscribed peer
    Published,
    /// Nobody is subscribed yet; the line only exists locally
    NoSubscribers,
    /// Publishing failed for another reason
    Failed(String),
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published)
    }
}

/// Snapshot of the node's connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub peer_id: PeerId,
    /// Listen addresses, each ending in `/p2p/<peer id>`
    pub listening_addresses: Vec<Multiaddr>,
    /// Number of open connections (a peer may hold more than one)
    pub connections: usize,
    /// Peers with at least one open connection
    pub connected_peer_ids: Vec<PeerId>,
    /// Size of the peer book
    pub known_peers: usize,
}

impl NodeStatus {
    pub fn is_connected(&self) -> bool {
        self.connections > 0
    }
}

/// Operations the rest of the crate needs from the P2P node
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    /// Identity of the local node
    fn local_peer_id(&self) -> PeerId;

    /// Join the chat topic
    async fn subscribe(&self) -> Result<(), NetworkError>;

    /// Broadcast `data` on the chat topic
    async fn publish(&self, data: Vec<u8>) -> PublishOutcome;

    /// Dial an address; resolves once the connection is up or the dial failed
    async fn dial(&self, address: Multiaddr) -> Result<PeerId, DialFailure>;

    /// Dial a peer by identity, using whatever addresses the node knows
    async fn dial_peer(&self, peer_id: PeerId) -> Result<PeerId, DialFailure>;

    /// Round-trip time to a connected peer
    async fn ping(&self, peer_id: PeerId) -> Result<Duration, NetworkError>;

    /// Current connection state
    async fn status(&self) -> Result<NodeStatus, NetworkError>;
}
