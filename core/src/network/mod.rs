//! Network module for P2P communication using libp2p
//!
//! Provides:
//! - Transports (TCP and WebSocket, Noise encrypted, Yamux multiplexed)
//! - Peer discovery (mDNS) and a background auto-dial over the peer book
//! - Gossip pub/sub on the chat topic

mod node;
mod behaviour;
mod config;
mod error;
mod peer_book;
pub mod api;
pub mod dial;

pub use node::{P2PNode, NodeHandle, NodeEvent, PeerInfo};
pub use config::{NetworkConfig, CHAT_TOPIC};
pub use error::NetworkError;
pub use api::{NodeStatus, PeerNetwork, PublishOutcome};
pub use dial::{DialCategory, DialFailure};

#[cfg(test)]
pub(crate) mod fake;
