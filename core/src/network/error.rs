//! Network error types

use libp2p::PeerId;

/// Errors raised by the P2P node and its handle
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Node is not running")]
    NotRunning,
    #[error("Transport setup failed: {0}")]
    Transport(String),
    #[error("Behaviour setup failed: {0}")]
    Behaviour(String),
    #[error("Failed to listen on {address}: {reason}")]
    Listen { address: String, reason: String },
    #[error("Topic subscription failed: {0}")]
    Subscription(String),
    #[error("Peer {0} is not connected")]
    NotConnected(PeerId),
    #[error("Ping failed: {0}")]
    Ping(String),
    #[error("Node event loop stopped before replying")]
    ReplyDropped,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
