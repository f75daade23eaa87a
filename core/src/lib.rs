//! DisasterNet Core Library
//!
//! A gossip chat node: libp2p pub/sub between peers, an in-memory chat
//! log, a dial orchestrator that keeps trying to reach peers, and a small
//! HTTP API for a chat front end.

// Modules
pub mod network;
pub mod chat;
pub mod orchestrator;
pub mod api;
pub mod app;
pub mod cli;
pub mod logger;

pub use logger::init_logger;

// Re-export network types
pub use network::{NetworkConfig, NetworkError, NodeEvent, NodeHandle, NodeStatus, P2PNode, PeerNetwork, PublishOutcome};
pub use network::{DialCategory, DialFailure, CHAT_TOPIC};

// Re-export chat and application types
pub use chat::{ChatError, MessageStore, TopicBridge, WELCOME_MESSAGE};
pub use orchestrator::{DialPolicy, Orchestrator, ReconnectError};
pub use app::{ChatNode, NodeSettings};
pub use cli::Cli;
