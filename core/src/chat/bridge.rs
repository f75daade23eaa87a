//! Glue between the chat log and the gossip topic

use std::sync::Arc;

use libp2p::PeerId;
use tracing::{debug, info, warn};

use crate::chat::store::MessageStore;
use crate::network::dial::short_peer_id;
use crate::network::{PeerNetwork, PublishOutcome};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("Message cannot be empty.")]
    EmptyMessage,
}

/// Display name used for every line submitted through the HTTP API
pub fn display_name_for_port(port: u16) -> String {
    format!("GuestUser-{port}")
}

pub fn format_message(display_name: &str, text: &str) -> String {
    format!("{display_name}: {text}")
}

/// A local message after it was stored and handed to the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub formatted: String,
    pub outcome: PublishOutcome,
}

/// Moves chat lines between the local store and the topic
#[derive(Clone)]
pub struct TopicBridge {
    network: Arc<dyn PeerNetwork>,
    display_name: String,
    store: MessageStore,
}

impl TopicBridge {
    pub fn new(network: Arc<dyn PeerNetwork>, display_name: impl Into<String>, store: MessageStore) -> Self {
        Self {
            network,
            display_name: display_name.into(),
            store,
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Store a local message, then broadcast it.
    ///
    /// The line is in the log before publishing starts, so it survives any
    /// publish failure.
    pub async fn submit(&self, text: &str) -> Result<Submission, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let formatted = format_message(&self.display_name, text);
        self.store.append(formatted.clone()).await;
        let outcome = self.publish(&formatted).await;

        Ok(Submission { formatted, outcome })
    }

    /// Broadcast an already formatted line
    pub async fn publish(&self, line: &str) -> PublishOutcome {
        let outcome = self.network.publish(line.as_bytes().to_vec()).await;
        match &outcome {
            PublishOutcome::Published => info!("Published message to P2P network"),
            PublishOutcome::NoSubscribers => {
                warn!("No peers subscribed to the chat topic yet, message kept locally")
            }
            PublishOutcome::Failed(reason) => warn!("Failed to publish message: {reason}"),
        }
        outcome
    }

    /// Handle a gossip delivery. Returns whether the line was appended.
    ///
    /// Deliveries without a signed origin are attributed to the peer that
    /// forwarded them.
    pub async fn on_inbound(&self, origin: Option<PeerId>, propagation_source: PeerId, payload: &[u8]) -> bool {
        let origin = origin.unwrap_or(propagation_source);
        if origin == self.network.local_peer_id() {
            debug!("Ignoring echo of our own message");
            return false;
        }

        let line = String::from_utf8_lossy(payload).into_owned();
        info!("Received message from {}: {line}", short_peer_id(&origin));
        self.store.append(line).await;
        true
    }
}
