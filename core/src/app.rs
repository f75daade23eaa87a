//! A running DisasterNet node: P2P node, chat log, orchestrator and the
//! state behind the HTTP API, started and stopped together.

use std::sync::Arc;

use axum::Router;
use libp2p::{Multiaddr, PeerId};
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::{self, AppState};
use crate::chat::{display_name_for_port, MessageStore, TopicBridge, WELCOME_MESSAGE};
use crate::network::{NetworkConfig, NetworkError, NodeHandle, NodeStatus, P2PNode, PeerNetwork};
use crate::orchestrator::{DialPolicy, Orchestrator};

/// Everything needed to start a node
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// HTTP port; also names the local user (`GuestUser-<port>`)
    pub http_port: u16,
    /// Peers dialed once at startup and by `POST /reconnect`
    pub bootstrap: Vec<Multiaddr>,
    /// First line of the chat log
    pub welcome_message: String,
    pub network: NetworkConfig,
    pub dial_policy: DialPolicy,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            http_port: 3001,
            bootstrap: Vec::new(),
            welcome_message: WELCOME_MESSAGE.to_string(),
            network: NetworkConfig::default(),
            dial_policy: DialPolicy::default(),
        }
    }
}

pub struct ChatNode {
    node: P2PNode,
    handle: NodeHandle,
    state: AppState,
    events_task: JoinHandle<()>,
}

impl ChatNode {
    /// Start the P2P node, wire the chat log to it and run the bootstrap
    /// sequence. Returns once every bootstrap address was tried.
    pub async fn start(settings: NodeSettings) -> Result<Self, NetworkError> {
        let mut node = P2PNode::new(settings.network.clone());
        node.start().await?;

        let handle = node.handle()?;
        let events = node.take_events().ok_or(NetworkError::NotRunning)?;
        let network: Arc<dyn PeerNetwork> = Arc::new(handle.clone());

        let store = MessageStore::with_welcome(settings.welcome_message.clone());
        let bridge = TopicBridge::new(
            network.clone(),
            display_name_for_port(settings.http_port),
            store,
        );
        info!("Chatting as {}", bridge.display_name());
        let orchestrator = Arc::new(Orchestrator::new(
            network.clone(),
            bridge.clone(),
            settings.bootstrap.clone(),
            settings.dial_policy.clone(),
        ));

        let events_task = tokio::spawn(Arc::clone(&orchestrator).run(events));
        orchestrator.bootstrap().await?;

        let state = AppState::new(network, bridge, orchestrator);
        Ok(Self {
            node,
            handle,
            state,
            events_task,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.node.peer_id()
    }

    /// HTTP router bound to this node
    pub fn router(&self) -> Router {
        api::router(self.state.clone())
    }

    pub async fn status(&self) -> Result<NodeStatus, NetworkError> {
        self.handle.status().await
    }

    pub async fn shutdown(self) -> Result<(), NetworkError> {
        info!("Shutting down P2P node");
        self.handle.stop().await?;
        // The event stream ends once the node's loop is gone.
        let _ = self.events_task.await;
        Ok(())
    }
}
