use std::sync::Arc;

use crate::chat::TopicBridge;
use crate::network::PeerNetwork;
use crate::orchestrator::Orchestrator;

/// Shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub network: Arc<dyn PeerNetwork>,
    pub bridge: TopicBridge,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(network: Arc<dyn PeerNetwork>, bridge: TopicBridge, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            network,
            bridge,
            orchestrator,
        }
    }
}
