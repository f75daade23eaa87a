//! P2P Node implementation

use crate::network::api::{NodeStatus, PeerNetwork, PublishOutcome};
use crate::network::behaviour::{NodeBehaviour, NodeBehaviourEvent};
use crate::network::config::{NetworkConfig, CHAT_TOPIC};
use crate::network::dial::{peer_id_from_addr, with_peer_id, DialCategory, DialFailure};
use crate::network::error::NetworkError;
use crate::network::peer_book::PeerBook;

use async_trait::async_trait;
use libp2p::{
    gossipsub, identify, identity, mdns, noise, ping,
    swarm::{
        dial_opts::{DialOpts, PeerCondition},
        ConnectionId, DialError, SwarmEvent,
    },
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Information about a discovered peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub addresses: Vec<Multiaddr>,
}

/// Events emitted by the P2P node
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// Node started listening on an address
    Listening { address: Multiaddr },
    /// Peer found by mDNS; `is_new` is false when it was already in the peer book
    PeerDiscovered { peer: PeerInfo, is_new: bool },
    /// mDNS record of a peer expired
    PeerExpired { peer_id: PeerId },
    /// First connection to a peer came up
    PeerConnected { peer_id: PeerId, total_peers: usize },
    /// Last connection to a peer closed
    PeerDisconnected { peer_id: PeerId, total_peers: usize },
    /// Remote peer joined a topic
    PeerSubscribed { peer_id: PeerId, topic: String },
    /// Gossip message delivered on the chat topic
    MessageReceived {
        origin: Option<PeerId>,
        propagation_source: PeerId,
        data: Vec<u8>,
    },
}

enum DialTarget {
    Address(Multiaddr),
    Peer(PeerId),
}

/// Commands that can be sent to the node
enum NodeCommand {
    /// Stop the node
    Stop,
    /// Join the chat topic
    Subscribe(oneshot::Sender<Result<(), NetworkError>>),
    /// Publish on the chat topic
    Publish {
        data: Vec<u8>,
        reply: oneshot::Sender<PublishOutcome>,
    },
    /// Dial a peer
    Dial {
        target: DialTarget,
        reply: oneshot::Sender<Result<PeerId, DialFailure>>,
    },
    /// Wait for a ping round trip to a connected peer
    Ping {
        peer_id: PeerId,
        reply: oneshot::Sender<Result<Duration, NetworkError>>,
    },
    /// Snapshot connection state
    Status(oneshot::Sender<NodeStatus>),
}

/// A P2P network node
pub struct P2PNode {
    /// Local keypair
    local_key: identity::Keypair,
    /// Our peer ID
    local_peer_id: PeerId,
    /// Configuration used on start
    config: NetworkConfig,
    /// Command sender for controlling the node
    command_tx: Option<mpsc::Sender<NodeCommand>>,
    /// Event receiver for node events
    event_rx: Option<mpsc::UnboundedReceiver<NodeEvent>>,
    /// Running state
    is_running: Arc<RwLock<bool>>,
}

impl P2PNode {
    /// Create a new P2P node with a fresh Ed25519 identity
    pub fn new(config: NetworkConfig) -> Self {
        let local_key = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(local_key.public());

        Self {
            local_key,
            local_peer_id,
            config,
            command_tx: None,
            event_rx: None,
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    /// Use an existing identity instead of the generated one
    pub fn with_identity(mut self, key: identity::Keypair) -> Self {
        self.local_peer_id = PeerId::from(key.public());
        self.local_key = key;
        self
    }

    /// Get the local peer ID
    pub fn peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Check if the node is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Start the P2P node. Starting a running node is a no-op.
    pub async fn start(&mut self) -> Result<(), NetworkError> {
        if *self.is_running.read().await {
            info!("P2P node already running, skipping start");
            return Ok(());
        }

        let mut swarm = build_swarm(&self.local_key, &self.config).await?;

        for addr in &self.config.listen_addrs {
            swarm.listen_on(addr.clone()).map_err(|e| NetworkError::Listen {
                address: addr.to_string(),
                reason: e.to_string(),
            })?;
        }

        // Create channels for communication
        let (cmd_tx, cmd_rx) = mpsc::channel::<NodeCommand>(32);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<NodeEvent>();

        self.command_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);

        let is_running = self.is_running.clone();
        *is_running.write().await = true;

        let event_loop = EventLoop::new(swarm, cmd_rx, event_tx, &self.config);

        // Spawn the event loop
        tokio::spawn(async move {
            event_loop.run().await;
            *is_running.write().await = false;
        });

        info!("P2P node started with peer ID: {}", self.local_peer_id);
        info!(
            "Services: identify, ping, gossipsub{}",
            if self.config.enable_mdns { ", mdns" } else { "" }
        );
        Ok(())
    }

    /// Cloneable handle for talking to the running node
    pub fn handle(&self) -> Result<NodeHandle, NetworkError> {
        let command_tx = self.command_tx.clone().ok_or(NetworkError::NotRunning)?;
        Ok(NodeHandle {
            peer_id: self.local_peer_id,
            command_tx,
        })
    }

    /// Take the event receiver, leaving the node without one
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<NodeEvent>> {
        self.event_rx.take()
    }

    /// Get next event from the node
    pub async fn next_event(&mut self) -> Option<NodeEvent> {
        if let Some(rx) = &mut self.event_rx {
            rx.recv().await
        } else {
            None
        }
    }

    /// Stop the P2P node
    pub async fn stop(&self) -> Result<(), NetworkError> {
        if let Some(tx) = &self.command_tx {
            tx.send(NodeCommand::Stop)
                .await
                .map_err(|_| NetworkError::NotRunning)?;
        }
        Ok(())
    }
}

async fn build_swarm(
    local_key: &identity::Keypair,
    config: &NetworkConfig,
) -> Result<Swarm<NodeBehaviour>, NetworkError> {
    let behaviour = NodeBehaviour::new(local_key, config)?;

    let swarm = libp2p::SwarmBuilder::with_existing_identity(local_key.clone())
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| NetworkError::Transport(e.to_string()))?
        .with_websocket(noise::Config::new, yamux::Config::default)
        .await
        .map_err(|e| NetworkError::Transport(e.to_string()))?
        .with_behaviour(|_| behaviour)
        .map_err(|e| NetworkError::Behaviour(e.to_string()))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(config.idle_timeout))
        .build();

    Ok(swarm)
}

type PingReply = oneshot::Sender<Result<Duration, NetworkError>>;

/// Callers waiting for the next ping round trip to a peer
#[derive(Default)]
pub(super) struct PendingPings {
    waiters: HashMap<PeerId, Vec<PingReply>>,
}

impl PendingPings {
    pub(super) fn wait(&mut self, peer_id: PeerId, reply: PingReply) {
        self.waiters.entry(peer_id).or_default().push(reply);
    }

    pub(super) fn succeed(&mut self, peer_id: &PeerId, rtt: Duration) {
        for waiter in self.waiters.remove(peer_id).unwrap_or_default() {
            let _ = waiter.send(Ok(rtt));
        }
    }

    /// Answer every waiter for `peer_id` with an error and forget them
    pub(super) fn fail(&mut self, peer_id: &PeerId, error: impl Fn() -> NetworkError) {
        for waiter in self.waiters.remove(peer_id).unwrap_or_default() {
            let _ = waiter.send(Err(error()));
        }
    }
}

/// Owns the swarm; everything else reaches it through [`NodeCommand`]s
struct EventLoop {
    swarm: Swarm<NodeBehaviour>,
    topic: gossipsub::IdentTopic,
    command_rx: mpsc::Receiver<NodeCommand>,
    event_tx: mpsc::UnboundedSender<NodeEvent>,
    peer_book: PeerBook,
    connected_peers: HashSet<PeerId>,
    pending_dials: HashMap<ConnectionId, oneshot::Sender<Result<PeerId, DialFailure>>>,
    pending_pings: PendingPings,
    last_rtt: HashMap<PeerId, Duration>,
    max_connections: u32,
    auto_dial_interval: Duration,
    status_interval: Duration,
}

impl EventLoop {
    fn new(
        swarm: Swarm<NodeBehaviour>,
        command_rx: mpsc::Receiver<NodeCommand>,
        event_tx: mpsc::UnboundedSender<NodeEvent>,
        config: &NetworkConfig,
    ) -> Self {
        Self {
            swarm,
            topic: gossipsub::IdentTopic::new(CHAT_TOPIC),
            command_rx,
            event_tx,
            peer_book: PeerBook::new(),
            connected_peers: HashSet::new(),
            pending_dials: HashMap::new(),
            pending_pings: PendingPings::default(),
            last_rtt: HashMap::new(),
            max_connections: config.max_connections,
            auto_dial_interval: config.auto_dial_interval,
            status_interval: config.status_interval,
        }
    }

    async fn run(mut self) {
        use futures::StreamExt;

        let mut auto_dial = tokio::time::interval(self.auto_dial_interval);
        auto_dial.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status = tokio::time::interval(self.status_interval);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Handle swarm events
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
                // Handle commands
                cmd = self.command_rx.recv() => {
                    let keep_running = match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => false,
                    };
                    if !keep_running {
                        info!("Stopping P2P node");
                        break;
                    }
                }
                _ = auto_dial.tick() => self.auto_dial(),
                _ = status.tick() => self.log_status(),
            }
        }
    }

    fn emit(&self, event: NodeEvent) {
        // Nobody listening is fine: the node keeps serving commands.
        let _ = self.event_tx.send(event);
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<NodeBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {address}");
                self.emit(NodeEvent::Listening { address });
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Mdns(mdns::Event::Discovered(list))) => {
                let mut discovered: HashMap<PeerId, Vec<Multiaddr>> = HashMap::new();
                for (peer_id, addr) in list {
                    discovered.entry(peer_id).or_default().push(addr);
                }
                for (peer_id, addresses) in discovered {
                    let is_new = self.peer_book.update_peer(peer_id, addresses.clone());
                    debug!("mDNS discovered peer: {peer_id} (new: {is_new})");
                    self.emit(NodeEvent::PeerDiscovered {
                        peer: PeerInfo { peer_id, addresses },
                        is_new,
                    });
                }
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Mdns(mdns::Event::Expired(list))) => {
                for (peer_id, _) in list {
                    if self.peer_book.remove(&peer_id).is_some() {
                        debug!("mDNS peer expired: {peer_id}");
                        self.emit(NodeEvent::PeerExpired { peer_id });
                    }
                }
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => {
                self.emit(NodeEvent::MessageReceived {
                    origin: message.source,
                    propagation_source,
                    data: message.data,
                });
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Gossipsub(gossipsub::Event::Subscribed {
                peer_id,
                topic,
            })) => {
                self.emit(NodeEvent::PeerSubscribed {
                    peer_id,
                    topic: topic.into_string(),
                });
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Gossipsub(gossip_event)) => {
                debug!("Gossipsub: {:?}", gossip_event);
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!("Identified {peer_id}: {} listen addresses", info.listen_addrs.len());
                self.peer_book.update_peer(peer_id, info.listen_addrs);
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Ping(ping::Event { peer, result, .. })) => {
                match result {
                    Ok(rtt) => {
                        self.last_rtt.insert(peer, rtt);
                        self.pending_pings.succeed(&peer, rtt);
                    }
                    Err(e) => {
                        debug!("Ping to {peer} failed: {e}");
                        let reason = e.to_string();
                        self.pending_pings
                            .fail(&peer, || NetworkError::Ping(reason.clone()));
                    }
                }
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                ..
            } => {
                if endpoint.is_dialer() {
                    self.peer_book
                        .update_peer(peer_id, [endpoint.get_remote_address().clone()]);
                }
                if let Some(reply) = self.pending_dials.remove(&connection_id) {
                    let _ = reply.send(Ok(peer_id));
                }
                if self.connected_peers.insert(peer_id) {
                    info!("Connected to peer: {peer_id}");
                    self.emit(NodeEvent::PeerConnected {
                        peer_id,
                        total_peers: self.connected_peers.len(),
                    });
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                if num_established == 0 && self.connected_peers.remove(&peer_id) {
                    info!("Disconnected from peer: {peer_id}. Cause: {:?}", cause);
                    self.last_rtt.remove(&peer_id);
                    self.pending_pings
                        .fail(&peer_id, || NetworkError::NotConnected(peer_id));
                    self.emit(NodeEvent::PeerDisconnected {
                        peer_id,
                        total_peers: self.connected_peers.len(),
                    });
                }
            }
            SwarmEvent::OutgoingConnectionError {
                connection_id,
                peer_id,
                error,
            } => {
                let failure = DialFailure::from_dial_error(&error);
                match self.pending_dials.remove(&connection_id) {
                    Some(reply) => {
                        let _ = reply.send(Err(failure));
                    }
                    None => debug!("Auto-dial to {:?} failed ({}): {error}", peer_id, failure.category),
                }
            }
            SwarmEvent::IncomingConnectionError { error, .. } => {
                debug!("Incoming connection error: {error}");
            }
            SwarmEvent::ListenerError { error, .. } => {
                error!("Listener error: {error}");
            }
            _ => {}
        }
    }

    /// Returns `false` once the loop should stop
    fn handle_command(&mut self, command: NodeCommand) -> bool {
        match command {
            NodeCommand::Stop => return false,
            NodeCommand::Subscribe(reply) => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .subscribe(&self.topic)
                    .map(|_| ())
                    .map_err(|e| NetworkError::Subscription(e.to_string()));
                let _ = reply.send(result);
            }
            NodeCommand::Publish { data, reply } => {
                let outcome = match self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(self.topic.clone(), data)
                {
                    Ok(_) => PublishOutcome::Published,
                    Err(gossipsub::PublishError::InsufficientPeers) => PublishOutcome::NoSubscribers,
                    Err(e) => PublishOutcome::Failed(e.to_string()),
                };
                let _ = reply.send(outcome);
            }
            NodeCommand::Dial { target, reply } => self.dial(target, reply),
            NodeCommand::Ping { peer_id, reply } => {
                if !self.connected_peers.contains(&peer_id) {
                    let _ = reply.send(Err(NetworkError::NotConnected(peer_id)));
                } else if let Some(rtt) = self.last_rtt.get(&peer_id) {
                    let _ = reply.send(Ok(*rtt));
                } else {
                    self.pending_pings.wait(peer_id, reply);
                }
            }
            NodeCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
        true
    }

    fn dial(&mut self, target: DialTarget, reply: oneshot::Sender<Result<PeerId, DialFailure>>) {
        let opts = match target {
            DialTarget::Address(address) => {
                if let Some(peer_id) = peer_id_from_addr(&address) {
                    if self.swarm.is_connected(&peer_id) {
                        let _ = reply.send(Ok(peer_id));
                        return;
                    }
                }
                DialOpts::unknown_peer_id().address(address).build()
            }
            DialTarget::Peer(peer_id) => {
                if self.swarm.is_connected(&peer_id) {
                    let _ = reply.send(Ok(peer_id));
                    return;
                }
                DialOpts::peer_id(peer_id)
                    .addresses(self.peer_book.addresses(&peer_id))
                    .condition(PeerCondition::DisconnectedAndNotDialing)
                    .build()
            }
        };

        let connection_id = opts.connection_id();
        match self.swarm.dial(opts) {
            Ok(()) => {
                self.pending_dials.insert(connection_id, reply);
            }
            Err(e) => {
                warn!("Failed to dial: {e}");
                let _ = reply.send(Err(DialFailure::from_dial_error(&e)));
            }
        }
    }

    /// Dial known peers that are not connected, within the connection budget
    fn auto_dial(&mut self) {
        if self.peer_book.is_empty() {
            return;
        }
        let established = self.swarm.network_info().connection_counters().num_established();
        let budget = self.max_connections.saturating_sub(established) as usize;

        for peer in self.peer_book.dial_candidates(&self.connected_peers, budget) {
            let opts = DialOpts::peer_id(peer.peer_id)
                .addresses(peer.addresses)
                .condition(PeerCondition::DisconnectedAndNotDialing)
                .build();
            match self.swarm.dial(opts) {
                Ok(()) => debug!("Auto-dialing {}", peer.peer_id),
                Err(DialError::DialPeerConditionFalse(_)) => {}
                Err(e) => debug!("Auto-dial to {} not started: {e}", peer.peer_id),
            }
        }
    }

    fn log_status(&self) {
        let established = self.swarm.network_info().connection_counters().num_established();
        if established > 0 {
            info!("Status: {established} active connection(s)");
        }
    }

    fn status(&self) -> NodeStatus {
        let peer_id = *self.swarm.local_peer_id();
        NodeStatus {
            peer_id,
            listening_addresses: self
                .swarm
                .listeners()
                .map(|addr| with_peer_id(addr.clone(), &peer_id))
                .collect(),
            connections: self.swarm.network_info().connection_counters().num_established() as usize,
            connected_peer_ids: self.connected_peers.iter().copied().collect(),
            known_peers: self.peer_book.len(),
        }
    }
}

/// Cloneable handle for issuing commands to a running [`P2PNode`]
#[derive(Clone)]
pub struct NodeHandle {
    peer_id: PeerId,
    command_tx: mpsc::Sender<NodeCommand>,
}

impl NodeHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> NodeCommand,
    ) -> Result<T, NetworkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| NetworkError::NotRunning)?;
        reply_rx.await.map_err(|_| NetworkError::ReplyDropped)
    }

    async fn dial_target(&self, target: DialTarget) -> Result<PeerId, DialFailure> {
        match self.request(|reply| NodeCommand::Dial { target, reply }).await {
            Ok(result) => result,
            Err(e) => Err(DialFailure::new(DialCategory::Other, e.to_string())),
        }
    }

    /// Stop the node behind this handle
    pub async fn stop(&self) -> Result<(), NetworkError> {
        self.command_tx
            .send(NodeCommand::Stop)
            .await
            .map_err(|_| NetworkError::NotRunning)
    }
}

#[async_trait]
impl PeerNetwork for NodeHandle {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn subscribe(&self) -> Result<(), NetworkError> {
        self.request(NodeCommand::Subscribe).await?
    }

    async fn publish(&self, data: Vec<u8>) -> PublishOutcome {
        self.request(|reply| NodeCommand::Publish { data, reply })
            .await
            .unwrap_or_else(|e| PublishOutcome::Failed(e.to_string()))
    }

    async fn dial(&self, address: Multiaddr) -> Result<PeerId, DialFailure> {
        self.dial_target(DialTarget::Address(address)).await
    }

    async fn dial_peer(&self, peer_id: PeerId) -> Result<PeerId, DialFailure> {
        self.dial_target(DialTarget::Peer(peer_id)).await
    }

    async fn ping(&self, peer_id: PeerId) -> Result<Duration, NetworkError> {
        self.request(|reply| NodeCommand::Ping { peer_id, reply }).await?
    }

    async fn status(&self) -> Result<NodeStatus, NetworkError> {
        self.request(NodeCommand::Status).await
    }
}
