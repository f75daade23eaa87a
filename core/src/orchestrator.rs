//! Startup sequence, bootstrap dialing and reaction to node events.
//!
//! The orchestrator never owns the swarm. It talks to the node through
//! [`PeerNetwork`] and consumes the [`NodeEvent`] stream, so every failure
//! it sees ends up as a log line and never as an error of the process.

use std::sync::Arc;
use std::time::Duration;

use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::chat::TopicBridge;
use crate::network::dial::{dial_candidates, peer_id_from_addr, short_peer_id};
use crate::network::{
    DialFailure, NetworkError, NodeEvent, NodeStatus, PeerInfo, PeerNetwork, CHAT_TOPIC,
};

/// Delays and timeouts applied around network calls
#[derive(Debug, Clone)]
pub struct DialPolicy {
    /// Pause after start before anything is dialed
    pub settle_delay: Duration,
    /// Additional pause before the first bootstrap dial
    pub bootstrap_delay: Duration,
    /// Pause between discovering a peer and dialing it
    pub discovery_delay: Duration,
    pub dial_timeout: Duration,
    /// When to warn that a dial is still pending
    pub slow_dial_warning: Duration,
    pub ping_timeout: Duration,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
            bootstrap_delay: Duration::from_secs(2),
            discovery_delay: Duration::from_secs(2),
            dial_timeout: Duration::from_secs(30),
            slow_dial_warning: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    #[error("No bootstrap peer configured")]
    NotConfigured,
    #[error(transparent)]
    Dial(#[from] DialFailure),
}

pub struct Orchestrator {
    network: Arc<dyn PeerNetwork>,
    bridge: TopicBridge,
    bootstrap: Vec<Multiaddr>,
    policy: DialPolicy,
}

impl Orchestrator {
    pub fn new(
        network: Arc<dyn PeerNetwork>,
        bridge: TopicBridge,
        bootstrap: Vec<Multiaddr>,
        policy: DialPolicy,
    ) -> Self {
        Self {
            network,
            bridge,
            bootstrap,
            policy,
        }
    }

    pub fn has_bootstrap(&self) -> bool {
        !self.bootstrap.is_empty()
    }

    /// Settle, join the chat topic, print the banner and dial every
    /// bootstrap address once, in order.
    ///
    /// Only a failed subscription is reported; dial failures are logged.
    pub async fn bootstrap(&self) -> Result<(), NetworkError> {
        tokio::time::sleep(self.policy.settle_delay).await;

        self.network.subscribe().await?;
        info!("Subscribed to topic '{CHAT_TOPIC}'");

        match self.network.status().await {
            Ok(status) => announce(&status),
            Err(e) => warn!("Could not read listen addresses: {e}"),
        }

        if !self.has_bootstrap() {
            return Ok(());
        }

        info!("Waiting for services to be fully ready before dialing...");
        tokio::time::sleep(self.policy.bootstrap_delay).await;

        for addr in &self.bootstrap {
            info!("Dialing bootstrap peer at {addr}");
            if let Some(peer_id) = peer_id_from_addr(addr) {
                info!("Attempting connection to peer: {}...", short_peer_id(&peer_id));
            }

            match self.dial_with_timeout(addr.clone()).await {
                Ok(peer_id) => {
                    info!("Successfully established connection to bootstrap peer {peer_id}");
                    self.verify(peer_id).await;
                }
                Err(failure) => {
                    error!("Failed to dial bootstrap peer at {addr}");
                    error!("   Error: {failure}");
                    error!("   Likely cause ({}): {}", failure.category, failure.hint());
                }
            }
        }
        Ok(())
    }

    /// Dial the first bootstrap address once
    pub async fn reconnect(&self) -> Result<PeerId, ReconnectError> {
        let addr = self.bootstrap.first().ok_or(ReconnectError::NotConfigured)?;

        info!("Attempting to reconnect to bootstrap peer...");
        match self.dial_with_timeout(addr.clone()).await {
            Ok(peer_id) => {
                info!("Reconnection successful");
                Ok(peer_id)
            }
            Err(failure) => {
                error!("Reconnection failed: {failure}");
                Err(failure.into())
            }
        }
    }

    /// Consume node events until the node goes away
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<NodeEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("Node event stream closed");
    }

    pub async fn handle_event(self: &Arc<Self>, event: NodeEvent) {
        match event {
            NodeEvent::Listening { address } => debug!("New listen address: {address}"),
            NodeEvent::PeerDiscovered { peer, is_new } => {
                info!("Discovered peer: {}...", short_peer_id(&peer.peer_id));
                let addrs: Vec<String> = peer.addresses.iter().map(|a| a.to_string()).collect();
                info!("   Addresses: {}", addrs.join(", "));
                if is_new {
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        tokio::time::sleep(this.policy.discovery_delay).await;
                        this.connect_discovered(peer).await;
                    });
                }
            }
            NodeEvent::PeerExpired { peer_id } => debug!("Peer expired: {peer_id}"),
            NodeEvent::PeerConnected {
                peer_id,
                total_peers,
            } => {
                info!("Peer Connected: {peer_id}");
                info!("   Total connected peers: {total_peers}");
            }
            NodeEvent::PeerDisconnected {
                peer_id,
                total_peers,
            } => {
                info!("Peer Disconnected: {peer_id}");
                info!("   Total connected peers: {total_peers}");
            }
            NodeEvent::PeerSubscribed { peer_id, topic } => {
                info!("Peer {peer_id} subscribed to {topic}")
            }
            NodeEvent::MessageReceived {
                origin,
                propagation_source,
                data,
            } => {
                self.bridge.on_inbound(origin, propagation_source, &data).await;
            }
        }
    }

    /// Try the peer's first WebSocket address, then its first TCP address,
    /// then a dial by peer id. Returns whether a connection came up.
    pub async fn connect_discovered(&self, peer: PeerInfo) -> bool {
        let short = short_peer_id(&peer.peer_id);

        if let Ok(status) = self.network.status().await {
            if status.connected_peer_ids.contains(&peer.peer_id) {
                debug!("Already connected to {short}..., skipping discovery dial");
                return true;
            }
        }

        info!("Attempting to connect to discovered peer {short}...");
        for candidate in dial_candidates(&peer.peer_id, &peer.addresses) {
            info!("   Trying {} transport...", candidate.kind);
            match self.dial_with_timeout(candidate.address).await {
                Ok(_) => {
                    info!("Successfully connected via {}", candidate.kind);
                    return true;
                }
                Err(failure) => debug!("   {} dial failed: {failure}", candidate.kind),
            }
        }

        match self.dial_peer_with_timeout(peer.peer_id).await {
            Ok(_) => {
                info!("Successfully connected via peer ID");
                true
            }
            Err(failure) => {
                warn!(
                    "Connection attempt to {short}... failed, auto-dial will retry ({}): {}",
                    failure.category,
                    failure.hint()
                );
                false
            }
        }
    }

    async fn dial_with_timeout(&self, addr: Multiaddr) -> Result<PeerId, DialFailure> {
        self.bounded(self.network.dial(addr)).await
    }

    async fn dial_peer_with_timeout(&self, peer_id: PeerId) -> Result<PeerId, DialFailure> {
        self.bounded(self.network.dial_peer(peer_id)).await
    }

    /// Apply the dial timeout and the slow-dial warning to a pending dial
    async fn bounded<F>(&self, dial: F) -> Result<PeerId, DialFailure>
    where
        F: std::future::Future<Output = Result<PeerId, DialFailure>>,
    {
        tokio::pin!(dial);
        let slow = tokio::time::sleep(self.policy.slow_dial_warning);
        tokio::pin!(slow);
        let deadline = tokio::time::sleep(self.policy.dial_timeout);
        tokio::pin!(deadline);
        let mut warned = false;

        loop {
            tokio::select! {
                result = &mut dial => return result,
                _ = &mut slow, if !warned => {
                    warned = true;
                    warn!("Dial is taking longer than expected...");
                }
                _ = &mut deadline => return Err(DialFailure::timeout(self.policy.dial_timeout)),
            }
        }
    }

    /// Ping a freshly connected peer; failure is only logged
    async fn verify(&self, peer_id: PeerId) {
        match tokio::time::timeout(self.policy.ping_timeout, self.network.ping(peer_id)).await {
            Ok(Ok(rtt)) => info!("Ping successful, latency: {}ms", rtt.as_millis()),
            Ok(Err(e)) => info!("Ping test skipped (connection is still active): {e}"),
            Err(_) => info!("Ping test skipped (connection is still active): timed out"),
        }
    }
}

/// First loopback listen address, usable by another node on this host
pub fn loopback_bootstrap_addr(status: &NodeStatus) -> Option<&Multiaddr> {
    status
        .listening_addresses
        .iter()
        .find(|addr| matches!(addr.iter().next(), Some(Protocol::Ip4(ip)) if ip.is_loopback()))
}

fn announce(status: &NodeStatus) {
    info!("libp2p node started with Peer ID: {}", status.peer_id);
    for addr in &status.listening_addresses {
        info!("Listening on: {addr}");
    }
    if let Some(addr) = loopback_bootstrap_addr(status) {
        info!("Bootstrap is optional when mDNS is enabled; to bootstrap manually run:");
        info!("   disasternet --port 3002 --bootstrap {addr}");
    }
    info!("Protocols: gossipsub ({CHAT_TOPIC}), identify, ping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{MessageStore, WELCOME_MESSAGE};
    use crate::network::dial::{DialCategory, with_peer_id};
    use crate::network::fake::{Dialed, FakeDial, FakeNetwork};

    fn orchestrator(network: Arc<FakeNetwork>, bootstrap: Vec<Multiaddr>) -> Arc<Orchestrator> {
        let bridge = TopicBridge::new(
            network.clone(),
            "GuestUser-3001",
            MessageStore::with_welcome(WELCOME_MESSAGE),
        );
        Arc::new(Orchestrator::new(network, bridge, bootstrap, DialPolicy::default()))
    }

    fn bootstrap_addr(peer: &PeerId, port: u16) -> Multiaddr {
        format!("/ip4/127.0.0.1/tcp/{port}/p2p/{peer}").parse().unwrap()
    }

    fn unreachable() -> DialFailure {
        DialFailure::new(DialCategory::Unreachable, "Connection refused")
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_subscribes_without_dialing() {
        let network = Arc::new(FakeNetwork::new());
        let orch = orchestrator(network.clone(), vec![]);

        orch.bootstrap().await.unwrap();

        assert!(network.is_subscribed());
        assert!(network.dialed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_dials_every_address_despite_failures() {
        let network = Arc::new(FakeNetwork::new());
        let (peer_a, peer_b) = (PeerId::random(), PeerId::random());
        let addrs = vec![bootstrap_addr(&peer_a, 4001), bootstrap_addr(&peer_b, 4002)];
        network.script_dials([FakeDial::Fail(unreachable()), FakeDial::Succeed(peer_b)]);
        let orch = orchestrator(network.clone(), addrs.clone());

        orch.bootstrap().await.unwrap();

        assert_eq!(
            network.dialed(),
            vec![Dialed::Address(addrs[0].clone()), Dialed::Address(addrs[1].clone())]
        );
        assert!(network.status().await.unwrap().connected_peer_ids.contains(&peer_b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_waits_before_dialing() {
        let network = Arc::new(FakeNetwork::new());
        let peer = PeerId::random();
        network.script_dials([FakeDial::Succeed(peer)]);
        let orch = orchestrator(network.clone(), vec![bootstrap_addr(&peer, 4001)]);

        let started = tokio::time::Instant::now();
        orch.bootstrap().await.unwrap();

        // settle (1s) + bootstrap delay (2s)
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_dial_times_out() {
        let network = Arc::new(FakeNetwork::new());
        let peer = PeerId::random();
        network.script_dials([FakeDial::Hang]);
        let orch = orchestrator(network, vec![bootstrap_addr(&peer, 4001)]);

        let started = tokio::time::Instant::now();
        let result = orch.reconnect().await;

        match result {
            Err(ReconnectError::Dial(failure)) => {
                assert_eq!(failure.category, DialCategory::Timeout);
                assert_eq!(failure.to_string(), "Dial timeout after 30 seconds");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_reconnect_without_bootstrap() {
        let network = Arc::new(FakeNetwork::new());
        let orch = orchestrator(network.clone(), vec![]);

        assert!(!orch.has_bootstrap());
        assert_eq!(orch.reconnect().await, Err(ReconnectError::NotConfigured));
        assert!(network.dialed().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_dials_first_bootstrap_once() {
        let network = Arc::new(FakeNetwork::new());
        let peer = PeerId::random();
        let addr = bootstrap_addr(&peer, 4001);
        network.script_dials([FakeDial::Fail(unreachable())]);
        let orch = orchestrator(network.clone(), vec![addr.clone()]);

        assert_eq!(orch.reconnect().await, Err(ReconnectError::Dial(unreachable())));
        assert_eq!(network.dialed(), vec![Dialed::Address(addr)]);

        network.script_dials([FakeDial::Succeed(peer)]);
        assert_eq!(orch.reconnect().await, Ok(peer));
    }

    #[tokio::test]
    async fn test_discovered_peer_prefers_websocket() {
        let network = Arc::new(FakeNetwork::new());
        let peer = PeerId::random();
        let tcp: Multiaddr = "/ip4/192.168.1.7/tcp/4001".parse().unwrap();
        let ws: Multiaddr = "/ip4/192.168.1.7/tcp/4002/ws".parse().unwrap();
        network.script_dials([FakeDial::Succeed(peer)]);
        let orch = orchestrator(network.clone(), vec![]);

        let connected = orch
            .connect_discovered(PeerInfo {
                peer_id: peer,
                addresses: vec![tcp, ws.clone()],
            })
            .await;

        assert!(connected);
        assert_eq!(network.dialed(), vec![Dialed::Address(with_peer_id(ws, &peer))]);
    }

    #[tokio::test]
    async fn test_discovered_peer_falls_back_to_peer_id() {
        let network = Arc::new(FakeNetwork::new());
        let peer = PeerId::random();
        let tcp: Multiaddr = "/ip4/192.168.1.7/tcp/4001".parse().unwrap();
        let ws: Multiaddr = "/ip4/192.168.1.7/tcp/4002/ws".parse().unwrap();
        network.script_dials([
            FakeDial::Fail(unreachable()),
            FakeDial::Fail(unreachable()),
            FakeDial::Succeed(peer),
        ]);
        let orch = orchestrator(network.clone(), vec![]);

        let connected = orch
            .connect_discovered(PeerInfo {
                peer_id: peer,
                addresses: vec![tcp.clone(), ws.clone()],
            })
            .await;

        assert!(connected);
        assert_eq!(
            network.dialed(),
            vec![
                Dialed::Address(with_peer_id(ws, &peer)),
                Dialed::Address(with_peer_id(tcp, &peer)),
                Dialed::Peer(peer),
            ]
        );
    }

    #[tokio::test]
    async fn test_discovered_peer_failure_is_not_fatal() {
        let network = Arc::new(FakeNetwork::new());
        let orch = orchestrator(network.clone(), vec![]);
        let peer = PeerId::random();

        // No addresses and no scripted dials: only the peer id dial happens
        let connected = orch
            .connect_discovered(PeerInfo {
                peer_id: peer,
                addresses: vec![],
            })
            .await;

        assert!(!connected);
        assert_eq!(network.dialed(), vec![Dialed::Peer(peer)]);
    }

    #[tokio::test]
    async fn test_connected_peer_is_not_redialed() {
        let network = Arc::new(FakeNetwork::new());
        let peer = PeerId::random();
        network.connect(peer);
        let orch = orchestrator(network.clone(), vec![]);

        assert!(
            orch.connect_discovered(PeerInfo {
                peer_id: peer,
                addresses: vec!["/ip4/10.0.0.2/tcp/4001".parse().unwrap()],
            })
            .await
        );
        assert!(network.dialed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_discovery_dials_after_delay() {
        let network = Arc::new(FakeNetwork::new());
        let peer = PeerId::random();
        network.script_dials([FakeDial::Succeed(peer)]);
        let orch = orchestrator(network.clone(), vec![]);

        orch.handle_event(NodeEvent::PeerDiscovered {
            peer: PeerInfo {
                peer_id: peer,
                addresses: vec!["/ip4/10.0.0.2/tcp/4001".parse().unwrap()],
            },
            is_new: true,
        })
        .await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(network.dialed().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(network.dialed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_discovery_is_not_dialed() {
        let network = Arc::new(FakeNetwork::new());
        let orch = orchestrator(network.clone(), vec![]);

        orch.handle_event(NodeEvent::PeerDiscovered {
            peer: PeerInfo {
                peer_id: PeerId::random(),
                addresses: vec!["/ip4/10.0.0.2/tcp/4001".parse().unwrap()],
            },
            is_new: false,
        })
        .await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(network.dialed().is_empty());
    }

    #[tokio::test]
    async fn test_message_events_reach_the_store() {
        let network = Arc::new(FakeNetwork::new());
        let local = network.local_peer_id();
        let orch = orchestrator(network, vec![]);
        let remote = PeerId::random();
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(NodeEvent::MessageReceived {
            origin: Some(local),
            propagation_source: remote,
            data: b"GuestUser-3001: mine".to_vec(),
        })
        .unwrap();
        tx.send(NodeEvent::MessageReceived {
            origin: Some(remote),
            propagation_source: remote,
            data: b"GuestUser-3002: theirs".to_vec(),
        })
        .unwrap();
        drop(tx);

        Arc::clone(&orch).run(rx).await;

        assert_eq!(
            orch.bridge.store().snapshot().await,
            vec![WELCOME_MESSAGE, "GuestUser-3002: theirs"]
        );
    }

    #[test]
    fn test_loopback_bootstrap_addr() {
        let peer = PeerId::random();
        let status = NodeStatus {
            peer_id: peer,
            listening_addresses: vec![
                format!("/ip4/192.168.1.3/tcp/4001/p2p/{peer}").parse().unwrap(),
                format!("/ip4/127.0.0.1/tcp/4001/p2p/{peer}").parse().unwrap(),
                format!("/ip4/127.0.0.1/tcp/4002/ws/p2p/{peer}").parse().unwrap(),
            ],
            connections: 0,
            connected_peer_ids: vec![],
            known_peers: 0,
        };

        assert_eq!(
            loopback_bootstrap_addr(&status).map(|a| a.to_string()),
            Some(format!("/ip4/127.0.0.1/tcp/4001/p2p/{peer}"))
        );
    }
}
