//! Scriptable in-process [`PeerNetwork`] for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};

use crate::network::api::{NodeStatus, PeerNetwork, PublishOutcome};
use crate::network::dial::{DialCategory, DialFailure};
use crate::network::error::NetworkError;

/// What the next dial should do
#[derive(Debug, Clone)]
pub(crate) enum FakeDial {
    Succeed(PeerId),
    Fail(DialFailure),
    /// Never resolves
    Hang,
}

/// A dial the fake saw, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Dialed {
    Address(Multiaddr),
    Peer(PeerId),
}

pub(crate) struct FakeNetwork {
    peer_id: PeerId,
    publish_outcome: Mutex<PublishOutcome>,
    published: Mutex<Vec<Vec<u8>>>,
    dial_script: Mutex<VecDeque<FakeDial>>,
    dialed: Mutex<Vec<Dialed>>,
    connected: Mutex<Vec<PeerId>>,
    subscribed: AtomicBool,
    status_broken: AtomicBool,
}

impl FakeNetwork {
    pub(crate) fn new() -> Self {
        Self {
            peer_id: PeerId::random(),
            publish_outcome: Mutex::new(PublishOutcome::Published),
            published: Mutex::new(Vec::new()),
            dial_script: Mutex::new(VecDeque::new()),
            dialed: Mutex::new(Vec::new()),
            connected: Mutex::new(Vec::new()),
            subscribed: AtomicBool::new(false),
            status_broken: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_publish_outcome(&self, outcome: PublishOutcome) {
        *self.publish_outcome.lock().unwrap() = outcome;
    }

    pub(crate) fn published(&self) -> Vec<Vec<u8>> {
        self.published.lock().unwrap().clone()
    }

    /// Queue dial results; unscripted dials fail with `NoAddresses`
    pub(crate) fn script_dials(&self, dials: impl IntoIterator<Item = FakeDial>) {
        self.dial_script.lock().unwrap().extend(dials);
    }

    pub(crate) fn dialed(&self) -> Vec<Dialed> {
        self.dialed.lock().unwrap().clone()
    }

    pub(crate) fn connect(&self, peer_id: PeerId) {
        self.connected.lock().unwrap().push(peer_id);
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub(crate) fn break_status(&self) {
        self.status_broken.store(true, Ordering::SeqCst);
    }

    async fn scripted_dial(&self, dialed: Dialed) -> Result<PeerId, DialFailure> {
        self.dialed.lock().unwrap().push(dialed);
        let next = self.dial_script.lock().unwrap().pop_front();
        match next {
            Some(FakeDial::Succeed(peer_id)) => {
                self.connect(peer_id);
                Ok(peer_id)
            }
            Some(FakeDial::Fail(failure)) => Err(failure),
            Some(FakeDial::Hang) => std::future::pending().await,
            None => Err(DialFailure::new(DialCategory::NoAddresses, "no addresses")),
        }
    }
}

#[async_trait]
impl PeerNetwork for FakeNetwork {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn subscribe(&self) -> Result<(), NetworkError> {
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, data: Vec<u8>) -> PublishOutcome {
        self.published.lock().unwrap().push(data);
        self.publish_outcome.lock().unwrap().clone()
    }

    async fn dial(&self, address: Multiaddr) -> Result<PeerId, DialFailure> {
        self.scripted_dial(Dialed::Address(address)).await
    }

    async fn dial_peer(&self, peer_id: PeerId) -> Result<PeerId, DialFailure> {
        self.scripted_dial(Dialed::Peer(peer_id)).await
    }

    async fn ping(&self, peer_id: PeerId) -> Result<Duration, NetworkError> {
        if self.connected.lock().unwrap().contains(&peer_id) {
            Ok(Duration::from_millis(3))
        } else {
            Err(NetworkError::NotConnected(peer_id))
        }
    }

    async fn status(&self) -> Result<NodeStatus, NetworkError> {
        if self.status_broken.load(Ordering::SeqCst) {
            return Err(NetworkError::NotRunning);
        }
        let connected = self.connected.lock().unwrap().clone();
        let listen: Multiaddr = format!("/ip4/127.0.0.1/tcp/4001/p2p/{}", self.peer_id)
            .parse()
            .unwrap();
        Ok(NodeStatus {
            peer_id: self.peer_id,
            listening_addresses: vec![listen],
            connections: connected.len(),
            known_peers: connected.len(),
            connected_peer_ids: connected,
        })
    }
}
