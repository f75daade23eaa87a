//! In-memory directory of peers this node has heard about

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use libp2p::{Multiaddr, PeerId};

/// Everything known about one remote peer
#[derive(Debug, Clone)]
pub struct KnownPeer {
    pub peer_id: PeerId,
    pub addresses: Vec<Multiaddr>,
    pub last_seen: Instant,
}

/// Peers learned from discovery, identify and connections.
///
/// Entries outlive disconnects; only an mDNS expiry drops them.
#[derive(Debug, Default)]
pub struct PeerBook {
    peers: HashMap<PeerId, KnownPeer>,
}

impl PeerBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `addresses` into the peer's record, creating it if needed.
    ///
    /// Returns `true` when the peer was not in the book before.
    pub fn update_peer(&mut self, peer_id: PeerId, addresses: impl IntoIterator<Item = Multiaddr>) -> bool {
        let now = Instant::now();
        let is_new = !self.peers.contains_key(&peer_id);

        let entry = self.peers.entry(peer_id).or_insert_with(|| KnownPeer {
            peer_id,
            addresses: Vec::new(),
            last_seen: now,
        });

        // Add new addresses without duplicates
        for addr in addresses {
            if !entry.addresses.contains(&addr) {
                entry.addresses.push(addr);
            }
        }
        entry.last_seen = now;

        is_new
    }

    pub fn remove(&mut self, peer_id: &PeerId) -> Option<KnownPeer> {
        self.peers.remove(peer_id)
    }

    pub fn addresses(&self, peer_id: &PeerId) -> Vec<Multiaddr> {
        self.peers
            .get(peer_id)
            .map(|p| p.addresses.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers with at least one address that are not in `connected`,
    /// least recently seen first, capped at `limit`.
    pub fn dial_candidates(&self, connected: &HashSet<PeerId>, limit: usize) -> Vec<KnownPeer> {
        let mut candidates: Vec<&KnownPeer> = self
            .peers
            .values()
            .filter(|p| !connected.contains(&p.peer_id) && !p.addresses.is_empty())
            .collect();
        candidates.sort_by_key(|p| p.last_seen);
        candidates.into_iter().take(limit).cloned().collect()
    }
}
