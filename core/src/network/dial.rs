//! Dial failures, their categories and the address preference order
//! used when connecting to a discovered peer.

use std::fmt;
use std::time::Duration;

use libp2p::{
    core::transport::TransportError,
    multiaddr::Protocol,
    swarm::DialError,
    Multiaddr, PeerId,
};

/// Coarse classification of a failed dial, used to pick a log hint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialCategory {
    Timeout,
    Unreachable,
    NegotiationFailed,
    PeerMismatch,
    Denied,
    NoAddresses,
    InvalidAddress,
    AlreadyDialing,
    Other,
}

impl DialCategory {
    /// Classify a free-form error message by the words it contains.
    pub fn from_message(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("timed out") || msg.contains("timeout") {
            DialCategory::Timeout
        } else if msg.contains("negotiat") || msg.contains("handshake") || msg.contains("noise") {
            DialCategory::NegotiationFailed
        } else if msg.contains("refused")
            || msg.contains("unreachable")
            || msg.contains("no route")
            || msg.contains("reset")
            || msg.contains("not available")
        {
            DialCategory::Unreachable
        } else if msg.contains("multiaddr") && msg.contains("not supported") {
            DialCategory::InvalidAddress
        } else {
            DialCategory::Other
        }
    }

    /// Operator-facing explanation logged next to the raw error
    pub fn hint(&self) -> &'static str {
        match self {
            DialCategory::Timeout => "the remote peer did not answer in time",
            DialCategory::Unreachable => {
                "the remote peer is not running, or a firewall/network issue blocks the connection"
            }
            DialCategory::NegotiationFailed => {
                "protocol negotiation failed; the peer may run incompatible services or still be initialising"
            }
            DialCategory::PeerMismatch => "the address belongs to a different peer id than expected",
            DialCategory::Denied => "the local connection limit was reached",
            DialCategory::NoAddresses => "no known addresses for this peer yet",
            DialCategory::InvalidAddress => "the address is not a supported multiaddr",
            DialCategory::AlreadyDialing => "a dial to this peer is already in progress",
            DialCategory::Other => "unexpected dial failure",
        }
    }
}

impl fmt::Display for DialCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialCategory::Timeout => "timeout",
            DialCategory::Unreachable => "unreachable",
            DialCategory::NegotiationFailed => "negotiation failed",
            DialCategory::PeerMismatch => "peer mismatch",
            DialCategory::Denied => "denied",
            DialCategory::NoAddresses => "no addresses",
            DialCategory::InvalidAddress => "invalid address",
            DialCategory::AlreadyDialing => "already dialing",
            DialCategory::Other => "other",
        };
        f.write_str(name)
    }
}

/// A dial that did not produce a connection.
///
/// Every category is treated as retryable: the auto-dial timer keeps trying
/// known peers regardless of why the last attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{detail}")]
pub struct DialFailure {
    pub category: DialCategory,
    pub detail: String,
}

impl DialFailure {
    pub fn new(category: DialCategory, detail: impl Into<String>) -> Self {
        Self {
            category,
            detail: detail.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            DialCategory::Timeout,
            format!("Dial timeout after {} seconds", after.as_secs()),
        )
    }

    pub fn from_dial_error(error: &DialError) -> Self {
        let detail = error.to_string();
        let category = match error {
            DialError::NoAddresses => DialCategory::NoAddresses,
            DialError::DialPeerConditionFalse(_) => DialCategory::AlreadyDialing,
            DialError::WrongPeerId { .. } | DialError::LocalPeerId { .. } => DialCategory::PeerMismatch,
            DialError::Denied { .. } => DialCategory::Denied,
            DialError::Aborted => DialCategory::Other,
            DialError::Transport(errors) => transport_category(errors),
        };
        Self { category, detail }
    }

    pub fn hint(&self) -> &'static str {
        self.category.hint()
    }
}

fn transport_category(errors: &[(Multiaddr, TransportError<std::io::Error>)]) -> DialCategory {
    let mut categories = errors.iter().map(|(_, error)| match error {
        TransportError::MultiaddrNotSupported(_) => DialCategory::InvalidAddress,
        TransportError::Other(e) => DialCategory::from_message(&e.to_string()),
    });
    let first = categories.next().unwrap_or(DialCategory::NoAddresses);
    // Report the most specific cause when addresses disagree.
    categories.fold(first, |acc, next| match (acc, next) {
        (DialCategory::Other, other) | (DialCategory::InvalidAddress, other) => other,
        (acc, _) => acc,
    })
}

/// Transport flavour of a dial candidate, tried in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportKind {
    WebSocket,
    Tcp,
}

impl TransportKind {
    pub fn of(addr: &Multiaddr) -> Self {
        if addr
            .iter()
            .any(|p| matches!(p, Protocol::Ws(_) | Protocol::Wss(_)))
        {
            TransportKind::WebSocket
        } else {
            TransportKind::Tcp
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WebSocket => f.write_str("WebSocket"),
            TransportKind::Tcp => f.write_str("TCP"),
        }
    }
}

/// One address to try when connecting to a discovered peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialCandidate {
    pub kind: TransportKind,
    pub address: Multiaddr,
}

/// Pick the first WebSocket and the first TCP address of a peer, in that
/// order, each ending in `/p2p/<peer>`.
pub fn dial_candidates(peer_id: &PeerId, addresses: &[Multiaddr]) -> Vec<DialCandidate> {
    [TransportKind::WebSocket, TransportKind::Tcp]
        .into_iter()
        .filter_map(|kind| {
            addresses
                .iter()
                .find(|a| TransportKind::of(a) == kind)
                .map(|a| DialCandidate {
                    kind,
                    address: with_peer_id(a.clone(), peer_id),
                })
        })
        .collect()
}

/// Append `/p2p/<peer>` unless the address already names a peer.
pub fn with_peer_id(addr: Multiaddr, peer_id: &PeerId) -> Multiaddr {
    if peer_id_from_addr(&addr).is_some() {
        addr
    } else {
        addr.with(Protocol::P2p(*peer_id))
    }
}

/// The peer id carried in a `/p2p/...` component, if any.
pub fn peer_id_from_addr(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|p| match p {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })
}

/// Shortened peer id for log lines
pub fn short_peer_id(peer_id: &PeerId) -> String {
    let s = peer_id.to_string();
    s.chars().take(12).collect()
}
