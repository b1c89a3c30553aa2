//! Peer records and their lifecycle.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Instant;

use mouseshare_discovery::DiscoveredPeer;
use mouseshare_types::{PeerId, ScreenSize};

/// Observable lifecycle state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Seen via mDNS, no connection yet.
    Discovered,
    /// Outbound connection and handshake in flight.
    Connecting,
    /// Handshake complete, idle.
    Connected,
    /// We are forwarding input to this peer.
    Controlling,
    /// This peer is forwarding input to us.
    Controlled,
    /// Transport closed; record kept until the mDNS record is withdrawn.
    Disconnected,
    /// Last connection attempt failed.
    Error,
}

impl PeerState {
    /// Whether a session link to this peer exists.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Controlling | Self::Controlled)
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discovered => "Discovered",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Controlling => "Controlling",
            Self::Controlled => "Controlled",
            Self::Disconnected => "Disconnected",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Everything the controller knows about one peer.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    pub endpoint: Option<SocketAddr>,
    pub screen: ScreenSize,
    pub state: PeerState,
    pub last_seen: Option<Instant>,
    /// Link-quality counters.
    pub packets_sent: u64,
    pub packets_received: u64,
    pub sequence_gaps: u64,
}

impl Peer {
    #[must_use]
    pub fn new(id: PeerId, name: String, screen: ScreenSize) -> Self {
        Self {
            id,
            name,
            endpoint: None,
            screen,
            state: PeerState::Discovered,
            last_seen: None,
            packets_sent: 0,
            packets_received: 0,
            sequence_gaps: 0,
        }
    }

    /// Time since the peer last produced a packet, if it ever has.
    #[must_use]
    pub fn silence(&self, now: Instant) -> Option<std::time::Duration> {
        self.last_seen.map(|seen| now.duration_since(seen))
    }
}

/// Controller-owned authoritative peer records.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, Peer>,
}

impl PeerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    pub fn remove(&mut self, id: PeerId) -> Option<Peer> {
        self.peers.remove(&id)
    }

    /// Create or refresh a record from a discovery announcement.
    pub fn upsert_discovered(&mut self, discovered: &DiscoveredPeer) -> &mut Peer {
        let peer = self
            .peers
            .entry(discovered.peer_id)
            .or_insert_with(|| {
                Peer::new(
                    discovered.peer_id,
                    discovered.name.clone(),
                    discovered.screen,
                )
            });
        peer.name.clone_from(&discovered.name);
        peer.endpoint = Some(discovered.address);
        peer.screen = discovered.screen;
        if peer.state == PeerState::Disconnected || peer.state == PeerState::Error {
            peer.state = PeerState::Discovered;
        }
        peer
    }

    /// Create or refresh a record from a completed handshake.
    pub fn upsert_connected(
        &mut self,
        id: PeerId,
        name: &str,
        screen: ScreenSize,
        endpoint: Option<SocketAddr>,
    ) -> &mut Peer {
        let peer = self
            .peers
            .entry(id)
            .or_insert_with(|| Peer::new(id, name.to_string(), screen));
        peer.name = name.to_string();
        peer.screen = screen;
        if endpoint.is_some() {
            peer.endpoint = endpoint;
        }
        peer.state = PeerState::Connected;
        peer.last_seen = Some(Instant::now());
        peer
    }

    /// Note activity from a peer.
    pub fn mark_seen(&mut self, id: PeerId, now: Instant) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.last_seen = Some(now);
        }
    }

    /// Ids of peers with a live session link.
    #[must_use]
    pub fn connected_ids(&self) -> HashSet<PeerId> {
        self.peers
            .values()
            .filter(|p| p.state.is_connected())
            .map(|p| p.id)
            .collect()
    }

    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.state.is_connected())
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovered(id: PeerId) -> DiscoveredPeer {
        DiscoveredPeer {
            peer_id: id,
            name: "laptop".to_string(),
            address: "192.168.1.42:24801".parse().unwrap(),
            screen: ScreenSize::new(1920, 1080),
        }
    }

    #[test]
    fn discovery_creates_then_refreshes() {
        let mut registry = PeerRegistry::new();
        let id = PeerId::new();

        registry.upsert_discovered(&discovered(id));
        assert_eq!(registry.get(id).unwrap().state, PeerState::Discovered);

        // A re-announcement with a new endpoint wins.
        let mut update = discovered(id);
        update.address = "192.168.1.99:24801".parse().unwrap();
        registry.upsert_discovered(&update);
        assert_eq!(
            registry.get(id).unwrap().endpoint,
            Some("192.168.1.99:24801".parse().unwrap())
        );
    }

    #[test]
    fn rediscovery_revives_disconnected_peer() {
        let mut registry = PeerRegistry::new();
        let id = PeerId::new();
        registry.upsert_discovered(&discovered(id));
        registry.get_mut(id).unwrap().state = PeerState::Disconnected;

        registry.upsert_discovered(&discovered(id));
        assert_eq!(registry.get(id).unwrap().state, PeerState::Discovered);
    }

    #[test]
    fn discovery_does_not_demote_connected_peer() {
        let mut registry = PeerRegistry::new();
        let id = PeerId::new();
        registry.upsert_connected(id, "laptop", ScreenSize::new(1920, 1080), None);

        registry.upsert_discovered(&discovered(id));
        assert_eq!(registry.get(id).unwrap().state, PeerState::Connected);
    }

    #[test]
    fn connected_ids_cover_active_states() {
        let mut registry = PeerRegistry::new();
        let a = PeerId::new();
        let b = PeerId::new();
        let c = PeerId::new();
        registry.upsert_connected(a, "a", ScreenSize::new(1, 1), None);
        registry.upsert_connected(b, "b", ScreenSize::new(1, 1), None);
        registry.get_mut(b).unwrap().state = PeerState::Controlling;
        registry.upsert_discovered(&discovered(c));

        let connected = registry.connected_ids();
        assert!(connected.contains(&a));
        assert!(connected.contains(&b));
        assert!(!connected.contains(&c));
        assert_eq!(registry.connected_count(), 2);
    }

    #[test]
    fn silence_measures_from_last_seen() {
        let mut registry = PeerRegistry::new();
        let id = PeerId::new();
        registry.upsert_connected(id, "a", ScreenSize::new(1, 1), None);
        let then = Instant::now();
        registry.mark_seen(id, then);
        let silence = registry
            .get(id)
            .unwrap()
            .silence(then + std::time::Duration::from_secs(3))
            .unwrap();
        assert_eq!(silence, std::time::Duration::from_secs(3));
    }
}
