//! mDNS/DNS-SD zero-config discovery for mouseshare.
//!
//! Advertises this peer as `_mouseshare._tcp` in domain `local.` and browses
//! for other peers, emitting [`DiscoveryEvent`]s through a channel. The TXT
//! record carries the peer's identity and screen dimensions so that a remote
//! screen can be placed in the arrangement before any connection exists.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use mouseshare_types::{PeerId, ScreenSize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub mod error;

pub use error::DiscoveryError;

/// The mDNS service type every mouseshare peer registers and browses for.
pub const SERVICE_TYPE: &str = "_mouseshare._tcp.local.";

/// Value of the `version` TXT key.
pub const RECORD_VERSION: &str = "1.0";

/// Fixed backoff between retries when the mDNS daemon cannot be created.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// A peer observed on the network.
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    pub peer_id: PeerId,
    pub name: String,
    pub address: SocketAddr,
    pub screen: ScreenSize,
}

/// Events from the discovery subsystem.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A new peer appeared.
    PeerFound(DiscoveredPeer),
    /// A known peer re-announced; the latest endpoint wins.
    PeerUpdated(DiscoveredPeer),
    /// A previously known peer withdrew its record.
    PeerLost(PeerId),
}

/// Manages mDNS service registration and peer discovery.
///
/// mdns-sd runs its own background thread; its blocking receiver is bridged
/// into a tokio mpsc channel by a `spawn_blocking` task.
pub struct DiscoveryService {
    daemon: ServiceDaemon,
    service_fullname: String,
}

impl DiscoveryService {
    /// Register this peer and start browsing.
    ///
    /// Daemon creation is retried with a fixed 2 s backoff so a transient
    /// network stack hiccup at boot doesn't kill discovery for good.
    pub async fn start(
        peer_id: PeerId,
        name: &str,
        port: u16,
        screen: ScreenSize,
    ) -> Result<(Self, mpsc::Receiver<DiscoveryEvent>), DiscoveryError> {
        let daemon = create_daemon_with_backoff().await;

        let mut properties = HashMap::new();
        properties.insert("id".to_string(), peer_id.to_string());
        properties.insert("name".to_string(), name.to_string());
        properties.insert("version".to_string(), RECORD_VERSION.to_string());
        properties.insert("width".to_string(), screen.width.to_string());
        properties.insert("height".to_string(), screen.height.to_string());

        let host = format!("{}.local.", hostname_label());

        let service_info = ServiceInfo::new(SERVICE_TYPE, name, &host, "", port, properties)
            .map_err(|e| DiscoveryError::Registration(e.to_string()))?
            .enable_addr_auto();

        let service_fullname = service_info.get_fullname().to_string();

        daemon
            .register(service_info)
            .map_err(|e| DiscoveryError::Registration(e.to_string()))?;

        info!(id = %peer_id, name, port, "registered mDNS service");

        let browse_receiver = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| DiscoveryError::Browse(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel::<DiscoveryEvent>(64);
        let own_name = name.to_string();
        tokio::task::spawn_blocking(move || {
            browse_loop(browse_receiver, &event_tx, peer_id, &own_name);
        });

        Ok((
            Self {
                daemon,
                service_fullname,
            },
            event_rx,
        ))
    }

    /// Unregister our record and shut the mDNS daemon down.
    ///
    /// Both operations return confirmation receivers that must be drained,
    /// otherwise mdns-sd logs send-on-closed-channel errors.
    pub fn shutdown(self) {
        info!("unregistering mDNS service");
        match self.daemon.unregister(&self.service_fullname) {
            Ok(receiver) => {
                if let Err(e) = receiver.recv() {
                    debug!(error = %e, "no unregister confirmation");
                }
            }
            Err(e) => error!(error = %e, "failed to unregister mDNS service"),
        }
        match self.daemon.shutdown() {
            Ok(receiver) => {
                if let Err(e) = receiver.recv() {
                    debug!(error = %e, "no shutdown confirmation");
                }
            }
            Err(e) => error!(error = %e, "failed to shut down mDNS daemon"),
        }
    }
}

async fn create_daemon_with_backoff() -> ServiceDaemon {
    loop {
        match ServiceDaemon::new() {
            Ok(daemon) => return daemon,
            Err(e) => {
                warn!(error = %e, backoff = ?RETRY_BACKOFF, "mDNS daemon creation failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
    }
}

/// Blocking loop translating mdns-sd browse events into [`DiscoveryEvent`]s.
fn browse_loop(
    browse_receiver: mdns_sd::Receiver<ServiceEvent>,
    event_tx: &mpsc::Sender<DiscoveryEvent>,
    own_id: PeerId,
    own_name: &str,
) {
    // ServiceRemoved only carries the fullname, so remember which peer each
    // fullname resolved to. Records from multiple interfaces collapse into
    // one peer per name; `known` tracks the endpoint we last announced.
    let mut fullname_to_name: HashMap<String, String> = HashMap::new();
    let mut known: HashMap<String, DiscoveredPeer> = HashMap::new();

    while let Ok(event) = browse_receiver.recv() {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let Some(peer) = parse_record(&info) else {
                    continue;
                };
                if peer.peer_id == own_id || peer.name == own_name {
                    debug!("discovered our own record, skipping");
                    continue;
                }

                fullname_to_name.insert(info.get_fullname().to_string(), peer.name.clone());

                let event = match known.get(&peer.name) {
                    Some(previous)
                        if previous.peer_id == peer.peer_id
                            && previous.address == peer.address
                            && previous.screen == peer.screen =>
                    {
                        // Same record seen on another interface.
                        continue;
                    }
                    Some(_) => DiscoveryEvent::PeerUpdated(peer.clone()),
                    None => DiscoveryEvent::PeerFound(peer.clone()),
                };

                info!(id = %peer.peer_id, name = %peer.name, address = %peer.address, "peer resolved");
                known.insert(peer.name.clone(), peer);
                if event_tx.blocking_send(event).is_err() {
                    break;
                }
            }

            ServiceEvent::ServiceRemoved(_, fullname) => {
                let Some(name) = fullname_to_name.remove(&fullname) else {
                    debug!(service = %fullname, "removal for unknown record, ignoring");
                    continue;
                };
                if let Some(peer) = known.remove(&name) {
                    info!(id = %peer.peer_id, name = %name, "peer record withdrawn");
                    if event_tx
                        .blocking_send(DiscoveryEvent::PeerLost(peer.peer_id))
                        .is_err()
                    {
                        break;
                    }
                }
            }

            ServiceEvent::ServiceFound(service_type, fullname) => {
                debug!(service_type, fullname, "service found, resolving");
            }

            ServiceEvent::SearchStarted(service_type) => {
                debug!(service_type, "mDNS search started");
            }

            ServiceEvent::SearchStopped(service_type) => {
                debug!(service_type, "mDNS search stopped");
            }
        }
    }

    debug!("browse loop exited");
}

/// Extract a [`DiscoveredPeer`] from a resolved record; `None` if the record
/// lacks required TXT keys or a usable address.
fn parse_record(info: &ServiceInfo) -> Option<DiscoveredPeer> {
    let properties = info.get_properties();

    let id_str = properties.get_property_val_str("id")?;
    let peer_id = match PeerId::parse(id_str) {
        Ok(id) => id,
        Err(e) => {
            warn!(service = info.get_fullname(), error = %e, "record has invalid id, ignoring");
            return None;
        }
    };

    let name = properties.get_property_val_str("name")?.to_string();
    let width: u32 = properties.get_property_val_str("width")?.parse().ok()?;
    let height: u32 = properties.get_property_val_str("height")?.parse().ok()?;

    let port = info.get_port();
    let address = info
        .get_addresses()
        .iter()
        .find(|addr| !is_ipv6_link_local(addr))
        .map(|addr| SocketAddr::new(*addr, port))?;

    Some(DiscoveredPeer {
        peer_id,
        name,
        address,
        screen: ScreenSize::new(width, height),
    })
}

fn hostname_label() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "mouseshare".to_string())
}

/// IPv6 link-local addresses (fe80::/10) need a zone ID that `std::net`
/// cannot carry, so they always fail for TCP connects.
fn is_ipv6_link_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
        IpAddr::V4(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv6_link_local_detection() {
        let ll: IpAddr = "fe80::1".parse().unwrap();
        assert!(is_ipv6_link_local(&ll));

        let global: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(!is_ipv6_link_local(&global));

        let v4: IpAddr = "192.168.1.1".parse().unwrap();
        assert!(!is_ipv6_link_local(&v4));
    }
}
