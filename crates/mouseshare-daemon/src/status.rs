//! User-visible daemon status, published through a watch channel.

use mouseshare_types::PeerId;

/// Snapshot of what the daemon is doing, for the UI and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonStatus {
    /// One-line human-readable status.
    pub message: String,
    pub connected_peers: usize,
    /// Peer we are forwarding input to, if any.
    pub controlling: Option<PeerId>,
    /// Peer forwarding input to us, if any.
    pub controlled_by: Option<PeerId>,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            message: "Running".to_string(),
            connected_peers: 0,
            controlling: None,
            controlled_by: None,
        }
    }
}
