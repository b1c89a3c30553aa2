//! Daemon errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] mouseshare_protocol::ProtocolError),

    #[error("input error: {0}")]
    Input(#[from] mouseshare_input::InputError),

    #[error("clipboard error: {0}")]
    Clipboard(#[from] mouseshare_clipboard::ClipboardError),

    #[error("discovery error: {0}")]
    Discovery(#[from] mouseshare_discovery::DiscoveryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
