//! Discovery errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("mDNS daemon error: {0}")]
    Mdns(String),

    #[error("failed to register service: {0}")]
    Registration(String),

    #[error("failed to browse for services: {0}")]
    Browse(String),
}
