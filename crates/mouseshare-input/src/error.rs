//! Input subsystem errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("permission denied registering event interceptor: {0}")]
    PermissionDenied(String),

    #[error("input backend error: {0}")]
    Backend(String),

    #[error("capture not started")]
    NotStarted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
