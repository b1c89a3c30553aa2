//! Clipboard errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard content of {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    #[error("clipboard backend error: {0}")]
    Backend(String),
}
