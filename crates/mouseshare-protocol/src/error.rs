//! Protocol and transport errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to bind listener: {0}")]
    Bind(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("handshake rejected by peer: {0}")]
    HandshakeRejected(String),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("incompatible protocol version: remote {remote}, local {local}")]
    VersionMismatch { remote: u16, local: u16 },

    #[error("malformed frame: {0}")]
    FrameMalformed(String),

    #[error("frame decryption failed")]
    DecryptFailed,

    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge { len: u32, max: u32 },

    #[error("serialisation error: {0}")]
    Serialization(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive stream closed unexpectedly")]
    ReceiveClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProtocolError {
    /// Whether this error is confined to a single frame. Frame-local errors
    /// drop the offending frame and leave the connection open; everything
    /// else tears the connection down.
    #[must_use]
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::FrameMalformed(_) | Self::DecryptFailed)
    }
}
