//! Wire format: length-prefixed frames, optionally AEAD-sealed.
//!
//! Each message on the wire is:
//!   [4 bytes big-endian length][body]
//! where the body is a tagged JSON [`WireMessage`], or (with encryption
//! enabled) a sealed blob whose plaintext is that JSON.

use mouseshare_types::WireMessage;

use crate::crypto::SessionCipher;
use crate::error::ProtocolError;

/// Maximum frame body size (10 MiB). A larger advertised length drops the
/// connection.
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Encodes and decodes frame bodies for one connection.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    cipher: Option<SessionCipher>,
}

impl Codec {
    /// Codec for an unencrypted session.
    #[must_use]
    pub fn plaintext() -> Self {
        Self { cipher: None }
    }

    /// Codec sealing every frame with a key derived from `password`.
    #[must_use]
    pub fn encrypted(password: &str) -> Self {
        Self {
            cipher: Some(SessionCipher::derive(password)),
        }
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encode a message into a complete frame, length prefix included.
    pub fn encode(&self, msg: &WireMessage) -> Result<Vec<u8>, ProtocolError> {
        let payload =
            serde_json::to_vec(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        let body = match &self.cipher {
            Some(cipher) => cipher.seal(&payload)?,
            None => payload,
        };

        let len = u32::try_from(body.len())
            .map_err(|_| ProtocolError::Serialization("message too large".to_string()))?;
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a frame body (without the length prefix).
    pub fn decode(&self, body: &[u8]) -> Result<WireMessage, ProtocolError> {
        let plaintext;
        let payload = match &self.cipher {
            Some(cipher) => {
                plaintext = cipher.open(body)?;
                plaintext.as_slice()
            }
            None => body,
        };
        serde_json::from_slice(payload).map_err(|e| ProtocolError::FrameMalformed(e.to_string()))
    }
}
