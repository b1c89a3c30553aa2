//! Session-key derivation and packet sealing.
//!
//! Peers that share a password derive the same 256-bit AES-GCM key via
//! HKDF-SHA256. Sealed frames are laid out nonce ‖ ciphertext ‖ tag.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::ProtocolError;

/// Fixed application salt for HKDF. Changing this invalidates every
/// deployed password.
const KEY_SALT: &[u8] = b"mouseshare-session-salt-v1";

/// HKDF info string.
const KEY_INFO: &[u8] = b"session-key";

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// AEAD cipher for one session, derived from the shared password.
///
/// Rekeying is per-session: the key is derived once at startup and never
/// rotated while the process lives.
#[derive(Clone)]
pub struct SessionCipher {
    cipher: Aes256Gcm,
}

impl SessionCipher {
    /// Derive the session key from the shared password.
    #[must_use]
    pub fn derive(password: &str) -> Self {
        let hk = Hkdf::<Sha256>::new(Some(KEY_SALT), password.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(KEY_INFO, &mut key)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Seal a plaintext, prepending the random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| ProtocolError::Serialization("AEAD seal failed".to_string()))?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Open a sealed blob. Any truncation, tampering, or key mismatch maps
    /// to [`ProtocolError::DecryptFailed`].
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(ProtocolError::DecryptFailed);
        }
        let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
        self.cipher
            .decrypt(nonce, &blob[NONCE_LEN..])
            .map_err(|_| ProtocolError::DecryptFailed)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionCipher")
    }
}
