//! Framed TCP transport and wire protocol for mouseshare.
//!
//! This crate handles TCP connection management, message framing and
//! optional AEAD sealing (via [`Codec`]), session-key derivation from the
//! shared password, and the connection handshake.

pub mod codec;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod transport;

pub use codec::{Codec, MAX_FRAME_SIZE};
pub use connection::{Connection, FrameReceiver, FrameSender};
pub use crypto::SessionCipher;
pub use error::ProtocolError;
pub use handshake::{accept_handshake, initiate_handshake, HandshakePeer, HANDSHAKE_TIMEOUT};
pub use transport::{TcpTransport, DEFAULT_PORT};
