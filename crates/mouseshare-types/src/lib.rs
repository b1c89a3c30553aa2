//! Shared types for mouseshare.
//!
//! This crate contains all types shared across the mouseshare workspace:
//! input events, packets, handshake messages, peer identity, and screen
//! geometry.

pub mod event;
pub mod message;
pub mod peer;
pub mod screen;

pub use event::{
    ClipboardPayload, InputEvent, Modifiers, MouseButton, TimedEvent, ESCAPE_KEYCODE,
};
pub use message::{
    HandshakeRequest, HandshakeResponse, InputPacket, WireMessage, PROTOCOL_VERSION,
};
pub use peer::PeerId;
pub use screen::{Edge, Point, Rect, ScreenSize};
