//! Input event types.
//!
//! Platform-agnostic representations of the events relayed between peers.
//! Mouse motion always travels as deltas: absolute positions from a screen
//! with different geometry are meaningless on the receiving host.

use serde::{Deserialize, Serialize};

use crate::screen::Edge;

/// Virtual keycode of the escape key that hands control back to the local
/// host while forwarding input to a remote.
pub const ESCAPE_KEYCODE: u16 = 53;

/// Modifier-key mask carried on every keyboard and mouse event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Self = Self(0);
    pub const SHIFT: Self = Self(1);
    pub const CONTROL: Self = Self(1 << 1);
    pub const ALT: Self = Self(1 << 2);
    pub const META: Self = Self(1 << 3);
    pub const CAPS_LOCK: Self = Self(1 << 4);

    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Modifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
    /// Extra buttons beyond the standard five. The value is the raw platform
    /// button number.
    Other(u16),
}

/// Clipboard content with a MIME tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardPayload {
    /// MIME type of the data, e.g. `text/plain` or `image/png`.
    pub mime: String,
    /// Raw bytes, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl ClipboardPayload {
    /// Create UTF-8 text clipboard content.
    #[must_use]
    pub fn text(s: &str) -> Self {
        Self {
            mime: "text/plain".to_string(),
            data: s.as_bytes().to_vec(),
        }
    }

    /// Try to interpret the data as UTF-8 text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if self.mime == "text/plain" {
            std::str::from_utf8(&self.data).ok()
        } else {
            None
        }
    }

    /// Size of the content in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// A platform-agnostic input or session event relayed between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputEvent {
    /// Relative mouse motion.
    MouseMove { dx: f64, dy: f64, modifiers: Modifiers },

    /// Mouse button press.
    MouseDown {
        button: MouseButton,
        click_count: u8,
        modifiers: Modifiers,
    },

    /// Mouse button release.
    MouseUp {
        button: MouseButton,
        click_count: u8,
        modifiers: Modifiers,
    },

    /// Relative mouse motion with a button held.
    MouseDrag {
        dx: f64,
        dy: f64,
        button: MouseButton,
        modifiers: Modifiers,
    },

    /// Scroll wheel, in pixel units.
    Scroll { dx: f64, dy: f64 },

    /// Key press.
    KeyDown {
        code: u16,
        /// Characters produced by the key under the sender's layout, when
        /// known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chars: Option<String>,
        modifiers: Modifiers,
    },

    /// Key release.
    KeyUp { code: u16, modifiers: Modifiers },

    /// Modifier state changed without an ordinary key event.
    FlagsChanged { modifiers: Modifiers },

    /// Clipboard contents changed on the sending host.
    ClipboardUpdate { payload: ClipboardPayload },

    /// The sender's cursor is entering this host's screen through `edge`.
    /// Entry coordinates are normalized to [0,1] over the receiving screen.
    ScreenEnter { edge: Edge, rel_x: f64, rel_y: f64 },

    /// The session through `edge` is ending; control returns to the receiver.
    ScreenLeave { edge: Edge },

    /// Acknowledges a `ScreenEnter`; the receiver is applying input.
    ScreenEnterAck { edge: Edge },

    /// Keepalive.
    Heartbeat,
}

impl InputEvent {
    /// Press/release events that must not sit in the batch queue.
    #[must_use]
    pub fn flushes_immediately(&self) -> bool {
        matches!(
            self,
            Self::MouseDown { .. } | Self::MouseUp { .. } | Self::KeyDown { .. } | Self::KeyUp { .. }
        )
    }

    /// Session-level events consumed by the controller rather than injected.
    #[must_use]
    pub fn is_session_meta(&self) -> bool {
        matches!(
            self,
            Self::ScreenEnter { .. }
                | Self::ScreenLeave { .. }
                | Self::ScreenEnterAck { .. }
                | Self::Heartbeat
                | Self::ClipboardUpdate { .. }
        )
    }
}

/// An event stamped with the sender's microsecond clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    /// Microsecond timestamp (monotonic, relative to session start).
    pub timestamp_us: u64,
    #[serde(flatten)]
    pub event: InputEvent,
}

impl TimedEvent {
    #[must_use]
    pub fn new(timestamp_us: u64, event: InputEvent) -> Self {
        Self {
            timestamp_us,
            event,
        }
    }
}

/// Serde helper: `Vec<u8>` as a base64 string, so clipboard blobs don't
/// explode into JSON number arrays.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
