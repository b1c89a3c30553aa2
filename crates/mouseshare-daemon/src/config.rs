//! User settings, persisted as JSON.

use std::collections::HashMap;

use mouseshare_protocol::DEFAULT_PORT;
use mouseshare_types::{Edge, PeerId};
use serde::{Deserialize, Serialize};

use crate::arrangement::ArrangedScreen;

/// Allowed values for `transition_delay_ms`.
pub const TRANSITION_DELAYS_MS: [u64; 4] = [0, 100, 250, 500];

/// All user-configurable state. Owned by the controller; everything else
/// reads copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Human-readable name advertised to peers.
    #[serde(default = "default_name")]
    pub name: String,

    /// Listener port shared by all peers.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub encryption_enabled: bool,

    /// Shared symmetric password; only meaningful with encryption on.
    #[serde(default)]
    pub password: String,

    #[serde(default = "default_true")]
    pub clipboard_sync_enabled: bool,

    #[serde(default = "default_true")]
    pub auto_connect: bool,

    /// Edge-arrival distance in pixels, 1–10.
    #[serde(default = "default_edge_threshold")]
    pub edge_threshold: f64,

    /// Corner suppression radius in pixels, 0–50.
    #[serde(default = "default_corner_dead_zone")]
    pub corner_dead_zone: f64,

    /// Dwell time before an edge-arrival fires: 0, 100, 250, or 500 ms.
    #[serde(default)]
    pub transition_delay_ms: u64,

    /// Primary display size used until the OS display list is known.
    #[serde(default = "default_screen_width")]
    pub screen_width: u32,

    #[serde(default = "default_screen_height")]
    pub screen_height: u32,

    /// Saved virtual screen layout.
    #[serde(default)]
    pub arrangement: Vec<ArrangedScreen>,

    /// Explicit edge-to-peer bindings. A compatibility fallback: arrangement
    /// adjacency wins whenever it produces a match. Auto-link writes here.
    #[serde(default)]
    pub edge_links: HashMap<Edge, PeerId>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: default_name(),
            port: default_port(),
            encryption_enabled: false,
            password: String::new(),
            clipboard_sync_enabled: true,
            auto_connect: true,
            edge_threshold: default_edge_threshold(),
            corner_dead_zone: default_corner_dead_zone(),
            transition_delay_ms: 0,
            screen_width: default_screen_width(),
            screen_height: default_screen_height(),
            arrangement: Vec::new(),
            edge_links: HashMap::new(),
        }
    }
}

impl Settings {
    /// Clamp every field into its documented range. Applied after load so a
    /// hand-edited file can't push the engine outside tested bounds.
    pub fn clamp_ranges(&mut self) {
        self.edge_threshold = self.edge_threshold.clamp(1.0, 10.0);
        self.corner_dead_zone = self.corner_dead_zone.clamp(0.0, 50.0);
        if !TRANSITION_DELAYS_MS.contains(&self.transition_delay_ms) {
            self.transition_delay_ms = *TRANSITION_DELAYS_MS
                .iter()
                .min_by_key(|allowed| allowed.abs_diff(self.transition_delay_ms))
                .unwrap_or(&0);
        }
    }
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "mouseshare".to_string())
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_edge_threshold() -> f64 {
    1.0
}

fn default_corner_dead_zone() -> f64 {
    10.0
}

fn default_screen_width() -> u32 {
    1920
}

fn default_screen_height() -> u32 {
    1080
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_serialize() {
        let settings = Settings::default();
        let json = serde_json::to_string_pretty(&settings).unwrap();
        assert!(json.contains("\"port\": 24801"));
        assert!(json.contains("\"edge_threshold\": 1.0"));
    }

    #[test]
    fn parse_partial_settings() {
        let json = r#"{
            "name": "workstation-left",
            "encryption_enabled": true,
            "password": "hunter2",
            "transition_delay_ms": 250
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.name, "workstation-left");
        assert!(settings.encryption_enabled);
        assert_eq!(settings.transition_delay_ms, 250);
        // Omitted fields take defaults.
        assert_eq!(settings.port, 24801);
        assert!(settings.auto_connect);
    }

    #[test]
    fn clamp_pulls_fields_into_range() {
        let mut settings = Settings {
            edge_threshold: 0.0,
            corner_dead_zone: 400.0,
            transition_delay_ms: 180,
            ..Settings::default()
        };
        settings.clamp_ranges();
        assert!((settings.edge_threshold - 1.0).abs() < f64::EPSILON);
        assert!((settings.corner_dead_zone - 50.0).abs() < f64::EPSILON);
        assert_eq!(settings.transition_delay_ms, 250);
    }

    #[test]
    fn edge_links_roundtrip_as_json() {
        let mut settings = Settings::default();
        let peer = PeerId::new();
        settings.edge_links.insert(Edge::Left, peer);
        let json = serde_json::to_string(&settings).unwrap();
        let decoded: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.edge_links.get(&Edge::Left), Some(&peer));
    }
}
