//! Settings loading and persisted identity.

use std::path::PathBuf;

use mouseshare_types::PeerId;
use tracing::info;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::DaemonError;

/// Load settings from the given path, or the default location. Missing file
/// means defaults; loaded values are clamped into range.
pub fn load_settings(path: Option<&str>) -> Result<Settings, DaemonError> {
    let settings_path = match path {
        Some(p) => PathBuf::from(p),
        None => default_settings_path(),
    };

    let mut settings = if settings_path.exists() {
        let content = std::fs::read_to_string(&settings_path)
            .map_err(|e| DaemonError::Config(format!("failed to read settings: {e}")))?;
        let settings: Settings = serde_json::from_str(&content)
            .map_err(|e| DaemonError::Config(format!("failed to parse settings: {e}")))?;
        info!(path = %settings_path.display(), "loaded settings");
        settings
    } else {
        info!("no settings file found, using defaults");
        Settings::default()
    };

    settings.clamp_ranges();
    Ok(settings)
}

/// Load or create the persistent local peer ID.
pub fn load_or_create_peer_id() -> Result<PeerId, DaemonError> {
    let dir = config_dir();
    let id_path = dir.join("peer-id");

    if id_path.exists() {
        let content = std::fs::read_to_string(&id_path)
            .map_err(|e| DaemonError::Config(format!("failed to read peer-id: {e}")))?;
        let uuid: Uuid = content
            .trim()
            .parse()
            .map_err(|e| DaemonError::Config(format!("invalid peer-id: {e}")))?;
        info!(id = %uuid, "loaded peer ID");
        Ok(PeerId::from_uuid(uuid))
    } else {
        std::fs::create_dir_all(&dir)
            .map_err(|e| DaemonError::Config(format!("failed to create config dir: {e}")))?;

        let id = PeerId::new();
        std::fs::write(&id_path, id.to_string())
            .map_err(|e| DaemonError::Config(format!("failed to write peer-id: {e}")))?;

        info!(id = %id, "created new peer ID");
        Ok(id)
    }
}

/// Default config directory.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("mouseshare")
}

/// Default settings file path.
pub fn default_settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

/// PID file path for the launcher.
pub fn pid_file_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::state_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("mouseshare.pid")
}
