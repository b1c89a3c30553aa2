//! System clipboard backend over arboard.
//!
//! Text only: arboard's image type needs a codec round-trip that belongs to
//! a richer backend. Platforms reachable through arboard expose no cheap
//! change counter, so `change_count` returns `None` and the bridge compares
//! fingerprints instead.

use async_trait::async_trait;
use mouseshare_types::ClipboardPayload;
use tokio::task;
use tracing::debug;

use crate::error::ClipboardError;
use crate::ClipboardProvider;

/// Clipboard provider backed by arboard.
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl SystemClipboard {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ClipboardProvider for SystemClipboard {
    async fn read(&mut self) -> Result<Option<ClipboardPayload>, ClipboardError> {
        // arboard is blocking; keep it off the runtime threads.
        let text = task::spawn_blocking(|| {
            let mut clipboard =
                arboard::Clipboard::new().map_err(|e| ClipboardError::Backend(e.to_string()))?;
            Ok::<_, ClipboardError>(clipboard.get_text().ok())
        })
        .await
        .map_err(|e| ClipboardError::Backend(e.to_string()))??;

        Ok(text.map(|t| ClipboardPayload::text(&t)))
    }

    async fn write(&mut self, payload: ClipboardPayload) -> Result<(), ClipboardError> {
        let Some(text) = payload.as_text().map(ToString::to_string) else {
            debug!(mime = %payload.mime, "skipping non-text clipboard payload");
            return Ok(());
        };

        task::spawn_blocking(move || {
            let mut clipboard =
                arboard::Clipboard::new().map_err(|e| ClipboardError::Backend(e.to_string()))?;
            clipboard
                .set_text(text)
                .map_err(|e| ClipboardError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| ClipboardError::Backend(e.to_string()))?
    }

    async fn change_count(&mut self) -> Result<Option<u64>, ClipboardError> {
        Ok(None)
    }
}
