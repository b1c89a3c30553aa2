//! Clipboard synchronisation for mouseshare.
//!
//! The [`ClipboardBridge`] sits between a platform [`ClipboardProvider`] and
//! the controller: the controller polls it on a timer and broadcasts whatever
//! it returns, and hands it remote updates to apply. The bridge guarantees a
//! remote update applied locally is never reported back as a local change.

use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use mouseshare_types::ClipboardPayload;
use tracing::debug;

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(feature = "system")]
pub mod system;

pub use error::ClipboardError;

/// Contents beyond this size are dropped locally instead of broadcast.
pub const MAX_CLIPBOARD_SIZE: usize = 10 * 1024 * 1024;

/// How often the controller polls the bridge.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Platform clipboard access.
#[async_trait]
pub trait ClipboardProvider: Send + 'static {
    /// Current clipboard content, `None` when empty or in a format the
    /// provider cannot represent.
    async fn read(&mut self) -> Result<Option<ClipboardPayload>, ClipboardError>;

    /// Replace the clipboard content.
    async fn write(&mut self, payload: ClipboardPayload) -> Result<(), ClipboardError>;

    /// OS change counter, when the platform has one. `None` makes the bridge
    /// fall back to comparing content fingerprints on every poll.
    async fn change_count(&mut self) -> Result<Option<u64>, ClipboardError>;
}

/// Polls the local clipboard and applies remote updates with a self-update
/// guard.
pub struct ClipboardBridge {
    provider: Box<dyn ClipboardProvider>,
    last_change_count: Option<u64>,
    last_fingerprint: Option<u64>,
    applying_remote: bool,
}

impl ClipboardBridge {
    #[must_use]
    pub fn new(provider: Box<dyn ClipboardProvider>) -> Self {
        Self {
            provider,
            last_change_count: None,
            last_fingerprint: None,
            applying_remote: false,
        }
    }

    /// Check for a local clipboard change. Returns the payload to broadcast,
    /// or `None` when nothing changed (including content this bridge itself
    /// just applied from a remote update).
    pub async fn poll_local(&mut self) -> Result<Option<ClipboardPayload>, ClipboardError> {
        if self.applying_remote {
            return Ok(None);
        }

        // Fast path: an unchanged OS counter means no read is needed.
        if let Some(count) = self.provider.change_count().await? {
            if self.last_change_count == Some(count) {
                return Ok(None);
            }
            self.last_change_count = Some(count);
        }

        let Some(payload) = self.provider.read().await? else {
            return Ok(None);
        };

        let fp = fingerprint(&payload);
        if self.last_fingerprint == Some(fp) {
            return Ok(None);
        }
        self.last_fingerprint = Some(fp);

        if payload.size() > MAX_CLIPBOARD_SIZE {
            return Err(ClipboardError::TooLarge {
                size: payload.size(),
                max: MAX_CLIPBOARD_SIZE,
            });
        }

        debug!(bytes = payload.size(), mime = %payload.mime, "local clipboard changed");
        Ok(Some(payload))
    }

    /// Apply a remote update to the local clipboard without echoing it back
    /// on the next poll.
    pub async fn apply_remote(&mut self, payload: ClipboardPayload) -> Result<(), ClipboardError> {
        if payload.size() > MAX_CLIPBOARD_SIZE {
            return Err(ClipboardError::TooLarge {
                size: payload.size(),
                max: MAX_CLIPBOARD_SIZE,
            });
        }

        self.applying_remote = true;
        let result = self.provider.write(payload.clone()).await;
        if result.is_ok() {
            self.last_fingerprint = Some(fingerprint(&payload));
            if let Ok(count) = self.provider.change_count().await {
                self.last_change_count = count;
            }
            debug!(bytes = payload.size(), mime = %payload.mime, "applied remote clipboard");
        }
        self.applying_remote = false;
        result
    }
}

fn fingerprint(payload: &ClipboardPayload) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    payload.mime.hash(&mut hasher);
    payload.data.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::mock::MockClipboard;
    use super::*;

    fn bridge() -> (ClipboardBridge, super::mock::MockClipboardHandle) {
        let provider = MockClipboard::new();
        let handle = provider.handle();
        (ClipboardBridge::new(Box::new(provider)), handle)
    }

    #[tokio::test]
    async fn local_change_is_reported_once() {
        let (mut bridge, handle) = bridge();

        assert!(bridge.poll_local().await.unwrap().is_none());

        handle.set_content(ClipboardPayload::text("copied locally"));
        let payload = bridge.poll_local().await.unwrap().unwrap();
        assert_eq!(payload.as_text(), Some("copied locally"));

        // Unchanged content is not reported again.
        assert!(bridge.poll_local().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn applied_remote_update_does_not_echo() {
        let (mut bridge, handle) = bridge();

        bridge
            .apply_remote(ClipboardPayload::text("from the peer"))
            .await
            .unwrap();
        assert_eq!(
            handle.content().unwrap().as_text(),
            Some("from the peer")
        );

        // The change the bridge itself made must not come back as local.
        assert!(bridge.poll_local().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_change_after_remote_apply_is_reported() {
        let (mut bridge, handle) = bridge();

        bridge
            .apply_remote(ClipboardPayload::text("remote"))
            .await
            .unwrap();
        assert!(bridge.poll_local().await.unwrap().is_none());

        handle.set_content(ClipboardPayload::text("local again"));
        let payload = bridge.poll_local().await.unwrap().unwrap();
        assert_eq!(payload.as_text(), Some("local again"));
    }

    #[tokio::test]
    async fn oversized_local_content_is_dropped() {
        let (mut bridge, handle) = bridge();

        handle.set_content(ClipboardPayload {
            mime: "application/octet-stream".to_string(),
            data: vec![0u8; MAX_CLIPBOARD_SIZE + 1],
        });
        assert!(matches!(
            bridge.poll_local().await,
            Err(ClipboardError::TooLarge { .. })
        ));

        // The oversized content is remembered so it doesn't error every poll.
        assert!(bridge.poll_local().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_remote_update_is_rejected() {
        let (mut bridge, handle) = bridge();

        let err = bridge
            .apply_remote(ClipboardPayload {
                mime: "application/octet-stream".to_string(),
                data: vec![0u8; MAX_CLIPBOARD_SIZE + 1],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClipboardError::TooLarge { .. }));
        assert!(handle.content().is_none());
    }

    #[tokio::test]
    async fn unchanged_counter_skips_reads() {
        let (mut bridge, handle) = bridge();

        handle.set_content(ClipboardPayload::text("once"));
        assert!(bridge.poll_local().await.unwrap().is_some());

        let reads_before = handle.read_count();
        assert!(bridge.poll_local().await.unwrap().is_none());
        assert!(bridge.poll_local().await.unwrap().is_none());
        // The counter fast-path answered without touching the content.
        assert_eq!(handle.read_count(), reads_before);
    }
}
