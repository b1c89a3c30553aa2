//! Mock clipboard backend for testing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mouseshare_types::ClipboardPayload;

use crate::error::ClipboardError;
use crate::ClipboardProvider;

#[derive(Debug, Default)]
struct MockClipboardState {
    content: Option<ClipboardPayload>,
    change_count: u64,
    read_count: u64,
}

/// In-memory clipboard with an observable change counter.
pub struct MockClipboard {
    state: Arc<Mutex<MockClipboardState>>,
}

impl Default for MockClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClipboard {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockClipboardState::default())),
        }
    }

    /// Get a clonable handle for driving and observing the clipboard from
    /// tests.
    #[must_use]
    pub fn handle(&self) -> MockClipboardHandle {
        MockClipboardHandle {
            state: Arc::clone(&self.state),
        }
    }
}

/// Clonable test handle for [`MockClipboard`].
#[derive(Clone)]
pub struct MockClipboardHandle {
    state: Arc<Mutex<MockClipboardState>>,
}

impl MockClipboardHandle {
    /// Simulate the user copying something.
    pub fn set_content(&self, payload: ClipboardPayload) {
        let mut state = self.state.lock().unwrap();
        state.content = Some(payload);
        state.change_count += 1;
    }

    pub fn content(&self) -> Option<ClipboardPayload> {
        self.state.lock().unwrap().content.clone()
    }

    /// How many times `read()` has been called.
    pub fn read_count(&self) -> u64 {
        self.state.lock().unwrap().read_count
    }
}

#[async_trait]
impl ClipboardProvider for MockClipboard {
    async fn read(&mut self) -> Result<Option<ClipboardPayload>, ClipboardError> {
        let mut state = self.state.lock().unwrap();
        state.read_count += 1;
        Ok(state.content.clone())
    }

    async fn write(&mut self, payload: ClipboardPayload) -> Result<(), ClipboardError> {
        let mut state = self.state.lock().unwrap();
        state.content = Some(payload);
        state.change_count += 1;
        Ok(())
    }

    async fn change_count(&mut self) -> Result<Option<u64>, ClipboardError> {
        Ok(Some(self.state.lock().unwrap().change_count))
    }
}
