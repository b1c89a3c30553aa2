//! Mock input backends for testing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mouseshare_types::{Edge, InputEvent, Point, Rect};
use tokio::sync::mpsc;

use crate::error::InputError;
use crate::{CaptureMode, CaptureSignal, EventCapture, EventInjector, CURSOR_EDGE_INSET};

// ---------------------------------------------------------------------------
// MockCapture
// ---------------------------------------------------------------------------

/// Mock capture backend.
///
/// Tests inject signals through the feed sender returned by [`new`]; when
/// `start()` is called a task forwards them into the controller's channel.
/// The current [`CaptureMode`] is observable through the handle.
///
/// [`new`]: MockCapture::new
pub struct MockCapture {
    feed_rx: Option<mpsc::Receiver<CaptureSignal>>,
    state: Arc<Mutex<MockCaptureState>>,
}

#[derive(Debug)]
struct MockCaptureState {
    mode: CaptureMode,
    started: bool,
    shutdown: bool,
}

impl MockCapture {
    /// Create a mock capture and the sender used to feed it signals.
    pub fn new() -> (Self, mpsc::Sender<CaptureSignal>) {
        let (feed_tx, feed_rx) = mpsc::channel(1024);
        let capture = Self {
            feed_rx: Some(feed_rx),
            state: Arc::new(Mutex::new(MockCaptureState {
                mode: CaptureMode::Watch,
                started: false,
                shutdown: false,
            })),
        };
        (capture, feed_tx)
    }

    /// Get a clonable handle for observing the capture state from tests.
    pub fn handle(&self) -> MockCaptureHandle {
        MockCaptureHandle {
            state: Arc::clone(&self.state),
        }
    }
}

/// Clonable observer handle for [`MockCapture`].
#[derive(Clone)]
pub struct MockCaptureHandle {
    state: Arc<Mutex<MockCaptureState>>,
}

impl MockCaptureHandle {
    pub fn mode(&self) -> CaptureMode {
        self.state.lock().unwrap().mode
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().unwrap().started
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().unwrap().shutdown
    }
}

#[async_trait]
impl EventCapture for MockCapture {
    async fn start(&mut self, tx: mpsc::Sender<CaptureSignal>) -> Result<(), InputError> {
        let mut feed_rx = self.feed_rx.take().ok_or(InputError::NotStarted)?;
        self.state.lock().unwrap().started = true;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(signal) = feed_rx.recv().await {
                if state.lock().unwrap().shutdown {
                    break;
                }
                if tx.send(signal).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn set_mode(&mut self, mode: CaptureMode) -> Result<(), InputError> {
        self.state.lock().unwrap().mode = mode;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), InputError> {
        self.state.lock().unwrap().shutdown = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockInjector
// ---------------------------------------------------------------------------

/// One recorded injector invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InjectorCall {
    Inject(InputEvent),
    MoveTo(Point),
    ParkCursor,
    WarpToEdge { edge: Edge, rel: f64 },
    SetCursorVisible(bool),
    SetMouseAssociation(bool),
}

#[derive(Debug)]
struct MockInjectorState {
    bounds: Rect,
    calls: Vec<InjectorCall>,
    cursor: Point,
    visible: bool,
    associated: bool,
}

/// Mock injection backend that records every call and tracks a simulated
/// cursor over the given display bounds.
pub struct MockInjector {
    state: Arc<Mutex<MockInjectorState>>,
}

impl MockInjector {
    pub fn new(bounds: Rect) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockInjectorState {
                cursor: bounds.center(),
                bounds,
                calls: Vec::new(),
                visible: true,
                associated: true,
            })),
        }
    }

    /// Get a clonable handle for observing what was injected.
    pub fn handle(&self) -> MockInjectorHandle {
        MockInjectorHandle {
            state: Arc::clone(&self.state),
        }
    }
}

/// Clonable observer handle for [`MockInjector`].
#[derive(Clone)]
pub struct MockInjectorHandle {
    state: Arc<Mutex<MockInjectorState>>,
}

impl MockInjectorHandle {
    /// Snapshot of every call in order.
    pub fn calls(&self) -> Vec<InjectorCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Snapshot of the injected input events only.
    pub fn injected_events(&self) -> Vec<InputEvent> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|c| match c {
                InjectorCall::Inject(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn cursor(&self) -> Point {
        self.state.lock().unwrap().cursor
    }

    pub fn is_cursor_visible(&self) -> bool {
        self.state.lock().unwrap().visible
    }

    pub fn is_mouse_associated(&self) -> bool {
        self.state.lock().unwrap().associated
    }
}

#[async_trait]
impl EventInjector for MockInjector {
    async fn inject(&mut self, event: &InputEvent) -> Result<(), InputError> {
        let mut state = self.state.lock().unwrap();
        if let InputEvent::MouseMove { dx, dy, .. } | InputEvent::MouseDrag { dx, dy, .. } = event {
            let bounds = state.bounds;
            state.cursor.x = (state.cursor.x + dx).clamp(bounds.x, bounds.right() - 1.0);
            state.cursor.y = (state.cursor.y + dy).clamp(bounds.y, bounds.bottom() - 1.0);
        }
        state.calls.push(InjectorCall::Inject(event.clone()));
        Ok(())
    }

    async fn move_to(&mut self, point: Point) -> Result<(), InputError> {
        let mut state = self.state.lock().unwrap();
        state.cursor = point;
        state.calls.push(InjectorCall::MoveTo(point));
        Ok(())
    }

    async fn park_cursor(&mut self) -> Result<(), InputError> {
        let mut state = self.state.lock().unwrap();
        state.cursor = state.bounds.center();
        state.associated = false;
        state.calls.push(InjectorCall::ParkCursor);
        Ok(())
    }

    async fn warp_to_edge(&mut self, edge: Edge, rel: f64) -> Result<(), InputError> {
        let mut state = self.state.lock().unwrap();
        state.cursor = state.bounds.point_at_edge(edge, rel, CURSOR_EDGE_INSET);
        state.calls.push(InjectorCall::WarpToEdge { edge, rel });
        Ok(())
    }

    async fn set_cursor_visible(&mut self, visible: bool) -> Result<(), InputError> {
        let mut state = self.state.lock().unwrap();
        state.visible = visible;
        state.calls.push(InjectorCall::SetCursorVisible(visible));
        Ok(())
    }

    async fn set_mouse_association(&mut self, associated: bool) -> Result<(), InputError> {
        let mut state = self.state.lock().unwrap();
        state.associated = associated;
        state.calls.push(InjectorCall::SetMouseAssociation(associated));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mouseshare_types::Modifiers;

    #[tokio::test]
    async fn injector_tracks_cursor_with_clamping() {
        let mut injector = MockInjector::new(Rect::new(0.0, 0.0, 1920.0, 1080.0));
        let handle = injector.handle();

        injector.move_to(Point::new(10.0, 10.0)).await.unwrap();
        injector
            .inject(&InputEvent::MouseMove {
                dx: -50.0,
                dy: 5.0,
                modifiers: Modifiers::NONE,
            })
            .await
            .unwrap();
        // Clamped at the left bound.
        assert_eq!(handle.cursor(), Point::new(0.0, 15.0));
    }

    #[tokio::test]
    async fn park_breaks_association_and_centres() {
        let mut injector = MockInjector::new(Rect::new(0.0, 0.0, 1920.0, 1080.0));
        let handle = injector.handle();

        injector.park_cursor().await.unwrap();
        assert_eq!(handle.cursor(), Point::new(960.0, 540.0));
        assert!(!handle.is_mouse_associated());

        injector.set_mouse_association(true).await.unwrap();
        assert!(handle.is_mouse_associated());
    }

    #[tokio::test]
    async fn warp_to_edge_applies_inset() {
        let mut injector = MockInjector::new(Rect::new(0.0, 0.0, 1920.0, 1080.0));
        let handle = injector.handle();

        injector.warp_to_edge(Edge::Right, 0.5).await.unwrap();
        assert_eq!(handle.cursor(), Point::new(1918.0, 540.0));
    }

    #[tokio::test]
    async fn capture_forwards_fed_signals() {
        let (mut capture, feed) = MockCapture::new();
        let handle = capture.handle();
        let (tx, mut rx) = mpsc::channel(16);

        capture.start(tx).await.unwrap();
        assert!(handle.is_started());

        feed.send(CaptureSignal::Escape).await.unwrap();
        assert_eq!(rx.recv().await, Some(CaptureSignal::Escape));

        capture.set_mode(CaptureMode::Forward).await.unwrap();
        assert_eq!(handle.mode(), CaptureMode::Forward);
    }
}
