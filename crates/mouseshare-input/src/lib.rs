//! Platform-abstracted event capture and injection for mouseshare.
//!
//! This crate defines the [`EventCapture`] and [`EventInjector`] traits that
//! platform backends implement, plus the pure edge-arrival detector used by
//! capture backends. All coordinate conversion between OS screen coordinates
//! and virtual arrangement coordinates happens behind these traits; the rest
//! of the workspace never sees an OS coordinate.

use async_trait::async_trait;
use mouseshare_types::{Edge, InputEvent, Point, TimedEvent};
use tokio::sync::mpsc;

pub mod edge;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;

pub use edge::{EdgeArrival, EdgeDetector, EdgeDetectorConfig};
pub use error::InputError;

/// How far inside an edge the cursor is placed when warped to it.
pub const CURSOR_EDGE_INSET: f64 = 2.0;

/// What the capture layer does with the host's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Events pass through to the OS; edge-arrival detection is active.
    /// The mode of a host under local control.
    Watch,
    /// Events are suppressed locally and delivered as semantic signals; the
    /// escape key is raised as a distinguished signal instead of an event.
    /// The mode of a host forwarding input to a remote.
    Forward,
    /// Events pass through with edge detection off, so injected input cannot
    /// re-trigger a crossing. The mode of a host applying remote input.
    Passive,
}

/// What a capture backend reports to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureSignal {
    /// A semantic input event (Forward mode).
    Input(TimedEvent),
    /// The cursor reached a screen edge (Watch mode). The position is in
    /// virtual arrangement coordinates.
    EdgeArrival { edge: Edge, position: Point },
    /// The escape key was pressed while forwarding. The key itself is
    /// suppressed and never appears as an `Input` signal.
    Escape,
}

/// Captures the host's global input stream.
#[async_trait]
pub trait EventCapture: Send + 'static {
    /// Register the system-wide interceptor and start delivering signals to
    /// `tx`. The OS callback must not block: it enqueues and returns.
    async fn start(&mut self, tx: mpsc::Sender<CaptureSignal>) -> Result<(), InputError>;

    /// Switch capture behaviour. Takes effect from the next event.
    async fn set_mode(&mut self, mode: CaptureMode) -> Result<(), InputError>;

    /// Unregister the interceptor and release all resources.
    async fn shutdown(&mut self) -> Result<(), InputError>;
}

/// Writes synthetic input and moves the cursor on the local host.
#[async_trait]
pub trait EventInjector: Send + 'static {
    /// Translate an event into a synthetic OS event. Mouse motion applies
    /// the event's delta to the current cursor position, clamped to the main
    /// display; button events use the current cursor position.
    async fn inject(&mut self, event: &InputEvent) -> Result<(), InputError>;

    /// Absolute warp, used when a remote session deposits the cursor here.
    async fn move_to(&mut self, point: Point) -> Result<(), InputError>;

    /// Warp to the display centre and break mouse-to-cursor association so
    /// the physical device moves without dragging the hidden cursor along.
    async fn park_cursor(&mut self) -> Result<(), InputError>;

    /// Snap to a point just inside `edge` at normalized position `rel`.
    async fn warp_to_edge(&mut self, edge: Edge, rel: f64) -> Result<(), InputError>;

    async fn set_cursor_visible(&mut self, visible: bool) -> Result<(), InputError>;

    /// Restore or break the mouse-to-cursor association on its own.
    async fn set_mouse_association(&mut self, associated: bool) -> Result<(), InputError>;
}
