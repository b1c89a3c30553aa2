//! Outgoing event batching.
//!
//! While controlling, captured events queue here and flush on an 8 ms timer.
//! Press/release events bypass the window (the controller flushes on them
//! immediately); consecutive motion and scroll events coalesce so a fast
//! mouse doesn't turn into hundreds of one-event packets.

use std::time::Duration;

use mouseshare_types::{InputEvent, TimedEvent};

/// Flush cadence while controlling (~120 Hz).
pub const BATCH_INTERVAL: Duration = Duration::from_millis(8);

/// Queue of events awaiting the next flush.
#[derive(Debug, Default)]
pub struct BatchQueue {
    events: Vec<TimedEvent>,
}

impl BatchQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, merging it into the previous one when both are the
    /// same kind of motion.
    pub fn push(&mut self, event: TimedEvent) {
        if let Some(last) = self.events.last_mut() {
            if coalesce(&mut last.event, &event.event) {
                last.timestamp_us = event.timestamp_us;
                return;
            }
        }
        self.events.push(event);
    }

    /// Take everything queued, in capture order.
    #[must_use]
    pub fn take(&mut self) -> Vec<TimedEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Merge `next` into `last` when they are compatible motion events. Returns
/// whether the merge happened.
fn coalesce(last: &mut InputEvent, next: &InputEvent) -> bool {
    match (last, next) {
        (
            InputEvent::MouseMove { dx, dy, modifiers },
            InputEvent::MouseMove {
                dx: ndx,
                dy: ndy,
                modifiers: nmods,
            },
        ) if modifiers == nmods => {
            *dx += ndx;
            *dy += ndy;
            true
        }
        (
            InputEvent::MouseDrag {
                dx,
                dy,
                button,
                modifiers,
            },
            InputEvent::MouseDrag {
                dx: ndx,
                dy: ndy,
                button: nbutton,
                modifiers: nmods,
            },
        ) if button == nbutton && modifiers == nmods => {
            *dx += ndx;
            *dy += ndy;
            true
        }
        (
            InputEvent::Scroll { dx, dy },
            InputEvent::Scroll { dx: ndx, dy: ndy },
        ) => {
            *dx += ndx;
            *dy += ndy;
            true
        }
        _ => false,
    }
}
