//! Edge-arrival detection.
//!
//! Pure logic, fed cursor positions with timestamps by a capture backend.
//! No internal clock: the transition delay is measured against the
//! timestamps the backend supplies, which keeps the detector deterministic
//! under test.

use mouseshare_types::{Edge, Point, Rect};

/// Tuning for the detector, taken from user settings.
#[derive(Debug, Clone, Copy)]
pub struct EdgeDetectorConfig {
    /// Combined bounds of all local displays, in virtual coordinates.
    pub bounds: Rect,
    /// Distance from an edge, in pixels, at which the cursor counts as
    /// having arrived.
    pub edge_threshold: f64,
    /// Within this many pixels of two orthogonal edges at once, arrivals are
    /// suppressed: corners are for window controls, not crossings.
    pub corner_dead_zone: f64,
    /// The cursor must stay at the same edge this long before an arrival is
    /// reported. Zero reports immediately.
    pub transition_delay_us: u64,
}

/// A reported edge arrival.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeArrival {
    pub edge: Edge,
    pub position: Point,
}

/// Detects when the cursor has settled at a screen edge.
#[derive(Debug)]
pub struct EdgeDetector {
    config: EdgeDetectorConfig,
    /// Edge the cursor is currently dwelling at, with first-seen timestamp.
    pending: Option<(Edge, u64)>,
}

impl EdgeDetector {
    #[must_use]
    pub fn new(config: EdgeDetectorConfig) -> Self {
        Self {
            config,
            pending: None,
        }
    }

    /// Replace the configuration (display reconfiguration, settings change).
    pub fn set_config(&mut self, config: EdgeDetectorConfig) {
        self.config = config;
        self.pending = None;
    }

    /// Forget any dwell in progress.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Feed one cursor position. Returns an arrival when the cursor has been
    /// at the same edge for the configured delay.
    pub fn observe(&mut self, position: Point, timestamp_us: u64) -> Option<EdgeArrival> {
        let Some(edge) = self.edge_at(position) else {
            self.pending = None;
            return None;
        };

        let first_seen = match self.pending {
            Some((pending_edge, since)) if pending_edge == edge => since,
            _ => {
                self.pending = Some((edge, timestamp_us));
                timestamp_us
            }
        };

        if timestamp_us.saturating_sub(first_seen) >= self.config.transition_delay_us {
            Some(EdgeArrival { edge, position })
        } else {
            None
        }
    }

    /// Which edge, if any, the point counts as touching.
    fn edge_at(&self, p: Point) -> Option<Edge> {
        let b = &self.config.bounds;
        let distances = [
            (Edge::Left, p.x - b.x),
            (Edge::Right, b.right() - p.x),
            (Edge::Top, p.y - b.y),
            (Edge::Bottom, b.bottom() - p.y),
        ];

        let dead = self.config.corner_dead_zone;
        if dead > 0.0 {
            let near_vertical = distances
                .iter()
                .any(|(e, d)| e.is_vertical() && *d <= dead);
            let near_horizontal = distances
                .iter()
                .any(|(e, d)| !e.is_vertical() && *d <= dead);
            if near_vertical && near_horizontal {
                return None;
            }
        }

        distances
            .into_iter()
            .find(|(_, d)| *d <= self.config.edge_threshold)
            .map(|(edge, _)| edge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(threshold: f64, dead_zone: f64, delay_us: u64) -> EdgeDetector {
        EdgeDetector::new(EdgeDetectorConfig {
            bounds: Rect::new(0.0, 0.0, 1920.0, 1080.0),
            edge_threshold: threshold,
            corner_dead_zone: dead_zone,
            transition_delay_us: delay_us,
        })
    }

    #[test]
    fn arrival_at_left_edge() {
        let mut d = detector(1.0, 0.0, 0);
        let arrival = d.observe(Point::new(0.0, 540.0), 0).unwrap();
        assert_eq!(arrival.edge, Edge::Left);
        assert_eq!(arrival.position, Point::new(0.0, 540.0));
    }

    #[test]
    fn interior_points_do_not_trigger() {
        let mut d = detector(1.0, 0.0, 0);
        assert!(d.observe(Point::new(960.0, 540.0), 0).is_none());
        assert!(d.observe(Point::new(2.0, 540.0), 0).is_none());
    }

    #[test]
    fn threshold_widens_the_edge_band() {
        let mut d = detector(10.0, 0.0, 0);
        let arrival = d.observe(Point::new(1911.0, 300.0), 0).unwrap();
        assert_eq!(arrival.edge, Edge::Right);
    }

    #[test]
    fn corner_dead_zone_suppresses() {
        let mut d = detector(1.0, 10.0, 0);
        // Top-left corner: within 10 px of both left and top.
        assert!(d.observe(Point::new(0.0, 5.0), 0).is_none());
        // Same edge away from the corner still triggers.
        assert!(d.observe(Point::new(0.0, 540.0), 0).is_some());
    }

    #[test]
    fn zero_dead_zone_allows_corners() {
        let mut d = detector(1.0, 0.0, 0);
        let arrival = d.observe(Point::new(0.0, 0.0), 0).unwrap();
        assert_eq!(arrival.edge, Edge::Left);
    }

    #[test]
    fn transition_delay_requires_dwell() {
        let mut d = detector(1.0, 0.0, 250_000);
        assert!(d.observe(Point::new(0.0, 540.0), 0).is_none());
        assert!(d.observe(Point::new(0.0, 541.0), 100_000).is_none());
        let arrival = d.observe(Point::new(0.0, 542.0), 250_000).unwrap();
        assert_eq!(arrival.edge, Edge::Left);
    }

    #[test]
    fn leaving_the_edge_resets_the_dwell() {
        let mut d = detector(1.0, 0.0, 250_000);
        assert!(d.observe(Point::new(0.0, 540.0), 0).is_none());
        // Cursor steps away, then comes back: the clock restarts.
        assert!(d.observe(Point::new(100.0, 540.0), 100_000).is_none());
        assert!(d.observe(Point::new(0.0, 540.0), 200_000).is_none());
        assert!(d.observe(Point::new(0.0, 540.0), 400_000).is_none());
        assert!(d.observe(Point::new(0.0, 540.0), 450_000).is_some());
    }

    #[test]
    fn switching_edges_resets_the_dwell() {
        let mut d = detector(1.0, 0.0, 100_000);
        assert!(d.observe(Point::new(0.0, 540.0), 0).is_none());
        assert!(d.observe(Point::new(1920.0, 540.0), 50_000).is_none());
        // Right edge only reached 50k us ago.
        assert!(d.observe(Point::new(1920.0, 540.0), 100_000).is_none());
        assert!(d.observe(Point::new(1920.0, 540.0), 150_000).is_some());
    }

    #[test]
    fn offset_bounds_are_respected() {
        let mut d = EdgeDetector::new(EdgeDetectorConfig {
            bounds: Rect::new(-1920.0, 0.0, 3840.0, 1080.0),
            edge_threshold: 1.0,
            corner_dead_zone: 0.0,
            transition_delay_us: 0,
        });
        let arrival = d.observe(Point::new(-1920.0, 500.0), 0).unwrap();
        assert_eq!(arrival.edge, Edge::Left);
        let arrival = d.observe(Point::new(1920.0, 500.0), 0).unwrap();
        assert_eq!(arrival.edge, Edge::Right);
    }
}
