//! Virtual 2-D screen arrangement.
//!
//! Pure model, no I/O. Local displays and the screens of known peers live in
//! one shared coordinate space with the primary display at (0,0) and Y
//! growing downward. The arrangement answers two questions for the
//! controller: which peer sits behind a given local edge, and where on the
//! target screen a crossing cursor should appear.

use std::collections::{HashMap, HashSet};

use mouseshare_types::{Edge, PeerId, Point, Rect, ScreenSize};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Adjacency tolerance in virtual pixels: the allowed gap perpendicular to a
/// shared edge, and the minimum overlap along it.
pub const ADJACENCY_TOLERANCE: f64 = 50.0;

/// One screen in the virtual layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrangedScreen {
    /// Stable id within this arrangement.
    pub id: u32,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub is_local: bool,
    /// Resolved owner for remote screens. `None` until the peer has been
    /// seen, or for local screens always.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<PeerId>,
}

impl ArrangedScreen {
    #[must_use]
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// Ordered collection of arranged screens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreenArrangement {
    screens: Vec<ArrangedScreen>,
    next_id: u32,
}

impl ScreenArrangement {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a saved layout.
    #[must_use]
    pub fn from_screens(screens: Vec<ArrangedScreen>) -> Self {
        let next_id = screens.iter().map(|s| s.id + 1).max().unwrap_or(1);
        Self { screens, next_id }
    }

    #[must_use]
    pub fn screens(&self) -> &[ArrangedScreen] {
        &self.screens
    }

    /// Replace the local screens from the OS display list, normalizing the
    /// primary display (the first entry) to the origin. Remote screens keep
    /// their positions.
    pub fn initialize_local_displays(&mut self, displays: &[(String, Rect)]) {
        self.screens.retain(|s| !s.is_local);

        let Some((_, primary)) = displays.first() else {
            return;
        };
        let (dx, dy) = (primary.x, primary.y);

        // Insert local screens ahead of remotes so edge routing scans them
        // in display order.
        let mut seen = HashSet::new();
        for (index, (name, rect)) in displays.iter().enumerate() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.screens.insert(
                index.min(self.screens.len()),
                ArrangedScreen {
                    id,
                    name: name.clone(),
                    x: rect.x - dx,
                    y: rect.y - dy,
                    width: rect.width,
                    height: rect.height,
                    is_local: true,
                    peer_id: None,
                },
            );
        }
    }

    /// Insert or update the screen of a remote peer, keyed by peer id first
    /// and by name second so a peer whose id churned across restarts keeps
    /// its place in the layout.
    pub fn update_remote_screen(&mut self, peer_id: PeerId, name: &str, size: ScreenSize) {
        let (width, height) = (f64::from(size.width), f64::from(size.height));

        if let Some(screen) = self
            .screens
            .iter_mut()
            .find(|s| !s.is_local && s.peer_id == Some(peer_id))
        {
            screen.name = name.to_string();
            screen.width = width;
            screen.height = height;
            return;
        }

        if let Some(screen) = self
            .screens
            .iter_mut()
            .find(|s| !s.is_local && s.name == name)
        {
            screen.peer_id = Some(peer_id);
            screen.width = width;
            screen.height = height;
            return;
        }

        // New remote: drop it to the right of everything until the user
        // arranges it.
        let x = self
            .screens
            .iter()
            .map(|s| s.rect().right())
            .fold(0.0, f64::max);
        let id = self.next_id;
        self.next_id += 1;
        debug!(peer = %peer_id, name, x, "placing new remote screen");
        self.screens.push(ArrangedScreen {
            id,
            name: name.to_string(),
            x,
            y: 0.0,
            width,
            height,
            is_local: false,
            peer_id: Some(peer_id),
        });
    }

    /// Drop remote screens that are unresolved or whose peer has left the
    /// connected set.
    pub fn remove_stale_remote_screens(&mut self, connected: &HashSet<PeerId>) {
        self.screens.retain(|s| {
            s.is_local || s.peer_id.is_some_and(|id| connected.contains(&id))
        });
    }

    /// Move a screen (user drag in the settings UI).
    pub fn update_position(&mut self, id: u32, x: f64, y: f64) {
        if let Some(screen) = self.screens.iter_mut().find(|s| s.id == id) {
            screen.x = x;
            screen.y = y;
        }
    }

    /// Which peer sits on the given edge of the local screens.
    ///
    /// Scans local screens in order and returns the first remote adjacent on
    /// `edge`; when the arrangement has no answer, falls back to the
    /// explicit edge-link table.
    #[must_use]
    pub fn peer_for_edge(
        &self,
        edge: Edge,
        edge_links: &HashMap<Edge, PeerId>,
    ) -> Option<PeerId> {
        for local in self.screens.iter().filter(|s| s.is_local) {
            for remote in self.screens.iter().filter(|s| !s.is_local) {
                let Some(peer_id) = remote.peer_id else {
                    continue;
                };
                if screens_adjacent(&local.rect(), &remote.rect(), edge) {
                    return Some(peer_id);
                }
            }
        }
        edge_links.get(&edge).copied()
    }

    /// The arranged screen belonging to a peer.
    #[must_use]
    pub fn screen_for_peer(&self, peer_id: PeerId) -> Option<&ArrangedScreen> {
        self.screens
            .iter()
            .find(|s| !s.is_local && s.peer_id == Some(peer_id))
    }

    /// The local screen containing a point, or the first local screen.
    #[must_use]
    pub fn local_screen_at(&self, point: Point) -> Option<&ArrangedScreen> {
        self.screens
            .iter()
            .filter(|s| s.is_local)
            .find(|s| s.rect().contains(point))
            .or_else(|| self.screens.iter().find(|s| s.is_local))
    }

    /// Union of all local screen rectangles.
    #[must_use]
    pub fn combined_local_bounds(&self) -> Option<Rect> {
        let mut locals = self.screens.iter().filter(|s| s.is_local);
        let first = locals.next()?.rect();
        let (mut x0, mut y0, mut x1, mut y1) =
            (first.x, first.y, first.right(), first.bottom());
        for screen in locals {
            let r = screen.rect();
            x0 = x0.min(r.x);
            y0 = y0.min(r.y);
            x1 = x1.max(r.right());
            y1 = y1.max(r.bottom());
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }
}

/// Whether `remote` is adjacent on `edge` of `local`: perpendicular gap at
/// most [`ADJACENCY_TOLERANCE`] and parallel overlap greater than it.
fn screens_adjacent(local: &Rect, remote: &Rect, edge: Edge) -> bool {
    let gap = match edge {
        Edge::Left => (local.x - remote.right()).abs(),
        Edge::Right => (remote.x - local.right()).abs(),
        Edge::Top => (local.y - remote.bottom()).abs(),
        Edge::Bottom => (remote.y - local.bottom()).abs(),
    };
    if gap > ADJACENCY_TOLERANCE {
        return false;
    }

    let overlap = if edge.is_vertical() {
        local.bottom().min(remote.bottom()) - local.y.max(remote.y)
    } else {
        local.right().min(remote.right()) - local.x.max(remote.x)
    };
    overlap > ADJACENCY_TOLERANCE
}

/// Where a cursor leaving `source` through `edge` at normalized position
/// `exit_point` enters the target screen, normalized over the target's
/// parallel extent.
///
/// The mapping is driven by the overlap of the two rectangles along the
/// shared axis; an exit outside the overlap clamps to its nearest end. With
/// no overlap at all the entry lands in the middle of the target edge.
#[must_use]
pub fn compute_entry_position(
    exit_point: f64,
    source: &ArrangedScreen,
    target: &ArrangedScreen,
    edge: Edge,
) -> f64 {
    let source_rect = source.rect();
    let target_rect = target.rect();

    let source_origin = source_rect.parallel_origin(edge);
    let source_extent = source_rect.parallel_extent(edge);
    let target_origin = target_rect.parallel_origin(edge);
    let target_extent = target_rect.parallel_extent(edge);

    if target_extent <= 0.0 {
        return 0.5;
    }

    let overlap_min = source_origin.max(target_origin);
    let overlap_max = (source_origin + source_extent).min(target_origin + target_extent);
    if overlap_max <= overlap_min {
        return 0.5;
    }

    let exit = source_origin + exit_point.clamp(0.0, 1.0) * source_extent;
    let entry = exit.clamp(overlap_min, overlap_max);
    (entry - target_origin) / target_extent
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(id: u32, x: f64, y: f64, w: f64, h: f64) -> ArrangedScreen {
        ArrangedScreen {
            id,
            name: format!("display-{id}"),
            x,
            y,
            width: w,
            height: h,
            is_local: true,
            peer_id: None,
        }
    }

    fn remote(id: u32, name: &str, x: f64, y: f64, w: f64, h: f64, peer: PeerId) -> ArrangedScreen {
        ArrangedScreen {
            id,
            name: name.to_string(),
            x,
            y,
            width: w,
            height: h,
            is_local: false,
            peer_id: Some(peer),
        }
    }

    fn side_by_side(peer: PeerId) -> ScreenArrangement {
        ScreenArrangement::from_screens(vec![
            local(1, 0.0, 0.0, 1920.0, 1080.0),
            remote(2, "laptop", -1920.0, 0.0, 1920.0, 1080.0, peer),
        ])
    }

    #[test]
    fn peer_found_on_adjacent_edge() {
        let peer = PeerId::new();
        let arrangement = side_by_side(peer);
        let links = HashMap::new();
        assert_eq!(arrangement.peer_for_edge(Edge::Left, &links), Some(peer));
        assert_eq!(arrangement.peer_for_edge(Edge::Right, &links), None);
        assert_eq!(arrangement.peer_for_edge(Edge::Top, &links), None);
    }

    #[test]
    fn small_gap_and_offset_still_adjacent() {
        let peer = PeerId::new();
        let arrangement = ScreenArrangement::from_screens(vec![
            local(1, 0.0, 0.0, 1920.0, 1080.0),
            // 30 px gap, 200 px vertical offset.
            remote(2, "laptop", 1950.0, 200.0, 1920.0, 1080.0, peer),
        ]);
        let links = HashMap::new();
        assert_eq!(arrangement.peer_for_edge(Edge::Right, &links), Some(peer));
    }

    #[test]
    fn wide_gap_is_not_adjacent() {
        let peer = PeerId::new();
        let arrangement = ScreenArrangement::from_screens(vec![
            local(1, 0.0, 0.0, 1920.0, 1080.0),
            remote(2, "laptop", 2100.0, 0.0, 1920.0, 1080.0, peer),
        ]);
        let links = HashMap::new();
        assert_eq!(arrangement.peer_for_edge(Edge::Right, &links), None);
    }

    #[test]
    fn sliver_overlap_is_not_adjacent() {
        let peer = PeerId::new();
        let arrangement = ScreenArrangement::from_screens(vec![
            local(1, 0.0, 0.0, 1920.0, 1080.0),
            // Only 40 px of vertical overlap.
            remote(2, "laptop", 1920.0, 1040.0, 1920.0, 1080.0, peer),
        ]);
        let links = HashMap::new();
        assert_eq!(arrangement.peer_for_edge(Edge::Right, &links), None);
    }

    #[test]
    fn edge_link_fallback_when_no_adjacency() {
        let peer = PeerId::new();
        let arrangement =
            ScreenArrangement::from_screens(vec![local(1, 0.0, 0.0, 1920.0, 1080.0)]);
        let mut links = HashMap::new();
        links.insert(Edge::Bottom, peer);
        assert_eq!(arrangement.peer_for_edge(Edge::Bottom, &links), Some(peer));
        assert_eq!(arrangement.peer_for_edge(Edge::Top, &links), None);
    }

    #[test]
    fn adjacency_wins_over_edge_link() {
        let adjacent_peer = PeerId::new();
        let linked_peer = PeerId::new();
        let arrangement = side_by_side(adjacent_peer);
        let mut links = HashMap::new();
        links.insert(Edge::Left, linked_peer);
        assert_eq!(
            arrangement.peer_for_edge(Edge::Left, &links),
            Some(adjacent_peer)
        );
    }

    #[test]
    fn first_adjacent_remote_wins() {
        let first = PeerId::new();
        let second = PeerId::new();
        let arrangement = ScreenArrangement::from_screens(vec![
            local(1, 0.0, 0.0, 1920.0, 1080.0),
            remote(2, "a", 1920.0, 0.0, 1920.0, 1080.0, first),
            remote(3, "b", 1920.0, 0.0, 1920.0, 1080.0, second),
        ]);
        let links = HashMap::new();
        assert_eq!(arrangement.peer_for_edge(Edge::Right, &links), Some(first));
    }

    #[test]
    fn entry_position_maps_through_overlap() {
        let peer = PeerId::new();
        let source = local(1, 0.0, 0.0, 1920.0, 1080.0);
        let target = remote(2, "r", 1920.0, 0.0, 1920.0, 1080.0, peer);
        // Identical vertical span: the relative position carries over.
        let rel = compute_entry_position(0.5, &source, &target, Edge::Right);
        assert!((rel - 0.5).abs() < 1e-9);
        let rel = compute_entry_position(0.0, &source, &target, Edge::Right);
        assert!(rel.abs() < 1e-9);
        let rel = compute_entry_position(1.0, &source, &target, Edge::Right);
        assert!((rel - 1.0).abs() < 1e-9);
    }

    #[test]
    fn entry_position_clamps_outside_overlap() {
        let peer = PeerId::new();
        let source = local(1, 0.0, 0.0, 1920.0, 1080.0);
        // Target shifted down 540: its top half overlaps the source's
        // bottom half.
        let target = remote(2, "r", 1920.0, 540.0, 1920.0, 1080.0, peer);
        // Exit near the source's top is above the overlap: clamp to the
        // target's top edge.
        let rel = compute_entry_position(0.1, &source, &target, Edge::Right);
        assert!(rel.abs() < 1e-9);
        // Exit at the source's bottom is inside the overlap.
        let rel = compute_entry_position(1.0, &source, &target, Edge::Right);
        assert!((rel - 0.5).abs() < 1e-9);
    }

    #[test]
    fn entry_position_without_overlap_is_centred() {
        let peer = PeerId::new();
        let source = local(1, 0.0, 0.0, 1920.0, 1080.0);
        let target = remote(2, "r", 1920.0, 2000.0, 1920.0, 1080.0, peer);
        let rel = compute_entry_position(0.5, &source, &target, Edge::Right);
        assert!((rel - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn entry_position_on_horizontal_edge_uses_x_axis() {
        let peer = PeerId::new();
        let source = local(1, 0.0, 0.0, 1920.0, 1080.0);
        let target = remote(2, "r", 960.0, -1080.0, 1920.0, 1080.0, peer);
        // Exit at 3/4 along the top edge: x = 1440, inside the overlap
        // [960, 1920]; target-relative = (1440 - 960) / 1920 = 0.25.
        let rel = compute_entry_position(0.75, &source, &target, Edge::Top);
        assert!((rel - 0.25).abs() < 1e-9);
    }

    #[test]
    fn entry_position_always_in_unit_range() {
        let peer = PeerId::new();
        let source = local(1, 0.0, 0.0, 1920.0, 1080.0);
        let offsets = [-3000.0, -1000.0, -540.0, 0.0, 540.0, 1000.0, 3000.0];
        let exits = [0.0, 0.25, 0.5, 0.75, 1.0];
        for offset in offsets {
            let target = remote(2, "r", 1920.0, offset, 2560.0, 1440.0, peer);
            for exit in exits {
                let rel = compute_entry_position(exit, &source, &target, Edge::Right);
                assert!((0.0..=1.0).contains(&rel), "rel {rel} out of range");
            }
        }
    }

    #[test]
    fn local_displays_normalize_primary_to_origin() {
        let mut arrangement = ScreenArrangement::new();
        arrangement.initialize_local_displays(&[
            ("main".to_string(), Rect::new(100.0, 50.0, 1920.0, 1080.0)),
            ("side".to_string(), Rect::new(2020.0, 50.0, 1280.0, 1024.0)),
        ]);
        let screens = arrangement.screens();
        assert_eq!(screens.len(), 2);
        assert!((screens[0].x).abs() < f64::EPSILON);
        assert!((screens[0].y).abs() < f64::EPSILON);
        assert!((screens[1].x - 1920.0).abs() < f64::EPSILON);
    }

    #[test]
    fn reinitializing_keeps_remote_screens() {
        let peer = PeerId::new();
        let mut arrangement = side_by_side(peer);
        arrangement.initialize_local_displays(&[(
            "main".to_string(),
            Rect::new(0.0, 0.0, 2560.0, 1440.0),
        )]);
        assert_eq!(arrangement.screens().len(), 2);
        assert!(arrangement.screen_for_peer(peer).is_some());
    }

    #[test]
    fn update_remote_screen_matches_by_name_on_id_churn() {
        let old_id = PeerId::new();
        let new_id = PeerId::new();
        let mut arrangement = ScreenArrangement::from_screens(vec![
            local(1, 0.0, 0.0, 1920.0, 1080.0),
            remote(2, "laptop", -1920.0, 0.0, 1920.0, 1080.0, old_id),
        ]);
        // Peer reinstalled and came back with a new id but the same name:
        // it keeps its arranged position.
        let mut screen = arrangement.screen_for_peer(old_id).unwrap().clone();
        screen.peer_id = None;
        arrangement = ScreenArrangement::from_screens(vec![
            arrangement.screens()[0].clone(),
            screen,
        ]);
        arrangement.update_remote_screen(new_id, "laptop", ScreenSize::new(1920, 1080));
        let updated = arrangement.screen_for_peer(new_id).unwrap();
        assert!((updated.x - -1920.0).abs() < f64::EPSILON);
    }

    #[test]
    fn new_remote_lands_right_of_everything() {
        let peer = PeerId::new();
        let mut arrangement =
            ScreenArrangement::from_screens(vec![local(1, 0.0, 0.0, 1920.0, 1080.0)]);
        arrangement.update_remote_screen(peer, "laptop", ScreenSize::new(2560, 1440));
        let screen = arrangement.screen_for_peer(peer).unwrap();
        assert!((screen.x - 1920.0).abs() < f64::EPSILON);
        // And is immediately adjacent on the right edge.
        let links = HashMap::new();
        assert_eq!(arrangement.peer_for_edge(Edge::Right, &links), Some(peer));
    }

    #[test]
    fn stale_remote_screens_are_removed() {
        let connected_peer = PeerId::new();
        let gone_peer = PeerId::new();
        let mut arrangement = ScreenArrangement::from_screens(vec![
            local(1, 0.0, 0.0, 1920.0, 1080.0),
            remote(2, "a", 1920.0, 0.0, 1920.0, 1080.0, connected_peer),
            remote(3, "b", -1920.0, 0.0, 1920.0, 1080.0, gone_peer),
            ArrangedScreen {
                peer_id: None,
                ..remote(4, "unresolved", 0.0, 1080.0, 1920.0, 1080.0, gone_peer)
            },
        ]);
        let connected: HashSet<_> = [connected_peer].into_iter().collect();
        arrangement.remove_stale_remote_screens(&connected);
        assert_eq!(arrangement.screens().len(), 2);
        assert!(arrangement.screen_for_peer(connected_peer).is_some());
        assert!(arrangement.screen_for_peer(gone_peer).is_none());
    }

    #[test]
    fn update_position_moves_screen() {
        let peer = PeerId::new();
        let mut arrangement = side_by_side(peer);
        arrangement.update_position(2, 0.0, -1080.0);
        let screen = arrangement.screen_for_peer(peer).unwrap();
        assert!((screen.y - -1080.0).abs() < f64::EPSILON);
        let links = HashMap::new();
        assert_eq!(arrangement.peer_for_edge(Edge::Top, &links), Some(peer));
        assert_eq!(arrangement.peer_for_edge(Edge::Left, &links), None);
    }

    #[test]
    fn combined_bounds_span_all_locals() {
        let mut arrangement = ScreenArrangement::new();
        arrangement.initialize_local_displays(&[
            ("main".to_string(), Rect::new(0.0, 0.0, 1920.0, 1080.0)),
            ("side".to_string(), Rect::new(1920.0, -200.0, 1280.0, 1024.0)),
        ]);
        let bounds = arrangement.combined_local_bounds().unwrap();
        assert!((bounds.x).abs() < f64::EPSILON);
        assert!((bounds.y - -200.0).abs() < f64::EPSILON);
        assert!((bounds.right() - 3200.0).abs() < f64::EPSILON);
        assert!((bounds.bottom() - 1080.0).abs() < f64::EPSILON);
    }
}
