//! The controller: owns the control-state machine and every timer around it.
//!
//! All mutable state lives behind one event loop. Capture, transport reader
//! tasks, discovery, and timers feed [`ControllerEvent`]s into a single mpsc
//! channel; the loop applies them one at a time, which gives control-state
//! transitions their total order without any locking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use mouseshare_clipboard::{ClipboardBridge, ClipboardProvider, POLL_INTERVAL};
use mouseshare_discovery::{DiscoveryEvent, DiscoveryService};
use mouseshare_input::{
    CaptureMode, CaptureSignal, EventCapture, EventInjector, CURSOR_EDGE_INSET,
};
use mouseshare_protocol::{Codec, HandshakePeer, TcpTransport};
use mouseshare_types::{
    Edge, InputEvent, InputPacket, PeerId, Point, Rect, ScreenSize, TimedEvent,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::arrangement::{compute_entry_position, ScreenArrangement};
use crate::batch::{BatchQueue, BATCH_INTERVAL};
use crate::config::Settings;
use crate::error::DaemonError;
use crate::peers::{PeerRegistry, PeerState};
use crate::session::{spawn_accept_loop, spawn_connect, LinkContext, PeerLink};
use crate::status::DaemonStatus;

/// Keepalive cadence to every connected peer.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// How long a fresh Controlling session waits for signs of life before
/// giving control back.
pub const FAILSAFE_TIMEOUT: Duration = Duration::from_secs(2);

/// Peer silence that ends a Controlling session.
pub const CONTROLLING_SILENCE: Duration = Duration::from_secs(5);

/// Window after returning to Local during which edge arrivals are ignored.
pub const COOLDOWN: Duration = Duration::from_millis(500);

/// The synthetic cursor must get this far from the entry edge before the
/// return detector arms.
pub const RETURN_AWAY_DISTANCE: f64 = 300.0;

/// Once armed, coming back within this distance of the entry edge returns
/// control.
pub const RETURN_EDGE_DISTANCE: f64 = 3.0;

/// Events processed by the controller's event loop.
pub enum ControllerEvent {
    /// A signal from the capture backend.
    Capture(CaptureSignal),
    /// A connection finished its handshake.
    Established {
        peer: HandshakePeer,
        endpoint: Option<SocketAddr>,
        link: PeerLink,
    },
    /// An outbound connection attempt failed.
    ConnectFailed {
        peer_id: PeerId,
        addr: SocketAddr,
        error: String,
    },
    /// A packet arrived from a peer.
    PeerPacket {
        peer_id: PeerId,
        link_id: u64,
        packet: InputPacket,
        gaps: u64,
    },
    /// A peer's connection closed or failed.
    PeerDisconnected {
        peer_id: PeerId,
        link_id: u64,
        reason: String,
    },
    /// The writer task could not send.
    LinkSendFailed {
        peer_id: PeerId,
        link_id: u64,
        error: String,
    },
    /// An mDNS observation.
    Discovery(DiscoveryEvent),
    /// The failsafe timer armed at this generation expired.
    FailsafeExpired { generation: u64 },
    /// Stop the daemon.
    Shutdown,
}

/// Why a Controlling session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaveReason {
    /// The user pressed the escape key.
    Escaped,
    /// The controlled host reported the cursor crossing back.
    PeerReturned,
    /// Failsafe, silence, or a connection error.
    Lost,
}

/// State while forwarding input to a peer.
struct ControllingState {
    peer_id: PeerId,
    exit_edge: Edge,
    /// Normalized position along the exit edge, for restoring the cursor.
    exit_rel: f64,
    acked: bool,
    failsafe_rearmed: bool,
    generation: u64,
}

/// State while applying input from a peer.
struct ControlledState {
    peer_id: PeerId,
    entry_edge: Edge,
    has_moved_away: bool,
    /// Synthetic cursor in virtual coordinates, for return-edge detection.
    cursor: Point,
    bounds: Rect,
}

/// The three-way control state. Exactly one variant holds at any instant,
/// and the non-Local variants name exactly one counterparty.
enum ControlState {
    Local,
    Controlling(ControllingState),
    Controlled(ControlledState),
}

/// The mouseshare controller daemon.
pub struct Controller {
    settings: Settings,
    settings_path: Option<PathBuf>,
    local_id: PeerId,
    arrangement: ScreenArrangement,
    peers: PeerRegistry,
    links: HashMap<PeerId, PeerLink>,
    state: ControlState,
    capture: Box<dyn EventCapture>,
    injector: Box<dyn EventInjector>,
    clipboard: Option<ClipboardBridge>,
    batch: BatchQueue,
    cooldown_until: Option<Instant>,
    failsafe_generation: u64,
    event_tx: mpsc::Sender<ControllerEvent>,
    event_rx: mpsc::Receiver<ControllerEvent>,
    status_tx: watch::Sender<DaemonStatus>,
    status_message: String,
    started_at: Instant,
    transport: Option<TcpTransport>,
    discovery: Option<DiscoveryService>,
    accept_task: Option<JoinHandle<()>>,
}

impl Controller {
    /// Create a controller over the given transport and input backends.
    pub fn new(
        settings: Settings,
        local_id: PeerId,
        transport: TcpTransport,
        capture: Box<dyn EventCapture>,
        injector: Box<dyn EventInjector>,
    ) -> Self {
        let mut arrangement = ScreenArrangement::from_screens(settings.arrangement.clone());
        if arrangement.combined_local_bounds().is_none() {
            arrangement.initialize_local_displays(&[(
                "primary".to_string(),
                Rect::new(
                    0.0,
                    0.0,
                    f64::from(settings.screen_width),
                    f64::from(settings.screen_height),
                ),
            )]);
        }

        let (event_tx, event_rx) = mpsc::channel(1024);
        let (status_tx, _) = watch::channel(DaemonStatus::default());

        Self {
            settings,
            settings_path: None,
            local_id,
            arrangement,
            peers: PeerRegistry::new(),
            links: HashMap::new(),
            state: ControlState::Local,
            capture,
            injector,
            clipboard: None,
            batch: BatchQueue::new(),
            cooldown_until: None,
            failsafe_generation: 0,
            event_tx,
            event_rx,
            status_tx,
            status_message: "Running".to_string(),
            started_at: Instant::now(),
            transport: Some(transport),
            discovery: None,
            accept_task: None,
        }
    }

    /// Enable clipboard synchronisation over the given provider.
    pub fn set_clipboard(&mut self, provider: Box<dyn ClipboardProvider>) {
        self.clipboard = Some(ClipboardBridge::new(provider));
    }

    /// Where to persist settings changes (auto-link bindings, arrangement).
    pub fn set_settings_path(&mut self, path: PathBuf) {
        self.settings_path = Some(path);
    }

    /// Replace the local screens from the OS display list.
    pub fn set_local_displays(&mut self, displays: &[(String, Rect)]) {
        self.arrangement.initialize_local_displays(displays);
    }

    /// Attach a running discovery service; its events feed the event loop.
    pub fn attach_discovery(
        &mut self,
        service: DiscoveryService,
        mut events: mpsc::Receiver<DiscoveryEvent>,
    ) {
        self.discovery = Some(service);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send(ControllerEvent::Discovery(event)).await.is_err() {
                    break;
                }
            }
        });
    }

    /// Clone of the sender feeding the event loop.
    pub fn event_sender(&self) -> mpsc::Sender<ControllerEvent> {
        self.event_tx.clone()
    }

    /// Watch receiver for status snapshots.
    pub fn status_receiver(&self) -> watch::Receiver<DaemonStatus> {
        self.status_tx.subscribe()
    }

    /// Advertised dimensions of the primary local screen.
    fn local_screen_size(&self) -> ScreenSize {
        self.arrangement
            .screens()
            .iter()
            .find(|s| s.is_local)
            .map_or(
                ScreenSize::new(self.settings.screen_width, self.settings.screen_height),
                |s| ScreenSize::new(to_pixels(s.width), to_pixels(s.height)),
            )
    }

    fn link_context(&self) -> LinkContext {
        let codec = if self.settings.encryption_enabled {
            Codec::encrypted(&self.settings.password)
        } else {
            Codec::plaintext()
        };
        LinkContext {
            local_id: self.local_id,
            local_name: self.settings.name.clone(),
            local_screen: self.local_screen_size(),
            codec,
            events: self.event_tx.clone(),
        }
    }

    /// Run the controller event loop until shutdown.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        let (signal_tx, mut signal_rx) = mpsc::channel::<CaptureSignal>(1024);
        self.capture.start(signal_tx).await?;
        self.capture.set_mode(CaptureMode::Watch).await?;

        // Forward capture signals into the event loop.
        let capture_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(signal) = signal_rx.recv().await {
                if capture_tx
                    .send(ControllerEvent::Capture(signal))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        if let Some(transport) = self.transport.take() {
            self.accept_task = Some(spawn_accept_loop(transport, self.link_context()));
        }

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        let mut batch_tick = tokio::time::interval(BATCH_INTERVAL);
        let mut clipboard_tick = tokio::time::interval(POLL_INTERVAL);
        for tick in [&mut heartbeat, &mut batch_tick, &mut clipboard_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        self.publish_status();
        info!(id = %self.local_id, name = %self.settings.name, "controller running");

        loop {
            tokio::select! {
                event = self.event_rx.recv() => {
                    match event {
                        Some(ControllerEvent::Shutdown) | None => break,
                        Some(event) => self.handle_event(event).await,
                    }
                }
                _ = heartbeat.tick() => self.on_heartbeat().await,
                _ = batch_tick.tick() => self.flush_batch(),
                _ = clipboard_tick.tick() => self.on_clipboard_tick().await,
            }
        }

        self.shutdown().await
    }

    async fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Capture(CaptureSignal::Input(timed)) => {
                self.on_captured_input(timed);
            }
            ControllerEvent::Capture(CaptureSignal::Escape) => {
                if matches!(self.state, ControlState::Controlling(_)) {
                    info!("escape pressed, returning to local control");
                    self.leave_controlling(LeaveReason::Escaped).await;
                }
            }
            ControllerEvent::Capture(CaptureSignal::EdgeArrival { edge, position }) => {
                self.on_edge_arrival(edge, position).await;
            }
            ControllerEvent::Established {
                peer,
                endpoint,
                link,
            } => {
                self.on_established(peer, endpoint, link);
            }
            ControllerEvent::ConnectFailed {
                peer_id,
                addr,
                error,
            } => {
                warn!(peer = %peer_id, addr = %addr, error = %error, "connect failed");
                if let Some(peer) = self.peers.get_mut(peer_id) {
                    peer.state = PeerState::Error;
                }
                self.publish_status();
            }
            ControllerEvent::PeerPacket {
                peer_id,
                link_id,
                packet,
                gaps,
            } => {
                if self.current_link_id(peer_id) != Some(link_id) {
                    debug!(peer = %peer_id, "packet from superseded link, ignoring");
                    return;
                }
                self.on_peer_packet(peer_id, packet, gaps).await;
            }
            ControllerEvent::PeerDisconnected {
                peer_id,
                link_id,
                reason,
            } => {
                if self.current_link_id(peer_id) != Some(link_id) {
                    debug!(peer = %peer_id, "disconnect from superseded link, ignoring");
                    return;
                }
                self.on_peer_disconnected(peer_id, &reason).await;
            }
            ControllerEvent::LinkSendFailed {
                peer_id,
                link_id,
                error,
            } => {
                if self.current_link_id(peer_id) != Some(link_id) {
                    return;
                }
                self.on_peer_disconnected(peer_id, &error).await;
            }
            ControllerEvent::Discovery(event) => self.on_discovery(event),
            ControllerEvent::FailsafeExpired { generation } => {
                self.on_failsafe(generation).await;
            }
            ControllerEvent::Shutdown => {}
        }
    }

    fn current_link_id(&self, peer_id: PeerId) -> Option<u64> {
        self.links.get(&peer_id).map(PeerLink::link_id)
    }

    // -----------------------------------------------------------------
    // Capture side
    // -----------------------------------------------------------------

    fn on_captured_input(&mut self, timed: TimedEvent) {
        if !matches!(self.state, ControlState::Controlling(_)) {
            // A stray event from the moment of a mode switch.
            return;
        }
        let immediate = timed.event.flushes_immediately();
        self.batch.push(timed);
        if immediate {
            self.flush_batch();
        }
    }

    fn flush_batch(&mut self) {
        let ControlState::Controlling(ctl) = &self.state else {
            return;
        };
        if self.batch.is_empty() {
            return;
        }
        let peer_id = ctl.peer_id;
        let events = self.batch.take();
        self.send_to(peer_id, events);
    }

    async fn on_edge_arrival(&mut self, edge: Edge, position: Point) {
        if !matches!(self.state, ControlState::Local) {
            return;
        }
        if let Some(until) = self.cooldown_until {
            if Instant::now() < until {
                debug!(%edge, "edge arrival during cooldown, ignoring");
                return;
            }
        }

        let peer_id = self
            .arrangement
            .peer_for_edge(edge, &self.settings.edge_links)
            .or_else(|| self.auto_link(edge));
        let Some(peer_id) = peer_id else {
            return;
        };

        let connected = self
            .peers
            .get(peer_id)
            .is_some_and(|p| p.state.is_connected());
        if !connected {
            debug!(peer = %peer_id, %edge, "edge peer not connected");
            return;
        }

        self.enter_controlling(peer_id, edge, position).await;
    }

    /// If exactly one peer is connected and the edge is unbound, bind it to
    /// that peer and persist the binding.
    fn auto_link(&mut self, edge: Edge) -> Option<PeerId> {
        if self.settings.edge_links.contains_key(&edge) {
            return None;
        }
        let connected = self.peers.connected_ids();
        if connected.len() != 1 {
            return None;
        }
        let peer_id = connected.into_iter().next()?;
        info!(peer = %peer_id, %edge, "auto-linking edge to the only connected peer");
        self.settings.edge_links.insert(edge, peer_id);
        self.persist_settings();
        Some(peer_id)
    }

    // -----------------------------------------------------------------
    // Local -> Controlling
    // -----------------------------------------------------------------

    async fn enter_controlling(&mut self, peer_id: PeerId, edge: Edge, position: Point) {
        let source = self.arrangement.local_screen_at(position).cloned();
        let exit_rel = source.as_ref().map_or(0.5, |screen| {
            let rect = screen.rect();
            let along = if edge.is_vertical() {
                position.y
            } else {
                position.x
            };
            let extent = rect.parallel_extent(edge);
            if extent > 0.0 {
                ((along - rect.parallel_origin(edge)) / extent).clamp(0.0, 1.0)
            } else {
                0.5
            }
        });

        let entry_rel = match (source.as_ref(), self.arrangement.screen_for_peer(peer_id)) {
            (Some(source), Some(target)) => {
                compute_entry_position(exit_rel, source, target, edge)
            }
            _ => exit_rel,
        };

        if let Err(e) = self.injector.set_cursor_visible(false).await {
            warn!(error = %e, "hide cursor failed");
        }
        if let Err(e) = self.injector.park_cursor().await {
            warn!(error = %e, "park cursor failed");
        }
        if let Err(e) = self.capture.set_mode(CaptureMode::Forward).await {
            warn!(error = %e, "capture mode switch failed");
        }

        let enter_edge = edge.opposite();
        let (rel_x, rel_y) = match enter_edge {
            Edge::Left => (0.0, entry_rel),
            Edge::Right => (1.0, entry_rel),
            Edge::Top => (entry_rel, 0.0),
            Edge::Bottom => (entry_rel, 1.0),
        };
        let enter = TimedEvent::new(
            self.now_us(),
            InputEvent::ScreenEnter {
                edge: enter_edge,
                rel_x,
                rel_y,
            },
        );
        self.send_to(peer_id, vec![enter]);

        self.batch.clear();
        let generation = self.arm_failsafe();
        self.state = ControlState::Controlling(ControllingState {
            peer_id,
            exit_edge: edge,
            exit_rel,
            acked: false,
            failsafe_rearmed: false,
            generation,
        });
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.state = PeerState::Controlling;
        }
        let name = self.peer_name(peer_id);
        info!(peer = %name, %edge, "controlling remote");
        self.set_status(format!("Controlling {name}"));
    }

    fn arm_failsafe(&mut self) -> u64 {
        self.failsafe_generation += 1;
        let generation = self.failsafe_generation;
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(FAILSAFE_TIMEOUT).await;
            let _ = tx
                .send(ControllerEvent::FailsafeExpired { generation })
                .await;
        });
        generation
    }

    // -----------------------------------------------------------------
    // Controlling -> Local
    // -----------------------------------------------------------------

    async fn leave_controlling(&mut self, reason: LeaveReason) {
        let ControlState::Controlling(ctl) =
            std::mem::replace(&mut self.state, ControlState::Local)
        else {
            return;
        };

        // Invalidate the armed failsafe timer.
        self.failsafe_generation += 1;
        self.batch.clear();

        if let Err(e) = self.capture.set_mode(CaptureMode::Watch).await {
            warn!(error = %e, "capture mode switch failed");
        }
        if let Err(e) = self.injector.set_mouse_association(true).await {
            warn!(error = %e, "mouse reassociation failed");
        }
        if let Err(e) = self
            .injector
            .warp_to_edge(ctl.exit_edge, ctl.exit_rel)
            .await
        {
            warn!(error = %e, "exit warp failed");
        }
        if let Err(e) = self.injector.set_cursor_visible(true).await {
            warn!(error = %e, "show cursor failed");
        }

        self.cooldown_until = Some(Instant::now() + COOLDOWN);

        // Best-effort: the peer may already be gone.
        let leave = TimedEvent::new(
            self.now_us(),
            InputEvent::ScreenLeave {
                edge: ctl.exit_edge.opposite(),
            },
        );
        self.send_to(ctl.peer_id, vec![leave]);

        if let Some(peer) = self.peers.get_mut(ctl.peer_id) {
            if peer.state == PeerState::Controlling {
                peer.state = PeerState::Connected;
            }
        }

        let name = self.peer_name(ctl.peer_id);
        let message = match reason {
            LeaveReason::Escaped => "Escaped to local control".to_string(),
            LeaveReason::PeerReturned => "Running".to_string(),
            LeaveReason::Lost => format!("Lost connection to {name}"),
        };
        info!(peer = %name, ?reason, "returned to local control");
        self.set_status(message);
    }

    // -----------------------------------------------------------------
    // Peer traffic
    // -----------------------------------------------------------------

    async fn on_peer_packet(&mut self, peer_id: PeerId, packet: InputPacket, gaps: u64) {
        self.peers.mark_seen(peer_id, Instant::now());
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.packets_received += 1;
            peer.sequence_gaps = gaps;
        }

        for timed in packet.events {
            self.apply_peer_event(peer_id, timed).await;
        }
    }

    async fn apply_peer_event(&mut self, peer_id: PeerId, timed: TimedEvent) {
        match timed.event {
            InputEvent::Heartbeat => {}
            InputEvent::ScreenEnter { edge, rel_x, rel_y } => {
                self.on_screen_enter(peer_id, edge, rel_x, rel_y).await;
            }
            InputEvent::ScreenEnterAck { .. } => {
                if let ControlState::Controlling(ctl) = &mut self.state {
                    if ctl.peer_id == peer_id {
                        ctl.acked = true;
                    }
                }
            }
            InputEvent::ScreenLeave { .. } => {
                let was_controlling = matches!(
                    &self.state,
                    ControlState::Controlling(ctl) if ctl.peer_id == peer_id
                );
                let was_controlled = matches!(
                    &self.state,
                    ControlState::Controlled(c) if c.peer_id == peer_id
                );
                if was_controlling {
                    self.leave_controlling(LeaveReason::PeerReturned).await;
                } else if was_controlled {
                    self.exit_controlled(false).await;
                }
            }
            InputEvent::ClipboardUpdate { payload } => {
                if !self.settings.clipboard_sync_enabled {
                    return;
                }
                if let Some(bridge) = &mut self.clipboard {
                    if let Err(e) = bridge.apply_remote(payload).await {
                        warn!(peer = %peer_id, error = %e, "clipboard apply failed");
                    }
                }
            }
            event => self.apply_controlled_input(peer_id, &event).await,
        }
    }

    async fn on_screen_enter(&mut self, peer_id: PeerId, edge: Edge, rel_x: f64, rel_y: f64) {
        if !matches!(self.state, ControlState::Local) {
            warn!(peer = %peer_id, "ScreenEnter while not local, ignoring");
            return;
        }
        let connected = self
            .peers
            .get(peer_id)
            .is_some_and(|p| p.state.is_connected());
        if !connected {
            warn!(peer = %peer_id, "ScreenEnter from unconnected peer, ignoring");
            return;
        }

        if let Err(e) = self.capture.set_mode(CaptureMode::Passive).await {
            warn!(error = %e, "capture mode switch failed");
        }

        let ack = TimedEvent::new(self.now_us(), InputEvent::ScreenEnterAck { edge });
        self.send_to(peer_id, vec![ack]);

        let bounds = self.arrangement.combined_local_bounds().unwrap_or_else(|| {
            Rect::new(
                0.0,
                0.0,
                f64::from(self.settings.screen_width),
                f64::from(self.settings.screen_height),
            )
        });
        let rel_along = if edge.is_vertical() { rel_y } else { rel_x };
        let entry = bounds.point_at_edge(edge, rel_along, CURSOR_EDGE_INSET);

        if let Err(e) = self.injector.move_to(entry).await {
            warn!(error = %e, "entry warp failed");
        }
        if let Err(e) = self.injector.set_cursor_visible(true).await {
            warn!(error = %e, "show cursor failed");
        }

        self.state = ControlState::Controlled(ControlledState {
            peer_id,
            entry_edge: edge,
            has_moved_away: false,
            cursor: entry,
            bounds,
        });
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.state = PeerState::Controlled;
        }
        let name = self.peer_name(peer_id);
        info!(peer = %name, %edge, "now controlled by remote");
        self.set_status(format!("Controlled by {name}"));
    }

    async fn apply_controlled_input(&mut self, peer_id: PeerId, event: &InputEvent) {
        let ControlState::Controlled(c) = &self.state else {
            warn!(peer = %peer_id, "input event while not controlled, dropping");
            return;
        };
        if c.peer_id != peer_id {
            warn!(peer = %peer_id, "input from non-controlling peer, dropping");
            return;
        }

        if let Err(e) = self.injector.inject(event).await {
            warn!(error = %e, "inject failed");
        }

        // Track the synthetic cursor and run return-edge detection.
        let (InputEvent::MouseMove { dx, dy, .. } | InputEvent::MouseDrag { dx, dy, .. }) = event
        else {
            return;
        };
        let should_return = {
            let ControlState::Controlled(c) = &mut self.state else {
                return;
            };
            c.cursor.x = (c.cursor.x + dx).clamp(c.bounds.x, c.bounds.right() - 1.0);
            c.cursor.y = (c.cursor.y + dy).clamp(c.bounds.y, c.bounds.bottom() - 1.0);

            let distance = match c.entry_edge {
                Edge::Left => c.cursor.x - c.bounds.x,
                Edge::Right => c.bounds.right() - c.cursor.x,
                Edge::Top => c.cursor.y - c.bounds.y,
                Edge::Bottom => c.bounds.bottom() - c.cursor.y,
            };
            if distance >= RETURN_AWAY_DISTANCE {
                c.has_moved_away = true;
            }
            c.has_moved_away && distance <= RETURN_EDGE_DISTANCE
        };

        if should_return {
            info!("cursor crossed back over the entry edge");
            self.exit_controlled(true).await;
        }
    }

    // -----------------------------------------------------------------
    // Controlled -> Local
    // -----------------------------------------------------------------

    async fn exit_controlled(&mut self, send_leave: bool) {
        let ControlState::Controlled(c) =
            std::mem::replace(&mut self.state, ControlState::Local)
        else {
            return;
        };

        if send_leave {
            let leave = TimedEvent::new(
                self.now_us(),
                InputEvent::ScreenLeave {
                    edge: c.entry_edge,
                },
            );
            self.send_to(c.peer_id, vec![leave]);
        }

        if let Err(e) = self.capture.set_mode(CaptureMode::Watch).await {
            warn!(error = %e, "capture mode switch failed");
        }

        if let Some(peer) = self.peers.get_mut(c.peer_id) {
            if peer.state == PeerState::Controlled {
                peer.state = PeerState::Connected;
            }
        }
        info!(peer = %self.peer_name(c.peer_id), "remote session ended");
        self.set_status("Running".to_string());
    }

    // -----------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------

    fn on_established(
        &mut self,
        peer: HandshakePeer,
        endpoint: Option<SocketAddr>,
        link: PeerLink,
    ) {
        let peer_id = peer.peer_id;
        if let Some(existing) = self.links.get(&peer_id) {
            // Simultaneous connects race: both sides keep the connection
            // initiated by the lower peer id so they converge on one socket.
            let keep_new = if self.local_id.as_uuid() < peer_id.as_uuid() {
                !link.is_inbound()
            } else {
                link.is_inbound()
            };
            if !keep_new {
                debug!(peer = %peer_id, "dropping duplicate connection");
                return;
            }
            debug!(
                peer = %peer_id,
                old = existing.link_id(),
                new = link.link_id(),
                "replacing duplicate connection"
            );
        }
        self.links.insert(peer_id, link);
        self.peers
            .upsert_connected(peer_id, &peer.peer_name, peer.screen, endpoint);
        self.arrangement
            .update_remote_screen(peer_id, &peer.peer_name, peer.screen);
        info!(peer = %peer.peer_name, id = %peer_id, "session established");
        if matches!(self.state, ControlState::Local) {
            self.set_status("Running".to_string());
        } else {
            self.publish_status();
        }
    }

    async fn on_peer_disconnected(&mut self, peer_id: PeerId, reason: &str) {
        self.links.remove(&peer_id);
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.state = PeerState::Disconnected;
        }
        let name = self.peer_name(peer_id);
        info!(peer = %name, reason, "peer disconnected");

        let was_controlling = matches!(
            &self.state,
            ControlState::Controlling(ctl) if ctl.peer_id == peer_id
        );
        let was_controlled = matches!(
            &self.state,
            ControlState::Controlled(c) if c.peer_id == peer_id
        );
        if was_controlling {
            self.leave_controlling(LeaveReason::Lost).await;
        } else if was_controlled {
            self.exit_controlled(false).await;
            self.set_status(format!("Lost connection to {name}"));
        } else {
            self.publish_status();
        }
    }

    fn on_discovery(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::PeerFound(discovered)
            | DiscoveryEvent::PeerUpdated(discovered) => {
                if discovered.peer_id == self.local_id {
                    return;
                }
                let peer = self.peers.upsert_discovered(&discovered);
                let state = peer.state;
                self.arrangement.update_remote_screen(
                    discovered.peer_id,
                    &discovered.name,
                    discovered.screen,
                );

                if self.settings.auto_connect
                    && !state.is_connected()
                    && state != PeerState::Connecting
                {
                    if let Some(peer) = self.peers.get_mut(discovered.peer_id) {
                        peer.state = PeerState::Connecting;
                    }
                    info!(peer = %discovered.name, addr = %discovered.address, "connecting");
                    self.set_status(format!("Connecting to {}", discovered.name));
                    spawn_connect(
                        discovered.address,
                        discovered.peer_id,
                        self.link_context(),
                        self.now_us(),
                    );
                }
            }
            DiscoveryEvent::PeerLost(peer_id) => {
                debug!(peer = %peer_id, "peer record withdrawn");
                if self.links.contains_key(&peer_id) {
                    // The transport will notice on its own; keep the record
                    // until the connection actually drops.
                    return;
                }
                self.peers.remove(peer_id);
                let connected = self.peers.connected_ids();
                self.arrangement.remove_stale_remote_screens(&connected);
                self.publish_status();
            }
        }
    }

    // -----------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------

    async fn on_heartbeat(&mut self) {
        let now_us = self.now_us();
        let ids: Vec<PeerId> = self.links.keys().copied().collect();
        for peer_id in ids {
            self.send_to(peer_id, vec![TimedEvent::new(now_us, InputEvent::Heartbeat)]);
        }

        let controlling_peer = match &self.state {
            ControlState::Controlling(ctl) => Some(ctl.peer_id),
            _ => None,
        };
        if let Some(peer_id) = controlling_peer {
            let silent = self
                .peers
                .get(peer_id)
                .and_then(|p| p.silence(Instant::now()))
                .map_or(true, |d| d > CONTROLLING_SILENCE);
            if silent {
                warn!(peer = %peer_id, "peer silent while controlling");
                self.leave_controlling(LeaveReason::Lost).await;
            }
        }
    }

    async fn on_failsafe(&mut self, generation: u64) {
        let (peer_id, acked, rearmed) = match &self.state {
            ControlState::Controlling(ctl) if ctl.generation == generation => {
                (ctl.peer_id, ctl.acked, ctl.failsafe_rearmed)
            }
            _ => return,
        };

        let alive = self
            .peers
            .get(peer_id)
            .and_then(|p| p.silence(Instant::now()))
            .is_some_and(|d| d < FAILSAFE_TIMEOUT);

        if !alive {
            warn!(peer = %peer_id, "failsafe expired with silent peer");
            self.leave_controlling(LeaveReason::Lost).await;
        } else if !acked {
            if rearmed {
                warn!(peer = %peer_id, "no ScreenEnterAck after re-armed failsafe");
                self.leave_controlling(LeaveReason::Lost).await;
            } else {
                debug!(peer = %peer_id, "failsafe re-armed waiting for ack");
                let generation = self.arm_failsafe();
                if let ControlState::Controlling(ctl) = &mut self.state {
                    ctl.failsafe_rearmed = true;
                    ctl.generation = generation;
                }
            }
        }
        // Acked and alive: the timer retires; the silence check at each
        // heartbeat takes over.
    }

    async fn on_clipboard_tick(&mut self) {
        if !self.settings.clipboard_sync_enabled {
            return;
        }
        let Some(bridge) = &mut self.clipboard else {
            return;
        };
        match bridge.poll_local().await {
            Ok(Some(payload)) => {
                let now_us = self.now_us();
                let ids: Vec<PeerId> = self.links.keys().copied().collect();
                for peer_id in ids {
                    let update = TimedEvent::new(
                        now_us,
                        InputEvent::ClipboardUpdate {
                            payload: payload.clone(),
                        },
                    );
                    self.send_to(peer_id, vec![update]);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "clipboard poll failed"),
        }
    }

    // -----------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------

    fn send_to(&mut self, peer_id: PeerId, events: Vec<TimedEvent>) {
        let Some(link) = self.links.get(&peer_id) else {
            debug!(peer = %peer_id, "no link for outbound events");
            return;
        };
        if link.enqueue(events) {
            if let Some(peer) = self.peers.get_mut(peer_id) {
                peer.packets_sent += 1;
            }
        }
    }

    fn peer_name(&self, peer_id: PeerId) -> String {
        self.peers
            .get(peer_id)
            .map_or_else(|| peer_id.to_string(), |p| p.name.clone())
    }

    fn now_us(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    fn set_status(&mut self, message: String) {
        self.status_message = message;
        self.publish_status();
    }

    fn publish_status(&self) {
        let (controlling, controlled_by) = match &self.state {
            ControlState::Local => (None, None),
            ControlState::Controlling(ctl) => (Some(ctl.peer_id), None),
            ControlState::Controlled(c) => (None, Some(c.peer_id)),
        };
        self.status_tx.send_replace(DaemonStatus {
            message: self.status_message.clone(),
            connected_peers: self.peers.connected_count(),
            controlling,
            controlled_by,
        });
    }

    fn persist_settings(&mut self) {
        self.settings.arrangement = self.arrangement.screens().to_vec();
        let Some(path) = &self.settings_path else {
            return;
        };
        match serde_json::to_vec_pretty(&self.settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!(path = %path.display(), error = %e, "settings persist failed");
                }
            }
            Err(e) => warn!(error = %e, "settings serialisation failed"),
        }
    }

    async fn shutdown(&mut self) -> Result<(), DaemonError> {
        info!("controller shutting down");

        // End any active session politely.
        if matches!(self.state, ControlState::Controlling(_)) {
            self.leave_controlling(LeaveReason::Lost).await;
        } else if matches!(self.state, ControlState::Controlled(_)) {
            self.exit_controlled(true).await;
        }

        // Give the writer tasks a beat to drain the goodbye, then drop the
        // links, which aborts their tasks and closes the sockets.
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.links.clear();

        if let Some(task) = self.accept_task.take() {
            task.abort();
        }

        self.capture.shutdown().await?;

        if let Some(discovery) = self.discovery.take() {
            let _ = tokio::task::spawn_blocking(move || discovery.shutdown()).await;
        }

        self.persist_settings();
        info!("controller stopped");
        Ok(())
    }
}

/// Round a virtual-space extent back to whole pixels.
fn to_pixels(extent: f64) -> u32 {
    if extent <= 0.0 {
        return 0;
    }
    let rounded = extent.round();
    if rounded >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        rounded as u32
    }
}
