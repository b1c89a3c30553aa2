//! Per-peer session links and connection establishment tasks.
//!
//! A [`PeerLink`] owns the two tasks wrapped around one connection: a writer
//! draining the controller's outbound queue, and a reader feeding received
//! packets into the controller inbox. Only the controller enqueues; only the
//! reader task touches the receive half.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mouseshare_protocol::{
    accept_handshake, initiate_handshake, Codec, Connection, ProtocolError, TcpTransport,
};
use mouseshare_types::{PeerId, ScreenSize, TimedEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::controller::ControllerEvent;

/// Backoff after a failed accept before listening again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_secs(2);

/// Everything a connection task needs to handshake on the controller's
/// behalf.
#[derive(Clone)]
pub struct LinkContext {
    pub local_id: PeerId,
    pub local_name: String,
    pub local_screen: ScreenSize,
    pub codec: Codec,
    pub events: mpsc::Sender<ControllerEvent>,
}

/// Monotonic id distinguishing successive links to the same peer, so events
/// from a superseded connection can be told apart from the current one.
static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Live session with one peer.
pub struct PeerLink {
    peer_id: PeerId,
    link_id: u64,
    inbound: bool,
    outbound: mpsc::Sender<Vec<TimedEvent>>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl PeerLink {
    /// Split a handshaken connection into its writer and reader tasks.
    pub fn spawn(
        peer_id: PeerId,
        inbound: bool,
        connection: Connection,
        events: mpsc::Sender<ControllerEvent>,
    ) -> Self {
        let link_id = NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed);
        let (outbound, mut outbound_rx) = mpsc::channel::<Vec<TimedEvent>>(256);
        let (mut sender, mut receiver) = connection.into_split();

        let writer_events = events.clone();
        let writer = tokio::spawn(async move {
            while let Some(batch) = outbound_rx.recv().await {
                if let Err(e) = sender.send_events(batch).await {
                    warn!(peer = %peer_id, error = %e, "send failed");
                    let _ = writer_events
                        .send(ControllerEvent::LinkSendFailed {
                            peer_id,
                            link_id,
                            error: e.to_string(),
                        })
                        .await;
                    break;
                }
            }
            debug!(peer = %peer_id, "writer task finished");
        });

        let reader = tokio::spawn(async move {
            loop {
                match receiver.recv_packet().await {
                    Ok(Some(packet)) => {
                        let gaps = receiver.gap_count();
                        if events
                            .send(ControllerEvent::PeerPacket {
                                peer_id,
                                link_id,
                                packet,
                                gaps,
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = events
                            .send(ControllerEvent::PeerDisconnected {
                                peer_id,
                                link_id,
                                reason: "connection closed by peer".to_string(),
                            })
                            .await;
                        break;
                    }
                    Err(e) => {
                        let _ = events
                            .send(ControllerEvent::PeerDisconnected {
                                peer_id,
                                link_id,
                                reason: e.to_string(),
                            })
                            .await;
                        break;
                    }
                }
            }
            debug!(peer = %peer_id, "reader task finished");
        });

        Self {
            peer_id,
            link_id,
            inbound,
            outbound,
            writer,
            reader,
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    #[must_use]
    pub fn link_id(&self) -> u64 {
        self.link_id
    }

    /// Whether the remote side initiated this connection.
    #[must_use]
    pub fn is_inbound(&self) -> bool {
        self.inbound
    }

    /// Enqueue a batch for the writer. Returns whether it was accepted;
    /// a full or closed queue drops the batch, which is the documented
    /// backpressure behaviour for in-flight input.
    pub fn enqueue(&self, events: Vec<TimedEvent>) -> bool {
        match self.outbound.try_send(events) {
            Ok(()) => true,
            Err(e) => {
                debug!(peer = %self.peer_id, error = %e, "outbound queue rejected batch");
                false
            }
        }
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

/// Accept inbound connections forever, handshaking each in its own task.
pub fn spawn_accept_loop(transport: TcpTransport, ctx: LinkContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match transport.accept().await {
                Ok((stream, remote)) => {
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        let mut conn = Connection::new(stream, ctx.codec.clone());
                        match accept_handshake(
                            &mut conn,
                            ctx.local_id,
                            &ctx.local_name,
                            ctx.local_screen,
                        )
                        .await
                        {
                            Ok(peer) => {
                                let link = PeerLink::spawn(
                                    peer.peer_id,
                                    true,
                                    conn,
                                    ctx.events.clone(),
                                );
                                let _ = ctx
                                    .events
                                    .send(ControllerEvent::Established {
                                        peer,
                                        endpoint: Some(remote),
                                        link,
                                    })
                                    .await;
                            }
                            Err(e) => {
                                warn!(remote = %remote, error = %e, "inbound handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, backoff = ?ACCEPT_BACKOFF, "accept failed, backing off");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    })
}

/// Connect to a peer and handshake, reporting the outcome to the controller.
pub fn spawn_connect(
    addr: SocketAddr,
    peer_id: PeerId,
    ctx: LinkContext,
    timestamp_us: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let attempt = async {
            let stream = TcpTransport::connect(addr).await?;
            let mut conn = Connection::new(stream, ctx.codec.clone());
            let peer = initiate_handshake(
                &mut conn,
                ctx.local_id,
                &ctx.local_name,
                ctx.local_screen,
                timestamp_us,
            )
            .await?;
            Ok::<_, ProtocolError>((peer, conn))
        }
        .await;

        match attempt {
            Ok((peer, conn)) => {
                let link = PeerLink::spawn(peer.peer_id, false, conn, ctx.events.clone());
                let _ = ctx
                    .events
                    .send(ControllerEvent::Established {
                        peer,
                        endpoint: Some(addr),
                        link,
                    })
                    .await;
            }
            Err(e) => {
                let _ = ctx
                    .events
                    .send(ControllerEvent::ConnectFailed {
                        peer_id,
                        addr,
                        error: e.to_string(),
                    })
                    .await;
            }
        }
    })
}
