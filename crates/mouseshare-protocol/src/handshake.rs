//! Connection handshake.
//!
//! The initiator sends a [`HandshakeRequest`] and waits for a
//! [`HandshakeResponse`]; the acceptor verifies the protocol version and the
//! encryption flag before accepting. A mismatched encryption flag, or a
//! first frame that cannot be decoded at all (which is what a mismatched
//! cipher looks like), is answered with `accepted = false` and the
//! connection is torn down by the caller.

use std::time::Duration;

use mouseshare_types::{
    HandshakeRequest, HandshakeResponse, PeerId, ScreenSize, WireMessage, PROTOCOL_VERSION,
};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::ProtocolError;

/// How long either side waits for the other's handshake message.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const ENCRYPTION_MISMATCH: &str = "encryption-mismatch";
const VERSION_MISMATCH: &str = "version-mismatch";

/// What a completed handshake learned about the remote peer.
#[derive(Debug, Clone)]
pub struct HandshakePeer {
    pub peer_id: PeerId,
    pub peer_name: String,
    pub screen: ScreenSize,
}

/// Run the initiator side: send our request, await the response.
pub async fn initiate_handshake(
    conn: &mut Connection,
    our_id: PeerId,
    our_name: &str,
    our_screen: ScreenSize,
    timestamp_us: u64,
) -> Result<HandshakePeer, ProtocolError> {
    let request = HandshakeRequest {
        version: PROTOCOL_VERSION,
        peer_id: our_id,
        peer_name: our_name.to_string(),
        screen: our_screen,
        encryption_enabled: conn.is_encrypted(),
        timestamp_us,
    };
    conn.send(&WireMessage::HandshakeRequest(request)).await?;
    debug!("sent handshake request");

    let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.recv())
        .await
        .map_err(|_| ProtocolError::HandshakeTimeout)?;

    let msg = match reply {
        Ok(Some(msg)) => msg,
        Ok(None) => return Err(ProtocolError::ReceiveClosed),
        // An unreadable response means the peer speaks a different cipher.
        Err(e) if e.is_frame_local() => {
            return Err(ProtocolError::HandshakeRejected(
                ENCRYPTION_MISMATCH.to_string(),
            ));
        }
        Err(e) => return Err(e),
    };

    match msg {
        WireMessage::HandshakeResponse(response) if response.accepted => {
            info!(peer = %response.peer_name, id = %response.peer_id, "handshake complete (initiator)");
            Ok(HandshakePeer {
                peer_id: response.peer_id,
                peer_name: response.peer_name,
                screen: response.screen,
            })
        }
        WireMessage::HandshakeResponse(response) => Err(ProtocolError::HandshakeRejected(
            response
                .error_message
                .unwrap_or_else(|| "rejected".to_string()),
        )),
        other => Err(ProtocolError::Connection(format!(
            "expected handshake response, got {other:?}"
        ))),
    }
}

/// Run the acceptor side: read the peer's request, verify it, respond.
pub async fn accept_handshake(
    conn: &mut Connection,
    our_id: PeerId,
    our_name: &str,
    our_screen: ScreenSize,
) -> Result<HandshakePeer, ProtocolError> {
    let incoming = tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.recv())
        .await
        .map_err(|_| ProtocolError::HandshakeTimeout)?;

    let request = match incoming {
        Ok(Some(WireMessage::HandshakeRequest(request))) => request,
        Ok(Some(other)) => {
            return Err(ProtocolError::Connection(format!(
                "expected handshake request, got {other:?}"
            )));
        }
        Ok(None) => return Err(ProtocolError::ReceiveClosed),
        // First frame unreadable: the peer is sealing with a key we don't
        // share (or not sealing while we are). Tell them so, best-effort.
        Err(e) if e.is_frame_local() => {
            warn!(error = %e, "handshake frame unreadable, rejecting");
            reject(conn, our_id, our_name, our_screen, ENCRYPTION_MISMATCH).await;
            return Err(ProtocolError::HandshakeRejected(
                ENCRYPTION_MISMATCH.to_string(),
            ));
        }
        Err(e) => return Err(e),
    };

    if request.version != PROTOCOL_VERSION {
        reject(conn, our_id, our_name, our_screen, VERSION_MISMATCH).await;
        return Err(ProtocolError::VersionMismatch {
            remote: request.version,
            local: PROTOCOL_VERSION,
        });
    }

    if request.encryption_enabled != conn.is_encrypted() {
        reject(conn, our_id, our_name, our_screen, ENCRYPTION_MISMATCH).await;
        return Err(ProtocolError::HandshakeRejected(
            ENCRYPTION_MISMATCH.to_string(),
        ));
    }

    let response = HandshakeResponse {
        accepted: true,
        peer_id: our_id,
        peer_name: our_name.to_string(),
        screen: our_screen,
        error_message: None,
    };
    conn.send(&WireMessage::HandshakeResponse(response)).await?;

    info!(peer = %request.peer_name, id = %request.peer_id, "handshake complete (acceptor)");
    Ok(HandshakePeer {
        peer_id: request.peer_id,
        peer_name: request.peer_name,
        screen: request.screen,
    })
}

async fn reject(
    conn: &mut Connection,
    our_id: PeerId,
    our_name: &str,
    our_screen: ScreenSize,
    reason: &str,
) {
    let response = HandshakeResponse {
        accepted: false,
        peer_id: our_id,
        peer_name: our_name.to_string(),
        screen: our_screen,
        error_message: Some(reason.to_string()),
    };
    if let Err(e) = conn.send(&WireMessage::HandshakeResponse(response)).await {
        debug!(error = %e, "could not deliver handshake rejection");
    }
}
