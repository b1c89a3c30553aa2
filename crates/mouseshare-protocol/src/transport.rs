//! TCP transport: bind, accept, and connect.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::ProtocolError;

/// Default listener port shared by every mouseshare peer.
pub const DEFAULT_PORT: u16 = 24801;

/// TCP transport layer for mouseshare.
///
/// One listener accepts inbound connections; outbound connections are opened
/// per peer on demand.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind the shared listener.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ProtocolError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProtocolError::Bind(e.to_string()))?;
        info!(addr = %addr, "transport listening");
        Ok(Self { listener })
    }

    /// Accept an incoming connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ProtocolError> {
        let (stream, remote) = self
            .listener
            .accept()
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        debug!(remote = %remote, "accepted connection");
        Ok((stream, remote))
    }

    /// Connect to a remote peer.
    pub async fn connect(addr: SocketAddr) -> Result<TcpStream, ProtocolError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        debug!(remote = %addr, "connected to peer");
        Ok(stream)
    }

    /// Get the local address this transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ProtocolError> {
        self.listener
            .local_addr()
            .map_err(|e| ProtocolError::Connection(e.to_string()))
    }
}
