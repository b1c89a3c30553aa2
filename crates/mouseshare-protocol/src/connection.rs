//! Framed connections and their split send/receive halves.

use std::net::SocketAddr;

use mouseshare_types::{InputPacket, TimedEvent, WireMessage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{trace, warn};

use crate::codec::{Codec, MAX_FRAME_SIZE};
use crate::error::ProtocolError;

/// Read one raw frame body. Returns `None` on a clean EOF at a frame
/// boundary.
async fn read_raw_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ProtocolError::Connection(e.to_string())),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    match reader.read_exact(&mut body).await {
        Ok(_) => Ok(Some(body)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::ReceiveClosed)
        }
        Err(e) => Err(ProtocolError::Connection(e.to_string())),
    }
}

async fn write_message<W>(
    writer: &mut W,
    codec: &Codec,
    msg: &WireMessage,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = codec.encode(msg)?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| ProtocolError::SendFailed(e.to_string()))?;
    trace!(len = frame.len(), "sent frame");
    Ok(())
}

/// A framed connection to a peer, used whole during the handshake and split
/// into [`FrameSender`] / [`FrameReceiver`] afterwards.
pub struct Connection {
    stream: TcpStream,
    codec: Codec,
}

impl Connection {
    #[must_use]
    pub fn new(stream: TcpStream, codec: Codec) -> Self {
        Self { stream, codec }
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, ProtocolError> {
        self.stream
            .peer_addr()
            .map_err(|e| ProtocolError::Connection(e.to_string()))
    }

    /// Whether frames on this connection are AEAD-sealed.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.codec.is_encrypted()
    }

    /// Send a message on the undivided connection.
    pub async fn send(&mut self, msg: &WireMessage) -> Result<(), ProtocolError> {
        write_message(&mut self.stream, &self.codec, msg).await
    }

    /// Receive one message. `Ok(None)` means the peer closed cleanly.
    pub async fn recv(&mut self) -> Result<Option<WireMessage>, ProtocolError> {
        let Some(body) = read_raw_frame(&mut self.stream).await? else {
            return Ok(None);
        };
        self.codec.decode(&body).map(Some)
    }

    /// Split into independently owned send and receive halves.
    #[must_use]
    pub fn into_split(self) -> (FrameSender, FrameReceiver) {
        let (read_half, write_half) = self.stream.into_split();
        (
            FrameSender {
                writer: write_half,
                codec: self.codec.clone(),
                next_sequence: 1,
            },
            FrameReceiver {
                reader: read_half,
                codec: self.codec,
                last_sequence: 0,
                gap_count: 0,
            },
        )
    }
}

/// Sending half of a connection. Owns the session's outgoing sequence
/// counter.
pub struct FrameSender {
    writer: OwnedWriteHalf,
    codec: Codec,
    next_sequence: u32,
}

impl FrameSender {
    /// Send a pre-built message without touching the sequence counter.
    pub async fn send(&mut self, msg: &WireMessage) -> Result<(), ProtocolError> {
        write_message(&mut self.writer, &self.codec, msg).await
    }

    /// Wrap `events` into the next sequenced packet and send it. Returns the
    /// sequence number used.
    pub async fn send_events(&mut self, events: Vec<TimedEvent>) -> Result<u32, ProtocolError> {
        let sequence = self.next_sequence;
        let packet = InputPacket::new(sequence, events);
        self.send(&WireMessage::Packet(packet)).await?;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        Ok(sequence)
    }
}

/// Receiving half of a connection.
pub struct FrameReceiver {
    reader: OwnedReadHalf,
    codec: Codec,
    last_sequence: u32,
    gap_count: u64,
}

impl FrameReceiver {
    /// Receive the next input packet.
    ///
    /// Frame-local faults (malformed body, failed decryption) are logged and
    /// skipped without advancing the sequence counter; `Ok(None)` means the
    /// peer closed cleanly; any other error is fatal to the connection.
    pub async fn recv_packet(&mut self) -> Result<Option<InputPacket>, ProtocolError> {
        loop {
            let Some(body) = read_raw_frame(&mut self.reader).await? else {
                return Ok(None);
            };

            let msg = match self.codec.decode(&body) {
                Ok(msg) => msg,
                Err(e) if e.is_frame_local() => {
                    warn!(error = %e, "dropping bad frame");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match msg {
                WireMessage::Packet(packet) => {
                    let expected = self.last_sequence.wrapping_add(1);
                    if self.last_sequence != 0 && packet.sequence != expected {
                        self.gap_count += 1;
                        warn!(
                            expected,
                            received = packet.sequence,
                            "sequence gap on receive stream"
                        );
                    }
                    self.last_sequence = packet.sequence;
                    return Ok(Some(packet));
                }
                other => {
                    warn!(?other, "unexpected handshake message after session start");
                }
            }
        }
    }

    /// Number of sequence gaps observed so far.
    #[must_use]
    pub fn gap_count(&self) -> u64 {
        self.gap_count
    }
}
