//! Integration tests: framed TCP transport roundtrip on loopback.

use std::net::SocketAddr;

use mouseshare_protocol::{
    accept_handshake, initiate_handshake, Codec, Connection, ProtocolError, TcpTransport,
};
use mouseshare_types::{
    InputEvent, InputPacket, Modifiers, PeerId, ScreenSize, TimedEvent, WireMessage,
};

async fn bind_loopback() -> (TcpTransport, SocketAddr) {
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let transport = TcpTransport::bind(bind).await.unwrap();
    let addr = transport.local_addr().unwrap();
    (transport, addr)
}

fn key_event(timestamp_us: u64, code: u16) -> TimedEvent {
    TimedEvent::new(
        timestamp_us,
        InputEvent::KeyDown {
            code,
            chars: None,
            modifiers: Modifiers::NONE,
        },
    )
}

#[tokio::test]
async fn handshake_and_packet_flow_on_loopback() {
    let (transport, server_addr) = bind_loopback().await;
    let server_id = PeerId::new();

    let server = tokio::spawn(async move {
        let (stream, _) = transport.accept().await.unwrap();
        let mut conn = Connection::new(stream, Codec::plaintext());

        let peer = accept_handshake(&mut conn, server_id, "test-server", ScreenSize::new(2560, 1440))
            .await
            .unwrap();
        assert_eq!(peer.peer_name, "test-client");
        assert_eq!(peer.screen, ScreenSize::new(1920, 1080));

        let (_tx, mut rx) = conn.into_split();

        let packet = rx.recv_packet().await.unwrap().unwrap();
        assert_eq!(packet.sequence, 1);
        assert_eq!(packet.events.len(), 2);
        assert!(matches!(
            packet.events[0].event,
            InputEvent::KeyDown { code: 4, .. }
        ));

        let packet = rx.recv_packet().await.unwrap().unwrap();
        assert_eq!(packet.sequence, 2);

        // Clean close from the client ends the stream.
        assert!(rx.recv_packet().await.unwrap().is_none());
        assert_eq!(rx.gap_count(), 0);
    });

    let stream = TcpTransport::connect(server_addr).await.unwrap();
    let mut conn = Connection::new(stream, Codec::plaintext());

    let peer = initiate_handshake(
        &mut conn,
        PeerId::new(),
        "test-client",
        ScreenSize::new(1920, 1080),
        1_000,
    )
    .await
    .unwrap();
    assert_eq!(peer.peer_id, server_id);
    assert_eq!(peer.peer_name, "test-server");

    let (mut tx, _rx) = conn.into_split();
    let seq = tx
        .send_events(vec![key_event(10, 4), key_event(20, 5)])
        .await
        .unwrap();
    assert_eq!(seq, 1);
    let seq = tx.send_events(vec![key_event(30, 6)]).await.unwrap();
    assert_eq!(seq, 2);

    drop(tx);
    server.await.unwrap();
}

#[tokio::test]
async fn encrypted_session_roundtrip() {
    let (transport, server_addr) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (stream, _) = transport.accept().await.unwrap();
        let mut conn = Connection::new(stream, Codec::encrypted("correct horse"));

        accept_handshake(&mut conn, PeerId::new(), "server", ScreenSize::new(1920, 1080))
            .await
            .unwrap();

        let (_tx, mut rx) = conn.into_split();
        let packet = rx.recv_packet().await.unwrap().unwrap();
        assert!(matches!(
            packet.events[0].event,
            InputEvent::Scroll { .. }
        ));
    });

    let stream = TcpTransport::connect(server_addr).await.unwrap();
    let mut conn = Connection::new(stream, Codec::encrypted("correct horse"));

    initiate_handshake(
        &mut conn,
        PeerId::new(),
        "client",
        ScreenSize::new(1920, 1080),
        0,
    )
    .await
    .unwrap();

    let (mut tx, _rx) = conn.into_split();
    tx.send_events(vec![TimedEvent::new(
        1,
        InputEvent::Scroll { dx: 0.0, dy: -12.0 },
    )])
    .await
    .unwrap();

    server.await.unwrap();
}

#[tokio::test]
async fn encryption_mismatch_rejects_handshake() {
    let (transport, server_addr) = bind_loopback().await;

    // Server has encryption off; client seals with a password.
    let server = tokio::spawn(async move {
        let (stream, _) = transport.accept().await.unwrap();
        let mut conn = Connection::new(stream, Codec::plaintext());

        let err = accept_handshake(&mut conn, PeerId::new(), "server", ScreenSize::new(1920, 1080))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeRejected(ref m) if m == "encryption-mismatch"));
    });

    let stream = TcpTransport::connect(server_addr).await.unwrap();
    let mut conn = Connection::new(stream, Codec::encrypted("x"));

    let err = initiate_handshake(
        &mut conn,
        PeerId::new(),
        "client",
        ScreenSize::new(1920, 1080),
        0,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ProtocolError::HandshakeRejected(_)));

    server.await.unwrap();
}

#[tokio::test]
async fn mismatched_passwords_reject_handshake() {
    let (transport, server_addr) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (stream, _) = transport.accept().await.unwrap();
        let mut conn = Connection::new(stream, Codec::encrypted("password-b"));

        let err = accept_handshake(&mut conn, PeerId::new(), "server", ScreenSize::new(1920, 1080))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeRejected(_)));
    });

    let stream = TcpTransport::connect(server_addr).await.unwrap();
    let mut conn = Connection::new(stream, Codec::encrypted("password-a"));

    let err = initiate_handshake(
        &mut conn,
        PeerId::new(),
        "client",
        ScreenSize::new(1920, 1080),
        0,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ProtocolError::HandshakeRejected(_)));

    server.await.unwrap();
}

#[tokio::test]
async fn sequence_gap_is_delivered_and_counted() {
    let (transport, server_addr) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (stream, _) = transport.accept().await.unwrap();
        let conn = Connection::new(stream, Codec::plaintext());
        let (_tx, mut rx) = conn.into_split();

        let first = rx.recv_packet().await.unwrap().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(rx.gap_count(), 0);

        // The gap is logged but the packet still arrives.
        let second = rx.recv_packet().await.unwrap().unwrap();
        assert_eq!(second.sequence, 5);
        assert_eq!(rx.gap_count(), 1);
    });

    let stream = TcpTransport::connect(server_addr).await.unwrap();
    let mut conn = Connection::new(stream, Codec::plaintext());

    // Hand-built packets so we can skip sequence numbers.
    conn.send(&WireMessage::Packet(InputPacket::new(1, Vec::new())))
        .await
        .unwrap();
    conn.send(&WireMessage::Packet(InputPacket::new(5, Vec::new())))
        .await
        .unwrap();

    server.await.unwrap();
}

#[tokio::test]
async fn oversized_length_prefix_drops_connection() {
    let (transport, server_addr) = bind_loopback().await;

    let server = tokio::spawn(async move {
        let (stream, _) = transport.accept().await.unwrap();
        let conn = Connection::new(stream, Codec::plaintext());
        let (_tx, mut rx) = conn.into_split();

        let err = rx.recv_packet().await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    });

    use tokio::io::AsyncWriteExt;
    let mut stream = TcpTransport::connect(server_addr).await.unwrap();
    // 64 MiB advertised length, far over the 10 MiB cap.
    let len: u32 = 64 * 1024 * 1024;
    stream.write_all(&len.to_be_bytes()).await.unwrap();

    server.await.unwrap();
}
