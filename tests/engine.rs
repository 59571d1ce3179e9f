//! Engine tests over loopback TCP and in-memory duplex streams.

mod harness;

use std::sync::Arc;
use std::time::Duration;

use harness::{Record, Recorder, TestClient, TestServer, request_for};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wsengine::{
    CloseCode, Config, Connection, ConnectionState, Draft, Error, Event, Message, OpCode,
    Timeouts, WebSocketClient,
};

// ============================================================================
// Messaging
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_echo_text_and_binary() {
    let server = TestServer::spawn().await;
    let client = TestClient::connect(server.addr).await;

    assert_eq!(client.round_trip("hello", 1).await, "hello");
    client.ws().send_binary(vec![1u8, 2, 3]).unwrap();
    client.handler.wait_messages(2).await;
    assert_eq!(client.handler.messages()[1], Message::binary(vec![1, 2, 3]));

    client.close().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fragmented_message_arrives_whole() {
    let server = TestServer::spawn().await;
    let config = Config::default().with_fragment_size(8);
    let client = TestClient::connect_with(server.addr, &Draft::rfc6455(), config).await;

    let text = "fragment me ".repeat(20);
    assert_eq!(client.round_trip(&text, 1).await, text);
    assert_eq!(server.handler.messages(), vec![Message::text(text)]);

    client.close().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_streamed_fragments() {
    let server = TestServer::spawn().await;
    let client = TestClient::connect(server.addr).await;

    let ws = client.ws();
    ws.send_fragment(OpCode::Text, "one ", false).unwrap();
    ws.send_fragment(OpCode::Text, "two ", false).unwrap();
    ws.send_fragment(OpCode::Text, "three", true).unwrap();
    client.handler.wait_messages(1).await;
    assert_eq!(client.handler.messages(), vec![Message::text("one two three")]);

    client.close().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ping_gets_pong() {
    let server = TestServer::spawn().await;
    let client = TestClient::connect(server.addr).await;

    client.ws().send_ping(&b"are you there"[..]).unwrap();
    client
        .handler
        .wait_for("pong", |r| r.contains(&Record::Pong))
        .await;

    client.close().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_broadcast_reaches_every_open_connection() {
    let server = TestServer::spawn_with(Recorder::new(), Config::default(), Draft::all()).await;
    let first = TestClient::connect(server.addr).await;
    let second = TestClient::connect(server.addr).await;
    server.handler.wait_for("two opens", |r| {
        r.iter().filter(|r| **r == Record::Open).count() == 2
    })
    .await;

    assert_eq!(server.server.broadcast(&Message::text("all")), 2);
    first.handler.wait_messages(1).await;
    second.handler.wait_messages(1).await;
    assert_eq!(first.handler.messages(), vec![Message::text("all")]);

    first.close().await;
    second.close().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hixie75_client_against_server() {
    let server = TestServer::spawn().await;
    let client = TestClient::connect_with(server.addr, &Draft::hixie75(), Config::default()).await;

    assert_eq!(client.round_trip("legacy", 1).await, "legacy");
    assert!(matches!(
        client.ws().send_binary(vec![0u8]),
        Err(Error::Unsupported { .. })
    ));
    server.shutdown().await;
}

#[cfg(feature = "compression")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deflate_negotiated_end_to_end() {
    use wsengine::draft::Rfc6455Draft;
    use wsengine::extensions::deflate::{DeflateConfig, DeflateExtension};

    let draft: Draft = Rfc6455Draft::new()
        .with_extension(DeflateExtension::new(DeflateConfig::default()))
        .into();
    let server = TestServer::spawn_with(Recorder::echo(), Config::default(), vec![draft.copy_instance()]).await;
    let client = TestClient::connect_with(server.addr, &draft, Config::default()).await;

    let text = "squeeze ".repeat(200);
    assert_eq!(client.round_trip(&text, 1).await, text);
    assert_eq!(client.round_trip("short", 2).await, "short");

    client.close().await;
    server.shutdown().await;
}

// ============================================================================
// Closing
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_close_handshake() {
    let server = TestServer::spawn().await;
    let client = TestClient::connect(server.addr).await;

    client.close().await;
    assert_eq!(client.ws().ready_state(), ConnectionState::Closed);
    assert!(client
        .handler
        .records()
        .contains(&Record::Close(CloseCode::Normal, true)));

    server.handler.wait_close().await;
    assert_eq!(server.handler.close_code(), Some(CloseCode::Normal));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_reported_after_slow_messages() {
    let server =
        TestServer::spawn_with(Recorder::slow(Duration::from_millis(50)), Config::default(), Draft::all())
            .await;
    let client = TestClient::connect(server.addr).await;

    client.ws().send_text("a").unwrap();
    client.ws().send_text("b").unwrap();
    client.close().await;

    server.handler.wait_close().await;
    let tail: Vec<Record> = server
        .handler
        .records()
        .into_iter()
        .filter(|r| matches!(r, Record::Message(_) | Record::Close(..)))
        .collect();
    assert_eq!(tail.len(), 3, "{tail:?}");
    assert_eq!(tail[0], Record::Message(Message::text("a")));
    assert_eq!(tail[1], Record::Message(Message::text("b")));
    assert!(matches!(tail[2], Record::Close(CloseCode::Normal, _)), "{tail:?}");
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_closes_with_going_away() {
    let server = TestServer::spawn().await;
    let client = TestClient::connect(server.addr).await;

    server.shutdown().await;
    client.client.closed().await;
    assert!(client
        .handler
        .records()
        .contains(&Record::Close(CloseCode::GoingAway, true)));

    server.handler.wait_close().await;
    assert!(server
        .handler
        .records()
        .contains(&Record::Close(CloseCode::GoingAway, false)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bad_handshake_gets_404() {
    let server = TestServer::spawn().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8(response).unwrap();
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    server.handler.wait_close().await;
    assert_eq!(server.handler.close_code(), Some(CloseCode::ProtocolError));
    assert!(!server.handler.records().contains(&Record::Open));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handshake_timeout() {
    let config = Config::default().with_timeouts(Timeouts::new(Duration::from_millis(100), None));
    let server = TestServer::spawn_with(Recorder::new(), config, Draft::all()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    server.handler.wait_close().await;
    assert_eq!(server.handler.close_code(), Some(CloseCode::ProtocolError));
    assert!(!server.handler.records().contains(&Record::Open));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_silent_peer_dropped_as_lost() {
    let config = Config::default().with_connection_lost_timeout(Some(Duration::from_millis(50)));
    let server = TestServer::spawn_with(Recorder::new(), config, Draft::all()).await;

    // Complete a handshake by hand and then never answer pings.
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let mut client = Connection::client(Config::default(), &Draft::rfc6455());
    client.start_handshake(request_for(server.addr)).unwrap();
    for chunk in client.next_batch(usize::MAX) {
        stream.write_all(&chunk).await.unwrap();
    }

    server.handler.wait_close().await;
    assert_eq!(server.handler.close_code(), Some(CloseCode::Abnormal));
    assert!(server.handler.records().contains(&Record::Open));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_consumer_closed_abnormally() {
    let config = Config::default().with_max_outbound_queue(1024);
    let server = TestServer::spawn_with(Recorder::new(), config, Draft::all()).await;
    let client = TestClient::connect(server.addr).await;
    server.handler.wait_open().await;

    let conn = server.server.connections().pop().unwrap();
    let err = conn.send_binary(vec![0u8; 4096]).unwrap_err();
    assert!(matches!(err, Error::OutboundQueueFull { .. }));

    server.handler.wait_close().await;
    assert_eq!(server.handler.close_code(), Some(CloseCode::Abnormal));
    assert!(server
        .handler
        .records()
        .iter()
        .any(|r| matches!(r, Record::Error(_))));

    client.client.closed().await;
    server.shutdown().await;
}

// ============================================================================
// In-memory transport
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_over_duplex_against_sans_io_server() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
    let handler = Recorder::new();
    let addr = "127.0.0.1:80".parse().unwrap();
    let client = WebSocketClient::with_stream(
        client_io,
        &Draft::rfc6455(),
        request_for(addr),
        Arc::clone(&handler),
        Config::default(),
    )
    .unwrap();

    let mut server = Connection::server(Config::default(), &Draft::all());
    let mut buf = vec![0u8; 4096];
    while !server.is_open() {
        let n = server_io.read(&mut buf).await.unwrap();
        assert!(n > 0, "client hung up during handshake");
        server.decode(&buf[..n]);
    }
    server.send_text("from sans-io").unwrap();
    for chunk in server.next_batch(usize::MAX) {
        server_io.write_all(&chunk).await.unwrap();
    }

    handler.wait_messages(1).await;
    assert_eq!(handler.messages(), vec![Message::text("from sans-io")]);

    client.websocket().send_text("back").unwrap();
    let n = server_io.read(&mut buf).await.unwrap();
    server.decode(&buf[..n]);
    let events = server.take_events();
    assert!(events.contains(&Event::Message(Message::text("back"))));

    drop(server_io);
    client.closed().await;
    assert_eq!(handler.close_code(), Some(CloseCode::Abnormal));
}
