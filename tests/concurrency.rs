//! Concurrency tests for the server engine.
//!
//! Tests message ordering, close handshakes and broadcast under concurrent
//! load across several decode workers.

mod harness;

use harness::{Recorder, TestClient, TestServer};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use wsengine::{CloseCode, Config, Draft, Message};

fn worker_config() -> Config {
    Config::default().with_worker_count(3)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiple_clients_sequential() {
    let server = TestServer::spawn().await;

    for i in 0..10 {
        let client = TestClient::connect(server.addr).await;
        let msg = format!("hello from client {i}");
        assert_eq!(client.round_trip(&msg, 1).await, msg);
        client.close().await;
    }

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_barrier_synchronized_connect() {
    const NUM_CLIENTS: usize = 50;

    let server = TestServer::spawn_with(Recorder::echo(), worker_config(), Draft::all()).await;
    let addr = server.addr;
    let barrier = Arc::new(Barrier::new(NUM_CLIENTS));
    let success_count = Arc::new(AtomicUsize::new(0));

    let mut set = JoinSet::new();
    for i in 0..NUM_CLIENTS {
        let barrier = barrier.clone();
        let success = success_count.clone();
        set.spawn(async move {
            barrier.wait().await;
            let client = TestClient::connect(addr).await;
            let msg = format!("sync test {i}");
            assert_eq!(client.round_trip(&msg, 1).await, msg);
            client.close().await;
            success.fetch_add(1, Ordering::Relaxed);
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    assert_eq!(success_count.load(Ordering::Relaxed), NUM_CLIENTS);
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pipelined_message_ordering() {
    const NUM_CLIENTS: usize = 20;
    const MESSAGES_PER_CLIENT: usize = 50;

    let server = TestServer::spawn_with(Recorder::echo(), worker_config(), Draft::all()).await;
    let addr = server.addr;

    let mut set = JoinSet::new();
    for client_id in 0..NUM_CLIENTS {
        set.spawn(async move {
            let client = TestClient::connect(addr).await;
            let sent: Vec<Message> = (0..MESSAGES_PER_CLIENT)
                .map(|seq| Message::text(format!("client:{client_id}:msg:{seq}")))
                .collect();
            // Queue everything before reading a single echo.
            for msg in &sent {
                client.ws().send(msg.clone()).unwrap();
            }
            client.handler.wait_messages(MESSAGES_PER_CLIENT).await;
            assert_eq!(client.handler.messages(), sent);
            client.close().await;
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_drafts_concurrently() {
    let server = TestServer::spawn_with(Recorder::echo(), worker_config(), Draft::all()).await;
    let addr = server.addr;

    let mut set = JoinSet::new();
    let kinds: [fn() -> Draft; 4] = [Draft::rfc6455, Draft::draft17, Draft::draft10, Draft::hixie75];
    for i in 0..16 {
        let make = kinds[i % kinds.len()];
        set.spawn(async move {
            let draft = make();
            let client = TestClient::connect_with(addr, &draft, Config::default()).await;
            let msg = format!("{} #{i}", draft.name());
            assert_eq!(client.round_trip(&msg, 1).await, msg);
            client.close().await;
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_handshake_under_load() {
    const NUM_CLIENTS: usize = 50;

    let server = TestServer::spawn_with(Recorder::echo(), worker_config(), Draft::all()).await;
    let addr = server.addr;

    let mut set = JoinSet::new();
    for _ in 0..NUM_CLIENTS {
        set.spawn(async move {
            let client = TestClient::connect(addr).await;
            client.round_trip("test", 1).await;
            client.close().await;
            client.handler.close_code()
        });
    }

    let mut normal = 0;
    while let Some(result) = set.join_next().await {
        if result.unwrap() == Some(CloseCode::Normal) {
            normal += 1;
        }
    }
    assert_eq!(normal, NUM_CLIENTS);

    server
        .handler
        .wait_for("every server-side close", |records| {
            records
                .iter()
                .filter(|r| matches!(r, harness::Record::Close(CloseCode::Normal, _)))
                .count()
                == NUM_CLIENTS
        })
        .await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_broadcast_under_load() {
    const NUM_CLIENTS: usize = 25;
    const ROUNDS: usize = 10;

    let server = TestServer::spawn_with(Recorder::new(), worker_config(), Draft::all()).await;
    let mut clients = Vec::new();
    for _ in 0..NUM_CLIENTS {
        clients.push(TestClient::connect(server.addr).await);
    }
    server
        .handler
        .wait_for("every open", |records| {
            records
                .iter()
                .filter(|r| **r == harness::Record::Open)
                .count()
                == NUM_CLIENTS
        })
        .await;

    for round in 0..ROUNDS {
        let reached = server.server.broadcast(&Message::text(format!("round {round}")));
        assert_eq!(reached, NUM_CLIENTS);
    }
    for client in &clients {
        client.handler.wait_messages(ROUNDS).await;
        let expected: Vec<Message> = (0..ROUNDS)
            .map(|round| Message::text(format!("round {round}")))
            .collect();
        assert_eq!(client.handler.messages(), expected);
    }

    server.shutdown().await;
    for client in &clients {
        client.client.closed().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_barrier_synchronized_connect_500() {
    const NUM_CLIENTS: usize = 500;

    let server = TestServer::spawn().await;
    let addr = server.addr;
    let barrier = Arc::new(Barrier::new(NUM_CLIENTS));

    let mut set = JoinSet::new();
    for i in 0..NUM_CLIENTS {
        let barrier = barrier.clone();
        set.spawn(async move {
            barrier.wait().await;
            let client = TestClient::connect(addr).await;
            let msg = format!("client {i}");
            assert_eq!(client.round_trip(&msg, 1).await, msg);
            client.close().await;
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    assert!(server.server.connections().len() <= NUM_CLIENTS);
    server.shutdown().await;
}
