//! Handler that records every callback.

use std::time::Duration;

use parking_lot::Mutex;
use std::sync::Arc;
use wsengine::{ClientHandshake, CloseCode, Error, Message, ServerHandshake, WebSocket, WebSocketHandler};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Open,
    Message(Message),
    Pong,
    Closing(CloseCode, bool),
    Close(CloseCode, bool),
    Error(String),
}

#[derive(Debug, Default)]
pub struct Recorder {
    records: Mutex<Vec<Record>>,
    echo: bool,
    delay: Option<Duration>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A recorder that sends every message straight back.
    pub fn echo() -> Arc<Self> {
        Arc::new(Self {
            echo: true,
            ..Self::default()
        })
    }

    /// A recorder that takes `delay` to handle each message.
    #[allow(dead_code)]
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    fn push(&self, record: Record) {
        self.records.lock().push(record);
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Record::Message(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn close_code(&self) -> Option<CloseCode> {
        self.records().into_iter().find_map(|r| match r {
            Record::Close(code, _) => Some(code),
            _ => None,
        })
    }

    /// Poll until `done` holds, panicking after a few seconds.
    pub async fn wait_for(&self, what: &str, done: impl Fn(&[Record]) -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            if done(&self.records.lock()) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {what}; saw {:?}",
                self.records()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn wait_open(&self) {
        self.wait_for("open", |r| r.contains(&Record::Open)).await;
    }

    pub async fn wait_messages(&self, count: usize) {
        self.wait_for("messages", |r| {
            r.iter().filter(|r| matches!(r, Record::Message(_))).count() >= count
        })
        .await;
    }

    pub async fn wait_close(&self) {
        self.wait_for("close", |r| r.iter().any(|r| matches!(r, Record::Close(..))))
            .await;
    }
}

impl WebSocketHandler for Recorder {
    fn on_open(&self, _ws: &WebSocket, _request: &ClientHandshake, _response: &ServerHandshake) {
        self.push(Record::Open);
    }

    fn on_message(&self, ws: &WebSocket, message: Message) {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.echo {
            let _ = ws.send(message.clone());
        }
        self.push(Record::Message(message));
    }

    fn on_close(&self, _ws: &WebSocket, code: CloseCode, _reason: &str, remote: bool) {
        self.push(Record::Close(code, remote));
    }

    fn on_error(&self, _ws: &WebSocket, error: &Error) {
        self.push(Record::Error(error.to_string()));
    }

    fn on_closing(&self, _ws: &WebSocket, code: CloseCode, _reason: &str, remote: bool) {
        self.push(Record::Closing(code, remote));
    }

    fn on_pong(&self, _ws: &WebSocket, _payload: &[u8]) {
        self.push(Record::Pong);
    }
}
