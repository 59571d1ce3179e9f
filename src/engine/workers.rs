//! Decode workers.
//!
//! Each connection is pinned to one worker for its whole life, so its bytes
//! are decoded in arrival order. Workers are plain threads fed through
//! bounded channels; the accept and read tasks never decode.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::engine::WebSocket;
use crate::engine::buffers::PooledBuffer;
use crate::error::{Error, Result};

/// Jobs a read task hands to its worker.
pub(crate) enum Job {
    Data(WebSocket, PooledBuffer),
    Error(WebSocket, Error),
    Eot(WebSocket),
}

impl Job {
    fn run(self) {
        match self {
            Job::Data(ws, buf) => ws.feed(&buf),
            Job::Error(ws, err) => ws.transport_error(err),
            Job::Eot(ws) => ws.eot(),
        }
    }
}

/// Fixed set of decode threads with round-robin assignment.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    senders: Vec<mpsc::Sender<Job>>,
    next: AtomicUsize,
}

impl WorkerPool {
    /// Spawn `count` workers, each with a queue of `depth` jobs.
    pub(crate) fn new(count: usize, depth: usize) -> Result<Self> {
        let count = count.max(1);
        let mut senders = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, rx) = mpsc::channel(depth.max(1));
            std::thread::Builder::new()
                .name(format!("ws-worker-{index}"))
                .spawn(move || run_worker(index, rx))?;
            senders.push(tx);
        }
        debug!(workers = count, "Decode workers started");
        Ok(Self {
            senders,
            next: AtomicUsize::new(0),
        })
    }

    /// Queue of the worker for the next new connection.
    pub(crate) fn assign(&self) -> mpsc::Sender<Job> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        self.senders[index].clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }
}

fn run_worker(index: usize, mut rx: mpsc::Receiver<Job>) {
    while let Some(job) = rx.blocking_recv() {
        if catch_unwind(AssertUnwindSafe(|| job.run())).is_err() {
            error!(worker = index, "Handler panicked while processing a job");
        }
    }
    debug!(worker = index, "Decode worker stopped");
}
