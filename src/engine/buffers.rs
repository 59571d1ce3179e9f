//! Bounded pool of read buffers.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

#[derive(Debug)]
struct Pool {
    free: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
}

/// A fixed number of read buffers shared by every connection of a server.
///
/// A connection takes a buffer only once its socket is readable and gives it
/// back when the decode worker is done with it, so the pool size bounds the
/// number of reads in flight.
#[derive(Debug, Clone)]
pub(crate) struct BufferPool {
    permits: Arc<Semaphore>,
    pool: Arc<Pool>,
}

impl BufferPool {
    pub(crate) fn new(count: usize, buffer_size: usize) -> Self {
        let count = count.max(1);
        let free = (0..count)
            .map(|_| BytesMut::with_capacity(buffer_size))
            .collect();
        Self {
            permits: Arc::new(Semaphore::new(count)),
            pool: Arc::new(Pool {
                free: Mutex::new(free),
                buffer_size,
            }),
        }
    }

    /// Wait for a free buffer.
    pub(crate) async fn acquire(&self) -> Result<PooledBuffer> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("buffer pool closed".into()))?;
        let buf = self
            .pool
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.pool.buffer_size));
        Ok(PooledBuffer {
            buf,
            pool: Arc::clone(&self.pool),
            _permit: permit,
        })
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A buffer on loan from a [`BufferPool`]; returned on drop.
#[derive(Debug)]
pub(crate) struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<Pool>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        if buf.capacity() < self.pool.buffer_size {
            buf.reserve(self.pool.buffer_size);
        }
        self.pool.free.lock().push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffers_return_on_drop() {
        let pool = BufferPool::new(2, 64);
        let mut a = pool.acquire().await.unwrap();
        a.extend_from_slice(b"data");
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        drop(a);
        assert_eq!(pool.available(), 1);
        let c = pool.acquire().await.unwrap();
        assert!(c.is_empty());
        assert!(c.capacity() >= 64);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let pool = BufferPool::new(1, 16);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|b| b.capacity()) })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(waiter.await.unwrap().unwrap() >= 16);
    }
}
