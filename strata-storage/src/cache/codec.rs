//! JSON payload codec with a pooled encode buffer.

use serde::{de::DeserializeOwned, Serialize};
use std::ops::Deref;
use std::sync::Mutex;
use strata_core::{CacheError, StrataResult};

/// Buffers larger than this are dropped instead of pooled.
const MAX_POOLED_CAPACITY: usize = 64 * 1024;

/// Default number of idle buffers kept.
const DEFAULT_MAX_IDLE: usize = 32;

/// Lazily grown pool of reusable byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE)
    }
}

impl BufferPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Borrow an empty buffer, allocating when the pool is empty.
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let buf = self
            .idle
            .lock()
            .ok()
            .and_then(|mut idle| idle.pop())
            .unwrap_or_default();
        PooledBuffer {
            buf: Some(buf),
            pool: self,
        }
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn put_back(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(buf);
            }
        }
    }
}

/// A buffer on loan from a [`BufferPool`]. Returned cleared on drop.
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    buf: Option<Vec<u8>>,
    pool: &'a BufferPool,
}

impl PooledBuffer<'_> {
    fn vec_mut(&mut self) -> &mut Vec<u8> {
        self.buf.get_or_insert_with(Vec::new)
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put_back(buf);
        }
    }
}

/// Encodes cache payloads as JSON.
#[derive(Debug, Default)]
pub struct PayloadCodec {
    pool: BufferPool,
}

impl PayloadCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(pool: BufferPool) -> Self {
        Self { pool }
    }

    /// Serialize into a pooled buffer.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> StrataResult<PooledBuffer<'_>> {
        let mut buf = self.pool.acquire();
        serde_json::to_writer(buf.vec_mut(), value).map_err(|e| CacheError::Serialize {
            reason: e.to_string(),
        })?;
        Ok(buf)
    }

    pub fn decode<T: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> StrataResult<T> {
        serde_json::from_slice(bytes).map_err(|e| {
            CacheError::Deserialize {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }
}
