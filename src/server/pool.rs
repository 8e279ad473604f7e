//! Reusable copy buffers shared across concurrent transfers.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Pool of fixed-size byte buffers for socket-to-disk copies.
///
/// Buffers are borrowed for the duration of one copy loop and returned when
/// the guard drops, so the pool cannot leak on error paths. When the pool is
/// empty a fresh buffer is allocated; returns beyond capacity are discarded.
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    capacity: usize,
}

impl BufferPool {
    /// Create a pool holding `capacity` buffers of `buffer_size` bytes each.
    pub fn new(capacity: usize, buffer_size: usize) -> Arc<Self> {
        let buffers = (0..capacity).map(|_| vec![0u8; buffer_size]).collect();
        Arc::new(Self {
            buffers: Mutex::new(buffers),
            buffer_size,
            capacity,
        })
    }

    /// Borrow a buffer from the pool, allocating if none are available.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buffer = self
            .buffers
            .lock()
            .ok()
            .and_then(|mut pool| pool.pop())
            .unwrap_or_else(|| vec![0u8; self.buffer_size]);
        PooledBuffer {
            buffer: Some(buffer),
            pool: Arc::clone(self),
        }
    }

    fn restore(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        buffer.resize(self.buffer_size, 0);
        if let Ok(mut pool) = self.buffers.lock() {
            if pool.len() < self.capacity {
                pool.push(buffer);
            }
        }
    }
}

/// A buffer checked out of a [`BufferPool`], returned on drop.
pub struct PooledBuffer {
    buffer: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.restore(buffer);
        }
    }
}
