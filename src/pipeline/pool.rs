//! Lock-free free list of reusable frame buffers

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;
use serde::Serialize;

/// Bounded pool of byte buffers recycled between preview frames
pub struct FramePool {
    /// Idle buffers waiting to be refilled
    free: ArrayQueue<Vec<u8>>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    allocated: AtomicUsize,
    reused: AtomicUsize,
    discarded: AtomicUsize,
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub allocated: usize,
    pub reused: usize,
    pub discarded: usize,
    pub idle: usize,
}

impl FramePool {
    /// `capacity` bounds how many idle buffers are kept; extras are freed on release.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: ArrayQueue::new(capacity.max(1)),
            stats: CachePadded::new(Stats::default()),
        })
    }

    /// Take an idle buffer, or allocate a fresh one if none is free.
    ///
    /// The returned buffer goes back to this pool when dropped.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buf = match self.free.pop() {
            Some(buf) => {
                self.stats.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.stats.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::new()
            }
        };

        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    fn release(&self, buf: Vec<u8>) {
        if self.free.push(buf).is_err() {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.stats.allocated.load(Ordering::Relaxed),
            reused: self.stats.reused.load(Ordering::Relaxed),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
            idle: self.free.len(),
        }
    }
}

/// A buffer on loan from a [`FramePool`]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<FramePool>,
}

impl PooledBuffer {
    /// Overwrite the whole buffer with `src`, growing it only when undersized.
    pub fn fill_from(&mut self, src: &[u8]) {
        self.buf.clear();
        self.buf.extend_from_slice(src);
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}
