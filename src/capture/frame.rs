use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use crate::pipeline::PooledBuffer;

/// A published preview frame.
///
/// The payload is read-only once the frame exists; readers share it through an `Arc`
/// and the backing buffer returns to its pool when the last reader lets go.
pub struct Frame {
    data: PooledBuffer,

    /// Capture timestamp for latency tracking
    timestamp: Instant,

    /// Wall-clock capture time
    captured_at: SystemTime,

    /// Increases by one for every frame published in a session
    sequence: u64,
}

impl Frame {
    pub fn new(data: PooledBuffer, sequence: u64) -> Self {
        Self {
            data,
            timestamp: Instant::now(),
            captured_at: SystemTime::now(),
            sequence,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("len", &self.data.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
