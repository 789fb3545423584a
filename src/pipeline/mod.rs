pub mod pool;

pub use pool::{FramePool, PoolStats, PooledBuffer};
