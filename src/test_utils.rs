//! Test utilities shared by unit tests, integration tests and benchmarks
//!
//! Small frame geometry keeps pooled buffers cheap, and the short backoff keeps
//! retry-heavy scenarios fast.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

use crate::config::RouterConfig;
use crate::router::FrameQueue;

/// Raw capacity of buffers built from [`small_config`].
pub const SMALL_RAW_CAPACITY: usize = 16;

/// Install a fmt subscriber honoring `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// A shared frame queue with the given capacity.
pub fn queue(capacity: usize) -> Arc<FrameQueue> {
    Arc::new(FrameQueue::new(capacity))
}

/// 4x2 frames (16 raw bytes), pool of 4, 1 ms retry backoff.
pub fn small_config() -> RouterConfig {
    RouterConfig {
        width: 4,
        height: 2,
        dev_type: 5,
        zd_table: vec![0, 1, 2, 3],
        transient_backoff_ms: 1,
        ..RouterConfig::default()
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Sequence numbers currently queued, without blocking. Buffers are moved to `pool`.
pub fn drain_sequences(queue: &FrameQueue, pool: &FrameQueue) -> Vec<u32> {
    let mut sequences = Vec::new();
    while let Ok(Some(frame)) = queue.try_receive() {
        sequences.push(frame.sequence);
        let _ = pool.send(frame);
    }
    sequences
}
