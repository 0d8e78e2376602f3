//! Helpers shared by the integration tests
//!
//! Integration tests link the library built without `cfg(test)`, so
//! `ilm_router::test_utils` is only visible with `--features benchmark`. These
//! are the few helpers the scenarios need; keep them in step with `test_utils`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use ilm_router::{FrameQueue, RouterConfig};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn queue(capacity: usize) -> Arc<FrameQueue> {
    Arc::new(FrameQueue::new(capacity))
}

/// 4x2 frames (16 raw bytes), pool of 4, 1 ms retry backoff.
pub fn config() -> RouterConfig {
    RouterConfig { width: 4, height: 2, transient_backoff_ms: 1, ..RouterConfig::default() }
}

pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

/// Sequence numbers currently queued; drained buffers go back to `pool`.
pub fn drain(queue: &FrameQueue, pool: &FrameQueue) -> Vec<u32> {
    let mut sequences = Vec::new();
    while let Ok(Some(frame)) = queue.try_receive() {
        sequences.push(frame.sequence);
        let _ = pool.send(frame);
    }
    sequences
}
