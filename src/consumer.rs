//! Blocking consumer for one delivery queue
//!
//! A [`FrameConsumer`] keeps a private staging buffer with the same layout as
//! the pooled buffers. Each received frame's payload is swapped into the staging
//! buffer in O(1) and the pool buffer goes straight back to the shared free
//! pool, so a slow callback holds no pool buffer while it runs.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::Result;
use crate::channel::ChannelError;
use crate::router::FrameQueue;
use crate::types::{FrameBuffer, FrameLayout, SessionParams, StreamKind};

/// Drains one delivery queue and recycles buffers into the shared pool.
pub struct FrameConsumer {
    kind: StreamKind,
    queue: Arc<FrameQueue>,
    pool: Arc<FrameQueue>,
    staging: FrameBuffer,
    received: u64,
}

impl FrameConsumer {
    /// Create a consumer whose staging buffer matches the pooled `layout`.
    pub fn new(
        kind: StreamKind,
        queue: Arc<FrameQueue>,
        pool: Arc<FrameQueue>,
        layout: &FrameLayout,
        session: &SessionParams,
    ) -> Result<Self> {
        let mut staging = FrameBuffer::from_layout(layout)?;
        staging.apply_session(session);
        Ok(Self { kind, queue, pool, staging, received: 0 })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Frames received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Block for the next frame.
    ///
    /// Returns [`ChannelError::Stopped`] once the queue is stopped and drained.
    pub fn next_frame(&mut self) -> Result<&FrameBuffer, ChannelError> {
        let frame = self.queue.receive()?;
        Ok(self.stage(frame))
    }

    /// Like [`next_frame`](Self::next_frame), giving up after `timeout`.
    pub fn next_frame_timeout(&mut self, timeout: Duration) -> Result<&FrameBuffer, ChannelError> {
        let frame = self.queue.receive_timeout(timeout)?;
        Ok(self.stage(frame))
    }

    fn stage(&mut self, mut frame: FrameBuffer) -> &FrameBuffer {
        self.staging.swap_buffers_only(&mut frame);
        self.staging.copy_metadata(&frame);
        self.received += 1;
        trace!("{} consumer staged frame sn={}", self.kind, self.staging.sequence);

        if self.pool.send(frame).is_err() {
            debug!("Free pool stopped, {} consumer releasing buffer", self.kind);
        }
        &self.staging
    }

    /// Call `on_frame` for every frame until the queue stops. Returns the frame count.
    pub fn run<F>(mut self, mut on_frame: F) -> u64
    where
        F: FnMut(&FrameBuffer),
    {
        while let Ok(frame) = self.next_frame() {
            on_frame(frame);
        }
        debug!("{} consumer finished after {} frames", self.kind, self.received);
        self.received
    }
}

impl std::fmt::Debug for FrameConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameConsumer")
            .field("kind", &self.kind)
            .field("received", &self.received)
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameFormat;

    fn layout() -> FrameLayout {
        FrameLayout { raw_capacity: 64, depth_capacity: 16, rgb_capacity: 8, ..FrameLayout::default() }
    }

    fn session() -> SessionParams {
        SessionParams { width: 4, height: 4, dev_type: 5, zd_table: Arc::from(vec![0u8, 1]) }
    }

    fn filled_frame(sequence: u32) -> FrameBuffer {
        let mut frame = FrameBuffer::from_layout(&layout()).unwrap();
        frame.raw_buffer_mut().fill(sequence as u8);
        assert!(frame.set_raw_len(32));
        frame.sequence = sequence;
        frame.format = FrameFormat::Depth(0x1A);
        frame
    }

    #[test]
    fn staged_frame_carries_payload_and_buffer_is_recycled() {
        let queue = Arc::new(FrameQueue::new(2));
        let pool = Arc::new(FrameQueue::new(2));
        let mut consumer =
            FrameConsumer::new(StreamKind::Depth, Arc::clone(&queue), Arc::clone(&pool), &layout(), &session())
                .unwrap();

        queue.send(filled_frame(6)).unwrap();
        let staged = consumer.next_frame().unwrap();
        assert_eq!(staged.sequence, 6);
        assert_eq!(staged.raw().len(), 32);
        assert!(staged.raw().iter().all(|&b| b == 6));
        assert_eq!(staged.dev_type, 5);

        let recycled = pool.try_receive().unwrap().unwrap();
        assert_eq!(recycled.layout(), (64, 16, 8));
        assert_eq!(consumer.received(), 1);
    }

    #[test]
    fn run_drains_until_stopped() {
        let queue = Arc::new(FrameQueue::new(4));
        let pool = Arc::new(FrameQueue::new(4));
        for sn in [2, 4, 6] {
            queue.send(filled_frame(sn)).unwrap();
        }
        queue.request_stop();

        let consumer =
            FrameConsumer::new(StreamKind::Depth, Arc::clone(&queue), Arc::clone(&pool), &layout(), &session())
                .unwrap();
        let mut seen = Vec::new();
        let count = consumer.run(|frame| seen.push(frame.sequence));

        assert_eq!(count, 3);
        assert_eq!(seen, vec![2, 4, 6]);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn timeout_without_frames() {
        let queue = Arc::new(FrameQueue::new(1));
        let pool = Arc::new(FrameQueue::new(1));
        let mut consumer =
            FrameConsumer::new(StreamKind::Color, queue, pool, &layout(), &session()).unwrap();
        assert_eq!(
            consumer.next_frame_timeout(Duration::from_millis(10)).unwrap_err(),
            ChannelError::Timeout
        );
    }
}
