//! Async stream adapter over a delivery queue
//!
//! Delivery queues block, which is the right discipline for the reader thread
//! but not for async consumers. [`FrameStream`] moves the blocking `receive` onto
//! Tokio's blocking pool and exposes the frames as a `futures::Stream`.
//!
//! Frames yielded by the stream are owned by the caller, who must hand them back
//! through [`FrameStream::recycle`] (or the router's shared free pool) to keep
//! the pool populated.
//!
//! The pump polls its queue, so it notices a dropped stream within a short
//! interval even when no frames arrive, and never holds up runtime shutdown.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::channel::ChannelError;
use crate::router::FrameQueue;
use crate::types::FrameBuffer;

/// How often an idle pump checks whether its stream was dropped.
const PUMP_POLL_INTERVAL: Duration = Duration::from_millis(20);

pin_project! {
    /// Frames from one delivery queue as an async stream.
    ///
    /// Ends when the queue is stopped and drained. Dropping the stream returns
    /// any frame already pulled off the queue to the free pool.
    pub struct FrameStream {
        #[pin]
        inner: ReceiverStream<FrameBuffer>,
        pool: Arc<FrameQueue>,
    }

    impl PinnedDrop for FrameStream {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            let receiver = AsMut::<mpsc::Receiver<FrameBuffer>>::as_mut(this.inner.get_mut());
            receiver.close();
            while let Ok(frame) = receiver.try_recv() {
                let _ = this.pool.send(frame);
            }
        }
    }
}

impl FrameStream {
    /// Stream frames from `queue`, recycling stranded buffers into `pool`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(queue: Arc<FrameQueue>, pool: Arc<FrameQueue>) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let pump_pool = Arc::clone(&pool);

        tokio::task::spawn_blocking(move || {
            loop {
                match queue.receive_timeout(PUMP_POLL_INTERVAL) {
                    Ok(frame) => {
                        if let Err(mpsc::error::SendError(frame)) = tx.blocking_send(frame) {
                            debug!("Frame stream dropped, returning buffer sn={} to pool", frame.sequence);
                            let _ = pump_pool.send(frame);
                            return;
                        }
                    }
                    Err(ChannelError::Timeout) if tx.is_closed() => {
                        debug!("Frame stream dropped, pump exiting");
                        return;
                    }
                    Err(ChannelError::Timeout) => {}
                    Err(ChannelError::Stopped) => {
                        debug!("Delivery queue stopped, frame stream ending");
                        return;
                    }
                }
            }
        });

        Self { inner: ReceiverStream::new(rx), pool }
    }

    /// Return a consumed frame to the shared free pool.
    pub fn recycle(&self, frame: FrameBuffer) {
        if self.pool.send(frame).is_err() {
            debug!("Free pool stopped, releasing buffer");
        }
    }
}

impl Stream for FrameStream {
    type Item = FrameBuffer;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}
