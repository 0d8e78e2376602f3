//! Interleave session: router plus queues wired from one configuration
//!
//! [`InterleaveSession`] is the convenient way to run interleave mode. It sizes
//! both delivery queues from the [`RouterConfig`], starts the router, and hands
//! out exactly one consumer per stream.

use std::sync::Arc;

use tracing::{debug, info};

use crate::Result;
use crate::config::RouterConfig;
use crate::consumer::FrameConsumer;
use crate::router::{ExitReason, FrameQueue, FrameRouter, RouterState};
use crate::source::FrameSource;
use crate::stats::StatsSnapshot;
use crate::stream::FrameStream;
use crate::types::StreamKind;

/// A running interleave-mode router with its two delivery queues.
pub struct InterleaveSession<S: FrameSource> {
    router: FrameRouter<S>,
    color_queue: Arc<FrameQueue>,
    depth_queue: Arc<FrameQueue>,
    color_taken: bool,
    depth_taken: bool,
}

impl<S: FrameSource> InterleaveSession<S> {
    /// Validate `config`, create the queues and start routing frames from `source`.
    pub fn open(source: S, config: RouterConfig) -> Result<Self> {
        config.validate()?;

        let color_queue = Arc::new(FrameQueue::new(config.color_queue_capacity));
        let depth_queue = Arc::new(FrameQueue::new(config.depth_queue_capacity));

        let router =
            FrameRouter::new(source, Arc::clone(&color_queue), Arc::clone(&depth_queue), config)?;
        router.start()?;

        info!(
            color_capacity = color_queue.capacity(),
            depth_capacity = depth_queue.capacity(),
            "Interleave session opened"
        );

        Ok(Self { router, color_queue, depth_queue, color_taken: false, depth_taken: false })
    }

    /// Claim the stream's queue. Each stream has a single consumer.
    fn claim(&mut self, kind: StreamKind) -> Option<Arc<FrameQueue>> {
        let (taken, queue) = match kind {
            StreamKind::Color => (&mut self.color_taken, &self.color_queue),
            StreamKind::Depth => (&mut self.depth_taken, &self.depth_queue),
        };
        if *taken {
            debug!("{} consumer already handed out", kind);
            return None;
        }
        *taken = true;
        Some(Arc::clone(queue))
    }

    /// Blocking consumer for `kind`, or `None` if that stream was already claimed.
    pub fn consumer(&mut self, kind: StreamKind) -> Result<Option<FrameConsumer>> {
        let config = self.router.config();
        let (layout, params) = (config.layout(), config.session_params());

        let Some(queue) = self.claim(kind) else {
            return Ok(None);
        };
        let consumer = FrameConsumer::new(kind, queue, self.router.shared_free_queue(), &layout, &params);
        if consumer.is_err() {
            self.release(kind);
        }
        consumer.map(Some)
    }

    /// Async stream for `kind`, or `None` if that stream was already claimed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn stream(&mut self, kind: StreamKind) -> Option<FrameStream> {
        let queue = self.claim(kind)?;
        Some(FrameStream::new(queue, self.router.shared_free_queue()))
    }

    fn release(&mut self, kind: StreamKind) {
        match kind {
            StreamKind::Color => self.color_taken = false,
            StreamKind::Depth => self.depth_taken = false,
        }
    }

    pub fn router(&self) -> &FrameRouter<S> {
        &self.router
    }

    pub fn state(&self) -> RouterState {
        self.router.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.router.stats()
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.router.exit_reason()
    }

    /// Stop the router, then both delivery queues. Consumers drain what is
    /// already queued and then see the end of their stream.
    pub fn shutdown(&self) {
        self.router.stop();
        self.color_queue.request_stop();
        self.depth_queue.request_stop();
        debug!("Interleave session shut down ({})", self.router.stats());
    }
}

impl<S: FrameSource> Drop for InterleaveSession<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<S: FrameSource> std::fmt::Debug for InterleaveSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterleaveSession")
            .field("router", &self.router)
            .field("color_taken", &self.color_taken)
            .field("depth_taken", &self.depth_taken)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptStep, ScriptedSource};
    use crate::test_utils::small_config;

    #[test]
    fn consumers_are_handed_out_once() {
        let source = ScriptedSource::new(vec![]);
        let mut session = InterleaveSession::open(source, small_config()).unwrap();

        assert!(session.consumer(StreamKind::Color).unwrap().is_some());
        assert!(session.consumer(StreamKind::Color).unwrap().is_none());
        assert!(session.consumer(StreamKind::Depth).unwrap().is_some());
    }

    #[test]
    fn consumers_see_routed_frames_until_source_fails() {
        let mut steps = ScriptStep::frames(1..=6, 8);
        steps.push(ScriptStep::fatal("unplugged"));
        let mut session = InterleaveSession::open(ScriptedSource::new(steps), small_config()).unwrap();

        let color = session.consumer(StreamKind::Color).unwrap().unwrap();
        let depth = session.consumer(StreamKind::Depth).unwrap().unwrap();

        let color_thread = std::thread::spawn(move || {
            let mut seen = Vec::new();
            color.run(|frame| seen.push(frame.sequence));
            seen
        });
        let mut depth_seen = Vec::new();
        depth.run(|frame| depth_seen.push(frame.sequence));

        assert_eq!(color_thread.join().unwrap(), vec![1, 3, 5]);
        assert_eq!(depth_seen, vec![2, 4, 6]);
        assert!(matches!(session.exit_reason(), Some(ExitReason::Fatal(_))));
        assert_eq!(session.router().shared_free_queue().len(), session.router().config().pool_size);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let session = InterleaveSession::open(ScriptedSource::new(vec![]), small_config()).unwrap();
        session.shutdown();
        session.shutdown();
        assert_eq!(session.state(), RouterState::Stopped);
    }

    #[test]
    fn invalid_config_fails_to_open() {
        let config = RouterConfig { depth_queue_capacity: 0, ..small_config() };
        assert!(InterleaveSession::open(ScriptedSource::new(vec![]), config).is_err());
    }
}
