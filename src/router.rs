//! Frame router: one reader thread feeding two delivery queues
//!
//! In interleave mode a single USB endpoint carries both logical streams. The
//! router owns that endpoint on a dedicated reader thread and routes every frame
//! by the parity of its device-reported sequence number:
//!
//! - Odd sequence numbers (1, 3, 5, ...) go to the color queue
//! - Even sequence numbers (2, 4, 6, ...) go to the depth queue
//!
//! Buffers come from a fixed shared free pool and are delivered with a blocking
//! `send`, so a slow consumer stalls acquisition for both streams instead of
//! growing memory. Consumers return drained buffers through
//! [`FrameRouter::shared_free_queue`].
//!
//! Error handling:
//! - Transient read errors: log, recycle the buffer, retry after a short backoff
//! - Fatal read errors, or too many consecutive transient ones: log and exit
//! - A stopped channel: clean shutdown, not an error
//!
//! Statistics are summarized every `stats_interval` routed frames and once more
//! when the reader exits.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::channel::{BoundedChannel, SendError};
use crate::config::RouterConfig;
use crate::error::ReadError;
use crate::source::FrameSource;
use crate::stats::{RouterStats, StatsSnapshot};
use crate::types::{FrameBuffer, FrameFormat, StreamKind};
use crate::{Result, RouterError};

/// Channel of frame buffers, used for the free pool and the delivery queues.
pub type FrameQueue = BoundedChannel<FrameBuffer>;

const READER_THREAD_NAME: &str = "ilm-frame-reader";

/// Longest uninterrupted sleep while backing off after a transient failure.
const BACKOFF_SLICE: Duration = Duration::from_millis(5);

/// Router lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouterState {
    /// Constructed, reader not started
    Idle = 0,
    /// Reader thread active
    Running = 1,
    /// Stop flag set, reader still exiting
    StopRequested = 2,
    /// Reader exited; terminal
    Stopped = 3,
}

impl RouterState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RouterState::Idle,
            1 => RouterState::Running,
            2 => RouterState::StopRequested,
            _ => RouterState::Stopped,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: RouterState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> RouterState {
        RouterState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: RouterState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: RouterState, to: RouterState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Why the reader thread ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// `stop()` or `request_stop()` was called
    StopRequested,
    /// The shared free pool was stopped by someone else
    PoolStopped,
    /// A consumer stopped its delivery queue
    ConsumerStopped(StreamKind),
    /// The device reported an unrecoverable error
    Fatal(ReadError),
    /// Transient errors reached the configured ceiling
    TooManyFailures { consecutive: u32 },
}

impl ExitReason {
    /// Whether the reader ended because of a device failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, ExitReason::Fatal(_) | ExitReason::TooManyFailures { .. })
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopRequested => f.write_str("stop requested"),
            ExitReason::PoolStopped => f.write_str("free pool stopped"),
            ExitReason::ConsumerStopped(kind) => write!(f, "{} queue stopped", kind),
            ExitReason::Fatal(err) => write!(f, "{}", err),
            ExitReason::TooManyFailures { consecutive } => {
                write!(f, "{} consecutive transient failures", consecutive)
            }
        }
    }
}

/// State shared with the reader thread.
#[derive(Debug)]
struct Shared {
    state: StateCell,
    stats: RouterStats,
    exit_reason: Mutex<Option<ExitReason>>,
}

/// Routes interleaved frames from one [`FrameSource`] to color and depth queues.
///
/// The router is not `Clone`; share it behind an `Arc` if several threads need
/// to control it. Dropping the router stops and joins the reader thread.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use ilm_router::{FrameQueue, FrameRouter, RouterConfig};
/// use ilm_router::providers::SyntheticSource;
///
/// # fn main() -> ilm_router::Result<()> {
/// let config = RouterConfig::new(640, 480);
/// let color = Arc::new(FrameQueue::new(2));
/// let depth = Arc::new(FrameQueue::new(2));
/// let source = SyntheticSource::new(640, 480, 30.0);
///
/// let router = FrameRouter::new(source, Arc::clone(&color), Arc::clone(&depth), config)?;
/// router.start()?;
///
/// let pool = router.shared_free_queue();
/// if let Ok(frame) = color.receive() {
///     println!("color frame {}", frame.sequence);
///     let _ = pool.send(frame);
/// }
///
/// router.stop();
/// # Ok(())
/// # }
/// ```
pub struct FrameRouter<S: FrameSource> {
    source: Mutex<Option<S>>,
    color_queue: Arc<FrameQueue>,
    depth_queue: Arc<FrameQueue>,
    pool: Arc<FrameQueue>,
    config: RouterConfig,
    cancel: CancellationToken,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl<S: FrameSource> FrameRouter<S> {
    /// Create a router over `source` feeding the given delivery queues.
    ///
    /// The queues are not owned: consumers keep their own handles. The shared
    /// free pool is created here, empty until [`start`](Self::start).
    pub fn new(
        source: S,
        color_queue: Arc<FrameQueue>,
        depth_queue: Arc<FrameQueue>,
        config: RouterConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            source: Mutex::new(Some(source)),
            color_queue,
            depth_queue,
            pool: Arc::new(FrameQueue::new(config.pool_size)),
            config,
            cancel: CancellationToken::new(),
            shared: Arc::new(Shared {
                state: StateCell::new(RouterState::Idle),
                stats: RouterStats::new(),
                exit_reason: Mutex::new(None),
            }),
            reader: Mutex::new(None),
        })
    }

    /// Fill the shared pool and launch the reader thread.
    ///
    /// Fails with [`RouterError::InvalidState`] unless the router is idle; a
    /// stopped router is never restarted. Allocation failures leave the router
    /// idle with an empty pool.
    pub fn start(&self) -> Result<()> {
        let state = self.shared.state.load();
        if state != RouterState::Idle {
            return Err(RouterError::invalid_state("start", state));
        }

        let mut slot = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(source) = slot.take() else {
            return Err(RouterError::invalid_state("start", self.shared.state.load()));
        };

        if let Err(err) = self.initialize_pool() {
            *slot = Some(source);
            while let Ok(Some(_)) = self.pool.try_receive() {}
            return Err(err);
        }

        if !self.shared.state.transition(RouterState::Idle, RouterState::Running) {
            *slot = Some(source);
            while let Ok(Some(_)) = self.pool.try_receive() {}
            return Err(RouterError::invalid_state("start", self.shared.state.load()));
        }
        drop(slot);

        let task = ReaderTask {
            source,
            pool: Arc::clone(&self.pool),
            color_queue: Arc::clone(&self.color_queue),
            depth_queue: Arc::clone(&self.depth_queue),
            cancel: self.cancel.clone(),
            shared: Arc::clone(&self.shared),
            color_format: self.config.color_format,
            depth_format: self.config.depth_format,
            backoff: self.config.transient_backoff(),
            max_consecutive_failures: self.config.max_consecutive_failures,
            stats_interval: self.config.stats_interval,
        };

        let handle = thread::Builder::new()
            .name(READER_THREAD_NAME.to_string())
            .spawn(move || task.run())
            .map_err(|source| {
                self.shared.state.store(RouterState::Stopped);
                RouterError::ThreadSpawn { source }
            })?;

        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(
            width = self.config.width,
            height = self.config.height,
            pool_size = self.config.pool_size,
            "Frame router started"
        );
        Ok(())
    }

    /// Pre-fill the shared pool with buffers carrying the session metadata.
    fn initialize_pool(&self) -> Result<()> {
        let layout = self.config.layout();
        let params = self.config.session_params();

        for index in 0..self.config.pool_size {
            let mut frame = FrameBuffer::from_layout(&layout)?;
            frame.apply_session(&params);
            frame.interleaved = true;

            if self.pool.try_send(frame).is_err() {
                return Err(RouterError::invalid_state("fill pool", self.shared.state.load()));
            }
            trace!("Pool buffer {} allocated", index);
        }

        debug!(
            buffers = self.config.pool_size,
            raw_capacity = layout.raw_capacity,
            depth_capacity = layout.depth_capacity,
            rgb_capacity = layout.rgb_capacity,
            "Shared free pool initialized"
        );
        Ok(())
    }

    /// Ask the reader to exit without waiting for it.
    ///
    /// Sets the stop flag and stops the free pool, which wakes a reader parked
    /// there. A reader blocked on a full delivery queue only wakes once that
    /// queue is drained or stopped; [`stop`](Self::stop) covers both.
    pub fn request_stop(&self) {
        self.cancel.cancel();
        self.shared.state.transition(RouterState::Running, RouterState::StopRequested);
        self.pool.request_stop();
    }

    /// Stop the reader thread and wait for it to exit.
    ///
    /// Stops the free pool and both delivery queues so a reader blocked in any
    /// of them wakes up, then joins the thread. Safe to call repeatedly and
    /// from any state.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.shared.state.transition(RouterState::Running, RouterState::StopRequested);

        self.pool.request_stop();
        self.color_queue.request_stop();
        self.depth_queue.request_stop();

        let handle = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Frame reader thread panicked");
            }
            info!("Frame router stopped ({})", self.shared.stats.snapshot());
        }

        self.shared.state.store(RouterState::Stopped);
    }

    pub fn state(&self) -> RouterState {
        self.shared.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.state() == RouterState::Running
    }

    /// Handle to the shared free pool; consumers return drained buffers here.
    pub fn shared_free_queue(&self) -> Arc<FrameQueue> {
        Arc::clone(&self.pool)
    }

    pub fn color_queue(&self) -> &Arc<FrameQueue> {
        &self.color_queue
    }

    pub fn depth_queue(&self) -> &Arc<FrameQueue> {
        &self.depth_queue
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Current cumulative statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Why the reader ended, once it has.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.shared.exit_reason.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl<S: FrameSource> Drop for FrameRouter<S> {
    fn drop(&mut self) {
        debug!("Dropping frame router");
        self.stop();
    }
}

impl<S: FrameSource> fmt::Debug for FrameRouter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRouter")
            .field("state", &self.state())
            .field("pool", &self.pool)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Everything the reader thread owns.
struct ReaderTask<S> {
    source: S,
    pool: Arc<FrameQueue>,
    color_queue: Arc<FrameQueue>,
    depth_queue: Arc<FrameQueue>,
    cancel: CancellationToken,
    shared: Arc<Shared>,
    color_format: u32,
    depth_format: u32,
    backoff: Duration,
    max_consecutive_failures: u32,
    stats_interval: u64,
}

impl<S: FrameSource> ReaderTask<S> {
    fn run(mut self) {
        info!("Frame reader started");

        let reason = self.read_loop();
        let stats = self.shared.stats.snapshot();

        match &reason {
            ExitReason::StopRequested => debug!("Frame reader stop requested"),
            ExitReason::PoolStopped | ExitReason::ConsumerStopped(_) => {
                info!("Frame reader shutting down: {}", reason)
            }
            ExitReason::Fatal(_) | ExitReason::TooManyFailures { .. } => {
                error!("Frame reader giving up: {} (last sn={:?}, {})", reason, stats.last_sequence, stats)
            }
        }

        info!("Frame reader ended ({})", stats);
        *self.shared.exit_reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
        self.shared.state.store(RouterState::Stopped);

        // Let consumers see the end of the stream when the reader quits on its own.
        if !self.cancel.is_cancelled() {
            self.color_queue.request_stop();
            self.depth_queue.request_stop();
        }
    }

    fn stop_reason(&self, otherwise: ExitReason) -> ExitReason {
        if self.cancel.is_cancelled() { ExitReason::StopRequested } else { otherwise }
    }

    fn read_loop(&mut self) -> ExitReason {
        loop {
            if self.cancel.is_cancelled() {
                return ExitReason::StopRequested;
            }

            let mut frame = match self.pool.receive() {
                Ok(frame) => frame,
                Err(_) => return self.stop_reason(ExitReason::PoolStopped),
            };

            frame.begin_read();
            match self.source.read_frame(frame.raw_buffer_mut()) {
                Ok(read) => {
                    if !frame.set_raw_len(read.bytes_read) {
                        warn!(
                            "Dropping frame sn={}: device reported {} bytes, buffer holds {}",
                            read.sequence,
                            read.bytes_read,
                            frame.raw_capacity()
                        );
                        self.shared.stats.record_dropped();
                        if let Some(reason) = self.retry_after_transient(frame) {
                            return reason;
                        }
                        continue;
                    }

                    let kind = StreamKind::from_sequence(read.sequence);
                    frame.sequence = read.sequence;
                    frame.timestamp_us = read.timestamp_us;
                    frame.format = match kind {
                        StreamKind::Color => FrameFormat::Color(self.color_format),
                        StreamKind::Depth => FrameFormat::Depth(self.depth_format),
                    };

                    if let Some(reason) = self.route_frame(frame, kind) {
                        return reason;
                    }
                }
                Err(ReadError::Transient { reason }) => {
                    let consecutive = self.shared.stats.snapshot().consecutive_failures + 1;
                    warn!(
                        "Transient read failure ({}/{}): {}",
                        consecutive, self.max_consecutive_failures, reason
                    );
                    if let Some(reason) = self.retry_after_transient(frame) {
                        return reason;
                    }
                }
                Err(err @ ReadError::Fatal { .. }) => {
                    self.shared.stats.record_fatal();
                    self.recycle(frame);
                    return ExitReason::Fatal(err);
                }
            }
        }
    }

    /// Deliver a filled frame to its queue, blocking under backpressure.
    fn route_frame(&mut self, frame: FrameBuffer, kind: StreamKind) -> Option<ExitReason> {
        let sequence = frame.sequence;
        let queue = match kind {
            StreamKind::Color => &self.color_queue,
            StreamKind::Depth => &self.depth_queue,
        };

        if let Err(SendError(frame)) = queue.send(frame) {
            debug!("{} queue stopped, frame sn={} not delivered", kind, sequence);
            self.shared.stats.record_shutdown_drop();
            self.recycle(frame);
            return Some(self.stop_reason(ExitReason::ConsumerStopped(kind)));
        }

        let routed = self.shared.stats.record_routed(kind, sequence);
        trace!("Routed frame sn={} to {}", sequence, kind);

        if routed % self.stats_interval == 0 {
            self.shared.stats.record_summary();
            info!("Routing stats: {}", self.shared.stats.snapshot());
        }
        None
    }

    /// Recycle the buffer, count the failure and back off.
    fn retry_after_transient(&mut self, frame: FrameBuffer) -> Option<ExitReason> {
        let consecutive = self.shared.stats.record_transient();

        if self.pool.send(frame).is_err() {
            return Some(self.stop_reason(ExitReason::PoolStopped));
        }
        if consecutive >= self.max_consecutive_failures {
            return Some(ExitReason::TooManyFailures { consecutive });
        }

        if !self.back_off() {
            return Some(ExitReason::StopRequested);
        }
        None
    }

    /// Sleep the retry backoff in slices, watching the stop flag. Returns
    /// `false` if a stop was requested before the backoff elapsed.
    fn back_off(&self) -> bool {
        let deadline = Instant::now() + self.backoff;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(BACKOFF_SLICE));
        }
    }

    /// Return a buffer to the pool on the way out. Dropped if the pool is stopped.
    fn recycle(&self, frame: FrameBuffer) {
        if self.pool.send(frame).is_err() {
            debug!("Free pool stopped, releasing buffer");
        }
    }
}
