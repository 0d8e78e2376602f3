//! Cumulative routing statistics
//!
//! Counters are updated only by the reader thread and read from any thread via
//! [`RouterStats::snapshot`].

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

use crate::types::StreamKind;

/// Sentinel for "no frame routed yet".
const NO_SEQUENCE: u64 = u64::MAX;

/// Lock-free counters shared between the reader thread and observers.
#[derive(Debug)]
pub struct RouterStats {
    color_frames: AtomicU64,
    depth_frames: AtomicU64,
    transient_failures: AtomicU64,
    fatal_failures: AtomicU64,
    dropped_frames: AtomicU64,
    shutdown_drops: AtomicU64,
    consecutive_failures: AtomicU32,
    last_sequence: AtomicU64,
    summaries: AtomicU64,
}

impl Default for RouterStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterStats {
    pub fn new() -> Self {
        Self {
            color_frames: AtomicU64::new(0),
            depth_frames: AtomicU64::new(0),
            transient_failures: AtomicU64::new(0),
            fatal_failures: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            shutdown_drops: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            last_sequence: AtomicU64::new(NO_SEQUENCE),
            summaries: AtomicU64::new(0),
        }
    }

    /// Record a delivered frame and reset the consecutive-failure counter.
    /// Returns the total number of routed frames.
    pub(crate) fn record_routed(&self, kind: StreamKind, sequence: u32) -> u64 {
        let counter = match kind {
            StreamKind::Color => &self.color_frames,
            StreamKind::Depth => &self.depth_frames,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.last_sequence.store(sequence as u64, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.routed()
    }

    /// Record a transient failure. Returns the new consecutive-failure count.
    pub(crate) fn record_transient(&self) -> u32 {
        self.transient_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_fatal(&self) {
        self.fatal_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame was read but had to be discarded (malformed read).
    pub(crate) fn record_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame was read but its queue stopped before delivery.
    pub(crate) fn record_shutdown_drop(&self) {
        self.shutdown_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// A periodic statistics summary was logged.
    pub(crate) fn record_summary(&self) {
        self.summaries.fetch_add(1, Ordering::Relaxed);
    }

    fn routed(&self) -> u64 {
        self.color_frames.load(Ordering::Relaxed) + self.depth_frames.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.last_sequence.load(Ordering::Relaxed);
        StatsSnapshot {
            color_frames: self.color_frames.load(Ordering::Relaxed),
            depth_frames: self.depth_frames.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            fatal_failures: self.fatal_failures.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            shutdown_drops: self.shutdown_drops.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_sequence: (last != NO_SEQUENCE).then_some(last as u32),
            summaries: self.summaries.load(Ordering::Relaxed),
        }
    }
}

/// Copy of the router counters at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub color_frames: u64,
    pub depth_frames: u64,
    pub transient_failures: u64,
    pub fatal_failures: u64,
    /// Frames read but discarded before routing
    pub dropped_frames: u64,
    /// Frames read but not delivered because their queue stopped
    pub shutdown_drops: u64,
    pub consecutive_failures: u32,
    /// Sequence number of the last routed frame
    pub last_sequence: Option<u32>,
    /// Periodic summaries logged so far
    pub summaries: u64,
}

impl StatsSnapshot {
    pub fn routed(&self) -> u64 {
        self.color_frames + self.depth_frames
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "routed={} (color={}, depth={}) dropped={} shutdown_drops={} transient={} fatal={}",
            self.routed(),
            self.color_frames,
            self.depth_frames,
            self.dropped_frames,
            self.shutdown_drops,
            self.transient_failures,
            self.fatal_failures
        )?;
        match self.last_sequence {
            Some(sn) => write!(f, " last_sn={}", sn),
            None => write!(f, " last_sn=none"),
        }
    }
}
