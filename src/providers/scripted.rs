//! Scripted source that replays a fixed sequence of read outcomes

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::ReadError;
use crate::source::{FrameRead, FrameSource};

/// Nominal frame period used for scripted timestamps (30 fps).
const FRAME_PERIOD_US: i64 = 33_333;

/// One scripted read outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// A successful read of `bytes` bytes with the given sequence number.
    Frame { sequence: u32, bytes: usize },
    /// A transient failure.
    Transient(String),
    /// A fatal failure.
    Fatal(String),
}

impl ScriptStep {
    pub fn frame(sequence: u32, bytes: usize) -> Self {
        ScriptStep::Frame { sequence, bytes }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        ScriptStep::Transient(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        ScriptStep::Fatal(reason.into())
    }

    /// `count` transient failures in a row.
    pub fn transients(count: usize) -> Vec<Self> {
        (0..count).map(|i| ScriptStep::transient(format!("scripted timeout #{}", i + 1))).collect()
    }

    /// Successful reads for each sequence number, `bytes` bytes each.
    pub fn frames(sequences: impl IntoIterator<Item = u32>, bytes: usize) -> Vec<Self> {
        sequences.into_iter().map(|sequence| ScriptStep::frame(sequence, bytes)).collect()
    }
}

/// Replays scripted outcomes, then reports a fatal "script exhausted" error.
///
/// Frame payloads are filled with the low byte of the sequence number so tests
/// can tell which read produced a buffer.
#[derive(Debug)]
pub struct ScriptedSource {
    steps: VecDeque<ScriptStep>,
    read_delay: Option<Duration>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self { steps: steps.into_iter().collect(), read_delay: None, reads: Arc::new(AtomicUsize::new(0)) }
    }

    /// Sleep before every read, like a device waiting for its next frame.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Shared counter of completed reads (successful or not).
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<FrameRead, ReadError> {
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }

        let step = self.steps.pop_front();
        self.reads.fetch_add(1, Ordering::SeqCst);

        match step {
            Some(ScriptStep::Frame { sequence, bytes }) => {
                let filled = bytes.min(buf.len());
                buf[..filled].fill(sequence as u8);
                trace!("Scripted frame sn={} ({} bytes)", sequence, bytes);
                Ok(FrameRead {
                    bytes_read: bytes,
                    sequence,
                    timestamp_us: sequence as i64 * FRAME_PERIOD_US,
                })
            }
            Some(ScriptStep::Transient(reason)) => Err(ReadError::Transient { reason }),
            Some(ScriptStep::Fatal(reason)) => Err(ReadError::Fatal { reason }),
            None => {
                debug!("Scripted source exhausted");
                Err(ReadError::fatal("script exhausted"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_steps_in_order_then_fails() {
        let mut steps = ScriptStep::frames([1, 2], 4);
        steps.push(ScriptStep::transient("usb timeout"));
        let mut source = ScriptedSource::new(steps);
        let reads = source.read_counter();
        let mut buf = [0u8; 8];

        let first = source.read_frame(&mut buf).unwrap();
        assert_eq!((first.sequence, first.bytes_read), (1, 4));
        assert_eq!(&buf[..5], &[1, 1, 1, 1, 0]);

        assert_eq!(source.read_frame(&mut buf).unwrap().sequence, 2);
        assert!(source.read_frame(&mut buf).unwrap_err().is_transient());
        assert_eq!(source.read_frame(&mut buf), Err(ReadError::fatal("script exhausted")));
        assert_eq!(reads.load(Ordering::SeqCst), 4);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn oversized_frames_report_device_length() {
        let mut source = ScriptedSource::new([ScriptStep::frame(3, 100)]);
        let mut buf = [0u8; 8];
        let read = source.read_frame(&mut buf).unwrap();
        assert_eq!(read.bytes_read, 100);
        assert_eq!(buf, [3; 8]);
    }

    #[test]
    fn transients_helper_counts() {
        let steps = ScriptStep::transients(3);
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|s| matches!(s, ScriptStep::Transient(_))));
    }
}
