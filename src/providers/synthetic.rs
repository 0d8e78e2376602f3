//! Synthetic interleaved source for running the pipeline without hardware

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::ReadError;
use crate::source::{FrameRead, FrameSource};

/// Generates endless paced frames with increasing sequence numbers.
///
/// Sequence numbers start at 1, so the first frame is a color frame. Optionally
/// skips a sequence number periodically to emulate frames lost upstream.
#[derive(Debug)]
pub struct SyntheticSource {
    frame_bytes: usize,
    period: Option<Duration>,
    next_sequence: u32,
    skip_every: Option<u32>,
    produced: u64,
    started: Instant,
    next_deadline: Instant,
}

impl SyntheticSource {
    /// Frames of `width * height * 2` bytes at `fps` frames per second.
    ///
    /// A non-positive or non-finite `fps` disables pacing, as does one so small
    /// that its frame period cannot be represented.
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        let period = (fps.is_finite() && fps > 0.0)
            .then(|| Duration::try_from_secs_f64(1.0 / fps).ok())
            .flatten();
        let now = Instant::now();

        info!("Synthetic source: {}x{} at {:.1} fps", width, height, fps);

        Self {
            frame_bytes: (width as usize).saturating_mul(height as usize).saturating_mul(2),
            period,
            next_sequence: 1,
            skip_every: None,
            produced: 0,
            started: now,
            next_deadline: now,
        }
    }

    /// Skip one sequence number after every `n` frames.
    pub fn with_skip_every(mut self, n: u32) -> Self {
        self.skip_every = (n > 0).then_some(n);
        self
    }

    /// Frames produced so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn pace(&mut self) {
        let Some(period) = self.period else {
            return;
        };
        let now = Instant::now();
        if self.next_deadline > now {
            std::thread::sleep(self.next_deadline - now);
        }
        self.next_deadline = self.next_deadline.max(now) + period;
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<FrameRead, ReadError> {
        if buf.len() < self.frame_bytes {
            return Err(ReadError::fatal(format!(
                "buffer holds {} bytes, synthetic frames need {}",
                buf.len(),
                self.frame_bytes
            )));
        }

        self.pace();

        let sequence = self.next_sequence;
        buf[..self.frame_bytes].fill(sequence as u8);
        self.produced += 1;

        self.next_sequence = self.next_sequence.wrapping_add(1);
        if let Some(n) = self.skip_every {
            if self.produced % n as u64 == 0 {
                debug!("Synthetic source skipping sn={}", self.next_sequence);
                self.next_sequence = self.next_sequence.wrapping_add(1);
            }
        }

        Ok(FrameRead {
            bytes_read: self.frame_bytes,
            sequence,
            timestamp_us: self.started.elapsed().as_micros() as i64,
        })
    }
}
