//! Reusable frame buffers for the routing pipeline
//!
//! A [`FrameBuffer`] is allocated once and then cycles between the shared free
//! pool, the reader thread, a delivery queue and a consumer. It is move-only:
//! there is no `Clone`, so two stages can never hold the same buffer.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::aligned::AlignedBuf;
use crate::Result;

/// Logical format tag carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Not yet filled by the reader.
    #[default]
    Unknown,
    /// Raw color payload with the device's color format code.
    Color(u32),
    /// Raw depth payload with the device's depth format code.
    Depth(u32),
}

/// Capacities and fill values used to allocate a [`FrameBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameLayout {
    pub raw_capacity: usize,
    pub raw_fill: u8,
    pub depth_capacity: usize,
    pub depth_fill: u16,
    pub rgb_capacity: usize,
    pub rgb_fill: u8,
}

/// Immutable per-session values stamped onto every pooled buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub width: u32,
    pub height: u32,
    pub dev_type: u16,
    /// ZD lookup table, shared by every buffer of the session.
    pub zd_table: Arc<[u8]>,
}

/// Opaque, reusable payload container with frame metadata.
pub struct FrameBuffer {
    /// Device-reported sequence number of the last read into this buffer
    pub sequence: u32,

    /// Capture timestamp in microseconds
    pub timestamp_us: i64,

    pub width: u32,
    pub height: u32,

    /// Color or depth tag assigned at routing time
    pub format: FrameFormat,

    /// Device type tag (session constant)
    pub dev_type: u16,

    /// Frame was produced by an interleaved endpoint
    pub interleaved: bool,

    zd_table: Arc<[u8]>,

    raw: AlignedBuf<u8>,
    raw_len: usize,
    depth: AlignedBuf<u16>,
    depth_len: usize,
    rgb: AlignedBuf<u8>,
    rgb_len: usize,
}

impl FrameBuffer {
    /// Allocate a buffer with the given payload capacities and fill values.
    ///
    /// Either every payload is allocated or none is: on failure the arrays
    /// allocated so far are released and [`RouterError::OutOfMemory`] is returned.
    ///
    /// [`RouterError::OutOfMemory`]: crate::RouterError::OutOfMemory
    pub fn allocate(
        raw_capacity: usize,
        raw_fill: u8,
        depth_capacity: usize,
        depth_fill: u16,
        rgb_capacity: usize,
        rgb_fill: u8,
    ) -> Result<Self> {
        let raw = AlignedBuf::filled(raw_capacity, raw_fill)?;
        let depth = AlignedBuf::filled(depth_capacity, depth_fill)?;
        let rgb = AlignedBuf::filled(rgb_capacity, rgb_fill)?;

        Ok(Self {
            sequence: 0,
            timestamp_us: 0,
            width: 0,
            height: 0,
            format: FrameFormat::Unknown,
            dev_type: 0,
            interleaved: false,
            zd_table: Arc::from(Vec::new()),
            raw,
            raw_len: 0,
            depth,
            depth_len: 0,
            rgb,
            rgb_len: 0,
        })
    }

    /// Allocate a buffer from a [`FrameLayout`].
    pub fn from_layout(layout: &FrameLayout) -> Result<Self> {
        Self::allocate(
            layout.raw_capacity,
            layout.raw_fill,
            layout.depth_capacity,
            layout.depth_fill,
            layout.rgb_capacity,
            layout.rgb_fill,
        )
    }

    /// Stamp the per-session constants onto this buffer.
    pub fn apply_session(&mut self, params: &SessionParams) {
        self.width = params.width;
        self.height = params.height;
        self.dev_type = params.dev_type;
        self.zd_table = Arc::clone(&params.zd_table);
    }

    /// Exchange the three payload arrays with `other` in O(1).
    ///
    /// Metadata stays with each buffer. Lengths are clamped to the capacity of
    /// the storage each buffer now owns.
    pub fn swap_buffers_only(&mut self, other: &mut FrameBuffer) {
        self.raw.swap(&mut other.raw);
        self.depth.swap(&mut other.depth);
        self.rgb.swap(&mut other.rgb);
        self.clamp_lengths();
        other.clamp_lengths();
    }

    /// Copy lightweight metadata from `source`, leaving payloads untouched.
    pub fn copy_metadata(&mut self, source: &FrameBuffer) {
        self.width = source.width;
        self.height = source.height;
        self.format = source.format;
        self.sequence = source.sequence;
        self.timestamp_us = source.timestamp_us;
        self.interleaved = source.interleaved;
        self.raw_len = source.raw_len;
        self.depth_len = source.depth_len;
        self.rgb_len = source.rgb_len;
        self.clamp_lengths();
    }

    /// Forget everything the previous read and its consumer left behind.
    ///
    /// Clears the three payload lengths and the per-read metadata; capacities
    /// and session values are kept.
    pub fn begin_read(&mut self) {
        self.sequence = 0;
        self.timestamp_us = 0;
        self.format = FrameFormat::Unknown;
        self.raw_len = 0;
        self.depth_len = 0;
        self.rgb_len = 0;
    }

    fn clamp_lengths(&mut self) {
        self.raw_len = self.raw_len.min(self.raw.capacity());
        self.depth_len = self.depth_len.min(self.depth.capacity());
        self.rgb_len = self.rgb_len.min(self.rgb.capacity());
    }

    /// Bytes filled by the last device read.
    pub fn raw(&self) -> &[u8] {
        &self.raw[..self.raw_len]
    }

    /// The whole raw capacity, for the device to read into.
    pub fn raw_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.raw
    }

    pub fn raw_capacity(&self) -> usize {
        self.raw.capacity()
    }

    /// Record how many raw bytes are valid. Returns `false` if `len` exceeds capacity.
    #[must_use]
    pub fn set_raw_len(&mut self, len: usize) -> bool {
        if len > self.raw.capacity() {
            return false;
        }
        self.raw_len = len;
        true
    }

    /// Decoded depth samples.
    pub fn depth(&self) -> &[u16] {
        &self.depth[..self.depth_len]
    }

    pub fn depth_buffer_mut(&mut self) -> &mut [u16] {
        &mut self.depth
    }

    pub fn depth_capacity(&self) -> usize {
        self.depth.capacity()
    }

    #[must_use]
    pub fn set_depth_len(&mut self, len: usize) -> bool {
        if len > self.depth.capacity() {
            return false;
        }
        self.depth_len = len;
        true
    }

    /// Transcoded RGB bytes.
    pub fn rgb(&self) -> &[u8] {
        &self.rgb[..self.rgb_len]
    }

    pub fn rgb_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.rgb
    }

    pub fn rgb_capacity(&self) -> usize {
        self.rgb.capacity()
    }

    #[must_use]
    pub fn set_rgb_len(&mut self, len: usize) -> bool {
        if len > self.rgb.capacity() {
            return false;
        }
        self.rgb_len = len;
        true
    }

    /// Capacities of the three payloads, in elements.
    pub fn layout(&self) -> (usize, usize, usize) {
        (self.raw.capacity(), self.depth.capacity(), self.rgb.capacity())
    }

    pub fn zd_table(&self) -> &[u8] {
        &self.zd_table
    }

    /// Decoded depth sample at pixel (`x`, `y`), if it lies inside the filled region.
    pub fn depth_at(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = (y as usize).checked_mul(self.width as usize)?.checked_add(x as usize)?;
        self.depth().get(index).copied()
    }

    /// Z value for a depth sample, looked up in the session ZD table.
    ///
    /// The table stores big-endian `u16` entries indexed by depth.
    pub fn z_value(&self, depth: u16) -> Option<u16> {
        let offset = depth as usize * 2;
        let hi = *self.zd_table.get(offset)?;
        let lo = *self.zd_table.get(offset + 1)?;
        Some(u16::from_be_bytes([hi, lo]))
    }

    /// Logical stream this frame was routed to, from its format tag.
    pub fn stream(&self) -> Option<super::StreamKind> {
        match self.format {
            FrameFormat::Color(_) => Some(super::StreamKind::Color),
            FrameFormat::Depth(_) => Some(super::StreamKind::Depth),
            FrameFormat::Unknown => None,
        }
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("sequence", &self.sequence)
            .field("timestamp_us", &self.timestamp_us)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("raw", &format_args!("{}/{}", self.raw_len, self.raw.capacity()))
            .field("depth", &format_args!("{}/{}", self.depth_len, self.depth.capacity()))
            .field("rgb", &format_args!("{}/{}", self.rgb_len, self.rgb.capacity()))
            .finish()
    }
}

impl fmt::Display for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sn={} ts={}us {}x{} {:?} raw={}B depth={} rgb={}B",
            self.sequence,
            self.timestamp_us,
            self.width,
            self.height,
            self.format,
            self.raw_len,
            self.depth_len,
            self.rgb_len
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::aligned::PAGE_SIZE;

    fn session() -> SessionParams {
        SessionParams {
            width: 4,
            height: 2,
            dev_type: 5,
            zd_table: Arc::from(vec![0x00, 0x00, 0x01, 0x02, 0xFF, 0xEE]),
        }
    }

    #[test]
    fn allocate_fills_every_payload() {
        let frame = FrameBuffer::allocate(100, 0x11, 50, 0x2222, 30, 0x33).unwrap();
        assert_eq!(frame.layout(), (100, 50, 30));
        assert!(frame.raw().is_empty());

        let mut frame = frame;
        assert!(frame.raw_buffer_mut().iter().all(|&b| b == 0x11));
        assert!(frame.depth_buffer_mut().iter().all(|&d| d == 0x2222));
        assert!(frame.rgb_buffer_mut().iter().all(|&b| b == 0x33));
        assert_eq!(frame.raw_buffer_mut().as_ptr() as usize % PAGE_SIZE, 0);
    }

    #[test]
    fn failed_allocation_is_atomic() {
        let err = FrameBuffer::allocate(64, 0, 64, 0, usize::MAX, 0).unwrap_err();
        assert!(matches!(err, crate::RouterError::OutOfMemory { .. }));
    }

    #[test]
    fn lengths_never_exceed_capacity() {
        let mut frame = FrameBuffer::allocate(8, 0, 4, 0, 2, 0).unwrap();
        assert!(frame.set_raw_len(8));
        assert!(!frame.set_raw_len(9));
        assert_eq!(frame.raw().len(), 8);
        assert!(!frame.set_depth_len(5));
        assert!(!frame.set_rgb_len(3));
    }

    #[test]
    fn swap_buffers_only_keeps_metadata() {
        let mut a = FrameBuffer::allocate(16, 0xAA, 4, 1, 0, 0).unwrap();
        let mut b = FrameBuffer::allocate(16, 0xBB, 4, 2, 0, 0).unwrap();
        a.sequence = 7;
        b.sequence = 8;
        assert!(a.set_raw_len(10));

        a.swap_buffers_only(&mut b);

        assert_eq!(a.sequence, 7);
        assert_eq!(b.sequence, 8);
        assert!(a.raw_buffer_mut().iter().all(|&x| x == 0xBB));
        assert!(b.raw_buffer_mut().iter().all(|&x| x == 0xAA));
        assert_eq!(a.raw().len(), 10);
    }

    #[test]
    fn swap_clamps_lengths_to_new_capacity() {
        let mut big = FrameBuffer::allocate(32, 0, 0, 0, 0, 0).unwrap();
        let mut small = FrameBuffer::allocate(8, 0, 0, 0, 0, 0).unwrap();
        assert!(big.set_raw_len(30));

        big.swap_buffers_only(&mut small);

        assert_eq!(big.raw_capacity(), 8);
        assert_eq!(big.raw().len(), 8);
        assert_eq!(small.raw_capacity(), 32);
    }

    #[test]
    fn copy_metadata_skips_payloads_and_session_values() {
        let mut source = FrameBuffer::allocate(16, 0x01, 0, 0, 0, 0).unwrap();
        source.apply_session(&session());
        source.sequence = 41;
        source.timestamp_us = 123_456;
        source.format = FrameFormat::Depth(0x1A);
        assert!(source.set_raw_len(12));

        let mut target = FrameBuffer::allocate(16, 0x02, 0, 0, 0, 0).unwrap();
        target.copy_metadata(&source);

        assert_eq!(target.sequence, 41);
        assert_eq!(target.timestamp_us, 123_456);
        assert_eq!(target.format, FrameFormat::Depth(0x1A));
        assert_eq!((target.width, target.height), (4, 2));
        assert_eq!(target.dev_type, 0);
        assert!(target.zd_table().is_empty());
        assert!(target.raw().iter().all(|&b| b == 0x02));
        assert_eq!(target.stream(), Some(crate::types::StreamKind::Depth));
    }

    #[test]
    fn depth_and_z_lookups() {
        let mut frame = FrameBuffer::allocate(0, 0, 8, 0, 0, 0).unwrap();
        frame.apply_session(&session());
        for (i, sample) in frame.depth_buffer_mut().iter_mut().enumerate() {
            *sample = i as u16;
        }
        assert!(frame.set_depth_len(8));

        assert_eq!(frame.depth_at(1, 1), Some(5));
        assert_eq!(frame.depth_at(4, 0), None);
        assert_eq!(frame.z_value(1), Some(0x0102));
        assert_eq!(frame.z_value(2), Some(0xFFEE));
        assert_eq!(frame.z_value(3), None);
    }

    #[test]
    fn display_summarizes_frame() {
        let mut frame = FrameBuffer::allocate(4, 0, 0, 0, 0, 0).unwrap();
        frame.sequence = 3;
        frame.format = FrameFormat::Color(0);
        let text = frame.to_string();
        assert!(text.contains("sn=3"));
        assert!(text.contains("Color"));
    }

    #[test]
    fn begin_read_clears_previous_frame() {
        let mut frame = FrameBuffer::allocate(16, 0, 8, 0x1111, 6, 0).unwrap();
        frame.apply_session(&session());
        frame.sequence = 9;
        frame.format = FrameFormat::Color(3);
        assert!(frame.set_raw_len(16));
        assert!(frame.set_depth_len(8));
        assert!(frame.set_rgb_len(5));

        frame.begin_read();

        assert_eq!(frame.sequence, 0);
        assert_eq!(frame.format, FrameFormat::Unknown);
        assert!(frame.raw().is_empty());
        assert!(frame.depth().is_empty());
        assert!(frame.rgb().is_empty());
        assert_eq!(frame.layout(), (16, 8, 6));
        assert_eq!(frame.dev_type, 5);
    }
}
