//! FrameSource trait for device endpoints

use crate::error::ReadError;

/// Outcome of a successful device read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRead {
    /// Bytes written into the buffer
    pub bytes_read: usize,

    /// Device-reported sequence number; its parity selects the logical stream
    pub sequence: u32,

    /// Capture timestamp in microseconds
    pub timestamp_us: i64,
}

/// A single physical endpoint that yields raw frames.
///
/// Sources abstract over the device layer (USB endpoint, recorded capture,
/// synthetic generator). The router owns its source on the reader thread and
/// calls [`read_frame`](Self::read_frame) in a loop.
///
/// Returns:
/// - `Ok(read)` - A frame was written into `buf[..read.bytes_read]`
/// - `Err(ReadError::Transient { .. })` - Retry after a short backoff
/// - `Err(ReadError::Fatal { .. })` - The session cannot continue
///
/// Reads block until data, a device timeout, or an error. A source whose reads
/// never time out bounds router shutdown latency by its longest read.
pub trait FrameSource: Send + 'static {
    /// Read one frame into `buf`, which spans the buffer's whole raw capacity.
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<FrameRead, ReadError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<FrameRead, ReadError> {
        (**self).read_frame(buf)
    }
}

/// Source backed by a closure. See [`from_fn`].
pub struct FromFn<F>(F);

/// Build a [`FrameSource`] from a closure with the `read_frame` signature.
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: FnMut(&mut [u8]) -> Result<FrameRead, ReadError> + Send + 'static,
{
    FromFn(f)
}

impl<F> FrameSource for FromFn<F>
where
    F: FnMut(&mut [u8]) -> Result<FrameRead, ReadError> + Send + 'static,
{
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<FrameRead, ReadError> {
        (self.0)(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_and_boxes_are_sources() {
        let mut next = 0u32;
        let source = from_fn(move |buf: &mut [u8]| {
            next += 1;
            buf[0] = next as u8;
            Ok(FrameRead { bytes_read: 1, sequence: next, timestamp_us: 0 })
        });

        let mut boxed: Box<dyn FrameSource> = Box::new(source);
        let mut buf = [0u8; 4];
        let first = boxed.read_frame(&mut buf).unwrap();
        let second = boxed.read_frame(&mut buf).unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(buf[0], 2);
    }
}
