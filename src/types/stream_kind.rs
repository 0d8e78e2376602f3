//! Logical stream classification

use serde::{Deserialize, Serialize};

/// One of the two logical streams multiplexed on the interleaved endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// Odd sequence numbers (1, 3, 5, ...)
    Color,

    /// Even sequence numbers (0, 2, 4, ...)
    Depth,
}

impl StreamKind {
    /// Route a frame by the parity of its device-reported sequence number.
    ///
    /// Only the sequence number the device reported for this read is used, so
    /// routing stays correct when upstream drops make sequence numbers skip.
    pub const fn from_sequence(sequence: u32) -> Self {
        if sequence % 2 == 1 { StreamKind::Color } else { StreamKind::Depth }
    }

    /// Short lowercase name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            StreamKind::Color => "color",
            StreamKind::Depth => "depth",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
