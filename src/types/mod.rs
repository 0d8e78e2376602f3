//! Core types for frame payloads and stream classification.
//!
//! ## Architecture
//!
//! - [`FrameBuffer`] is the reusable, move-only payload container that cycles
//!   through the shared pool
//! - [`AlignedBuf`] backs each payload array with page-aligned storage
//! - [`FrameLayout`] and [`SessionParams`] describe how pooled buffers are built
//! - [`StreamKind`] maps a device sequence number to its logical stream
//!
//! ## Usage Example
//!
//! ```rust
//! use ilm_router::types::{FrameBuffer, FrameFormat, StreamKind};
//!
//! let mut frame = FrameBuffer::allocate(1024, 0, 0, 0, 0, 0).unwrap();
//! frame.raw_buffer_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
//! assert!(frame.set_raw_len(4));
//! frame.sequence = 7;
//! frame.format = FrameFormat::Color(0);
//!
//! assert_eq!(frame.raw(), &[1, 2, 3, 4]);
//! assert_eq!(StreamKind::from_sequence(frame.sequence), StreamKind::Color);
//! ```

pub mod aligned;
mod frame;
mod stream_kind;

pub use aligned::{AlignedBuf, PAGE_SIZE};
pub use frame::{FrameBuffer, FrameFormat, FrameLayout, SessionParams};
pub use stream_kind::StreamKind;

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_parity_selects_stream(sequence in any::<u32>()) {
            let kind = StreamKind::from_sequence(sequence);
            if sequence % 2 == 1 {
                prop_assert_eq!(kind, StreamKind::Color);
            } else {
                prop_assert_eq!(kind, StreamKind::Depth);
            }
        }

        #[test]
        fn prop_adjacent_sequences_alternate(sequence in 0u32..u32::MAX) {
            prop_assert_ne!(
                StreamKind::from_sequence(sequence),
                StreamKind::from_sequence(sequence + 1)
            );
        }

        #[test]
        fn prop_swap_preserves_capacities_across_pair(
            raw_a in 0usize..8192,
            raw_b in 0usize..8192,
            depth in 0usize..2048,
        ) {
            let mut a = FrameBuffer::allocate(raw_a, 0, depth, 0, 0, 0).unwrap();
            let mut b = FrameBuffer::allocate(raw_b, 0, depth, 0, 0, 0).unwrap();
            prop_assert!(a.set_raw_len(raw_a));

            a.swap_buffers_only(&mut b);
            prop_assert_eq!(a.raw_capacity(), raw_b);
            prop_assert_eq!(b.raw_capacity(), raw_a);
            prop_assert!(a.raw().len() <= a.raw_capacity());

            a.swap_buffers_only(&mut b);
            prop_assert_eq!(a.layout(), (raw_a, depth, 0));
        }
    }

    #[test]
    fn stream_kind_display() {
        assert_eq!(StreamKind::Color.to_string(), "color");
        assert_eq!(StreamKind::Depth.as_str(), "depth");
    }
}
