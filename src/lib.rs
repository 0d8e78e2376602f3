//! Interleave-mode frame routing for depth cameras.
//!
//! Some depth cameras deliver color and depth frames interleaved on a single USB
//! endpoint. This crate reads that endpoint on one dedicated thread, routes each
//! frame to a color or depth queue by the parity of its sequence number, and
//! recycles a fixed pool of page-aligned frame buffers between reader and
//! consumers.
//!
//! # Features
//!
//! - **Parity routing**: odd sequence numbers are color, even are depth
//! - **Bounded memory**: a fixed shared free pool, blocking backpressure
//! - **Zero-copy hand-off**: buffers move between threads, payloads swap in O(1)
//! - **Resilient reads**: transient failures retry with backoff up to a ceiling
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ilm_router::{InterleaveSession, RouterConfig, StreamKind};
//! use ilm_router::providers::SyntheticSource;
//!
//! fn main() -> ilm_router::Result<()> {
//!     let config = RouterConfig::new(640, 480);
//!     let mut session = InterleaveSession::open(SyntheticSource::new(640, 480, 30.0), config)?;
//!
//!     let depth = session.consumer(StreamKind::Depth)?.expect("depth consumer");
//!     let handle = std::thread::spawn(move || {
//!         depth.run(|frame| println!("depth frame {} ({} bytes)", frame.sequence, frame.raw().len()))
//!     });
//!
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//!     session.shutdown();
//!     let _ = handle.join();
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod channel;
pub mod config;
mod error;
pub mod stats;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Routing pipeline
pub mod consumer;
pub mod providers;
pub mod router;
pub mod session;
pub mod source;
pub mod stream;

// Core exports
pub use channel::{BoundedChannel, ChannelError, SendError};
pub use config::RouterConfig;
pub use error::*;
pub use stats::StatsSnapshot;
pub use types::*;

// Pipeline exports
pub use consumer::FrameConsumer;
pub use router::{ExitReason, FrameQueue, FrameRouter, RouterState};
pub use session::InterleaveSession;
pub use source::{FrameRead, FrameSource, FromFn, from_fn};
pub use stream::FrameStream;
