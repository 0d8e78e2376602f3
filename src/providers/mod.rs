//! In-crate frame sources
//!
//! - [`ScriptedSource`] replays a fixed list of read outcomes, for tests and fault drills
//! - [`SyntheticSource`] generates paced interleaved frames without hardware

pub mod scripted;
pub mod synthetic;

pub use scripted::{ScriptStep, ScriptedSource};
pub use synthetic::SyntheticSource;
