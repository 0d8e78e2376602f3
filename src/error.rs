//! Error types for frame acquisition and routing.
//!
//! All errors implement `std::error::Error` and carry enough context to decide
//! whether the failed operation can be retried.
//!
//! ## Error Categories
//!
//! - **Allocation Errors**: Page-aligned payload storage could not be reserved
//! - **Device Errors**: Transient or fatal failures reported by a [`FrameSource`]
//! - **Lifecycle Errors**: Router operations issued in the wrong state
//! - **Configuration Errors**: Invalid or unreadable session configuration
//!
//! Channel shutdown is not an error in this taxonomy. Bounded channels report
//! it through [`ChannelError::Stopped`](crate::channel::ChannelError) and the
//! router treats it as a clean exit.
//!
//! ```rust
//! use ilm_router::RouterError;
//!
//! let error = RouterError::out_of_memory(4096);
//! if !error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```
//!
//! [`FrameSource`]: crate::source::FrameSource

use std::path::PathBuf;
use thiserror::Error;

use crate::router::RouterState;

/// Result type alias for router operations.
pub type Result<T, E = RouterError> = std::result::Result<T, E>;

/// Failure classification for a single device read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// Expected to clear on retry (timeouts, short transfers, dropped packets).
    #[error("transient read failure: {reason}")]
    Transient { reason: String },

    /// The device or session cannot continue.
    #[error("fatal read failure: {reason}")]
    Fatal { reason: String },
}

impl ReadError {
    /// Helper constructor for transient failures.
    pub fn transient(reason: impl Into<String>) -> Self {
        ReadError::Transient { reason: reason.into() }
    }

    /// Helper constructor for fatal failures.
    pub fn fatal(reason: impl Into<String>) -> Self {
        ReadError::Fatal { reason: reason.into() }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ReadError::Transient { .. })
    }
}

/// Main error type for router operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouterError {
    #[error("Failed to allocate {requested} bytes of page-aligned frame storage")]
    OutOfMemory { requested: usize },

    #[error("Device read failed")]
    Device {
        #[source]
        source: ReadError,
    },

    #[error("Cannot {operation} while router is {state:?}")]
    InvalidState { operation: &'static str, state: RouterState },

    #[error("Invalid configuration for '{field}': {reason}")]
    Config { field: &'static str, reason: String },

    #[error("Failed to parse router configuration")]
    ConfigParse {
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("Configuration file error: {path}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn reader thread")]
    ThreadSpawn {
        #[source]
        source: std::io::Error,
    },
}

impl RouterError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            RouterError::OutOfMemory { .. } => false,
            RouterError::Device { source } => source.is_transient(),
            RouterError::InvalidState { .. } => false,
            RouterError::Config { .. } => false,
            RouterError::ConfigParse { .. } => false,
            RouterError::ConfigFile { .. } => false,
            RouterError::ThreadSpawn { .. } => true,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            RouterError::OutOfMemory { .. } => vec![
                "Reduce frame resolution or payload capacities",
                "Reduce the shared pool size",
                "Check process memory limits",
            ],
            RouterError::Device { source } if source.is_transient() => vec![
                "Retry the read after a short backoff",
                "Check USB cable and hub bandwidth",
            ],
            RouterError::Device { .. } => vec![
                "Reopen the device and construct a new router",
                "Check that the camera is still attached",
                "Verify the firmware supports interleave mode",
            ],
            RouterError::InvalidState { .. } => vec![
                "Construct a new router after a stop",
                "Call start() only once per router",
            ],
            RouterError::Config { .. } | RouterError::ConfigParse { .. } => vec![
                "Check field names and value ranges",
                "Compare against the documented defaults",
            ],
            RouterError::ConfigFile { .. } => vec![
                "Check file exists and is readable",
                "Check file permissions",
            ],
            RouterError::ThreadSpawn { .. } => vec![
                "Check process thread limits",
                "Retry once other sessions have shut down",
            ],
        }
    }

    /// Helper constructor for allocation failures.
    pub fn out_of_memory(requested: usize) -> Self {
        RouterError::OutOfMemory { requested }
    }

    /// Helper constructor for configuration errors.
    pub fn config(field: &'static str, reason: impl Into<String>) -> Self {
        RouterError::Config { field, reason: reason.into() }
    }

    /// Helper constructor for lifecycle errors.
    pub fn invalid_state(operation: &'static str, state: RouterState) -> Self {
        RouterError::InvalidState { operation, state }
    }
}

impl From<ReadError> for RouterError {
    fn from(source: ReadError) -> Self {
        RouterError::Device { source }
    }
}

impl From<serde_yaml_ng::Error> for RouterError {
    fn from(source: serde_yaml_ng::Error) -> Self {
        RouterError::ConfigParse { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            reason in ".*",
            requested in 0usize..usize::MAX / 2,
          ) {
            let oom = RouterError::out_of_memory(requested);
            prop_assert!(oom.to_string().contains(&requested.to_string()));

            let transient = ReadError::transient(reason.clone());
            prop_assert!(transient.to_string().contains(&reason));

            let cfg = RouterError::config("pool_size", reason.clone());
            let msg = cfg.to_string();
            prop_assert!(msg.contains("pool_size"));
            prop_assert!(msg.contains(&reason));
          }

          #[test]
          fn device_errors_inherit_read_classification(reason in ".*", transient in any::<bool>()) {
            let read = if transient {
                ReadError::transient(reason)
            } else {
                ReadError::fatal(reason)
            };
            let err: RouterError = read.into();
            prop_assert_eq!(err.is_retryable(), transient);
            prop_assert!(std::error::Error::source(&err).is_some());
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<RouterError>();
        assert_send_sync_static::<ReadError>();

        let error = RouterError::out_of_memory(1);
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn recovery_methods_work() {
        let errors = [
            RouterError::out_of_memory(4096),
            ReadError::fatal("unplugged").into(),
            ReadError::transient("timeout").into(),
            RouterError::invalid_state("start", RouterState::Stopped),
            RouterError::config("width", "must be non-zero"),
        ];

        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            for suggestion in suggestions {
                assert!(suggestion.len() > 5);
            }
        }

        assert!(!errors[0].is_retryable());
        assert!(!errors[1].is_retryable());
        assert!(errors[2].is_retryable());
    }

    #[test]
    fn yaml_errors_convert_to_config_parse() {
        let yaml_err = serde_yaml_ng::from_str::<u32>("[not, a, number]").unwrap_err();
        let err: RouterError = yaml_err.into();
        assert!(matches!(err, RouterError::ConfigParse { .. }));
    }
}
