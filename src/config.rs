//! Router configuration
//!
//! [`RouterConfig`] holds the immutable per-session values applied to every
//! pooled buffer (dimensions, device type, ZD table) and the router tunables
//! (pool size, retry policy, statistics cadence, queue depths). It can be built
//! in code or loaded from YAML:
//!
//! ```rust
//! use ilm_router::RouterConfig;
//!
//! let config = RouterConfig::from_yaml_str(
//!     r#"
//! width: 1280
//! height: 720
//! dev_type: 5
//! depth_format: 0x1B
//! max_consecutive_failures: 20
//! "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.pool_size, 4);
//! assert_eq!(config.layout().raw_capacity, 1280 * 720 * 2);
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{FrameLayout, SessionParams};
use crate::{Result, RouterError};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_DEPTH_FORMAT: u32 = 0x1A;
const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_TRANSIENT_BACKOFF_MS: u64 = 10;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 100;
const DEFAULT_STATS_INTERVAL: u64 = 100;
const DEFAULT_QUEUE_CAPACITY: usize = 2;

/// Bytes per pixel of an interleaved raw frame (YUYV color or 16-bit depth).
const RAW_BYTES_PER_PIXEL: usize = 2;
const RGB_BYTES_PER_PIXEL: usize = 3;

/// Session and router settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    /// Frame width in pixels (color width must equal depth width in interleave mode)
    pub width: u32,
    pub height: u32,

    /// Device type tag copied into every frame
    pub dev_type: u16,

    /// Format code tagged on color frames
    pub color_format: u32,

    /// Format code tagged on depth frames
    pub depth_format: u32,

    /// ZD lookup table contents, shared by every pooled buffer
    pub zd_table: Vec<u8>,

    /// Buffers in the shared free pool
    pub pool_size: usize,

    /// Raw payload capacity in bytes; defaults to width * height * 2
    pub raw_capacity: Option<usize>,
    /// Decoded depth capacity in samples; defaults to width * height
    pub depth_capacity: Option<usize>,
    /// RGB payload capacity in bytes; defaults to width * height * 3
    pub rgb_capacity: Option<usize>,

    pub raw_fill: u8,
    pub depth_fill: u16,
    pub rgb_fill: u8,

    /// Delay before retrying after a transient read failure
    pub transient_backoff_ms: u64,

    /// Consecutive transient failures that end the session
    pub max_consecutive_failures: u32,

    /// Routed frames between periodic statistics summaries
    pub stats_interval: u64,

    pub color_queue_capacity: usize,
    pub depth_queue_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            dev_type: 0,
            color_format: 0,
            depth_format: DEFAULT_DEPTH_FORMAT,
            zd_table: Vec::new(),
            pool_size: DEFAULT_POOL_SIZE,
            raw_capacity: None,
            depth_capacity: None,
            rgb_capacity: None,
            raw_fill: 0,
            depth_fill: 0,
            rgb_fill: 0,
            transient_backoff_ms: DEFAULT_TRANSIENT_BACKOFF_MS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            stats_interval: DEFAULT_STATS_INTERVAL,
            color_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            depth_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl RouterConfig {
    /// Configuration for the given frame size, everything else default.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, ..Self::default() }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: RouterConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|source| RouterError::ConfigFile { path: path.to_path_buf(), source })?;
        debug!("Loaded router configuration from {}", path.display());
        Self::from_yaml_str(&yaml)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 {
            return Err(RouterError::config("width", "must be non-zero"));
        }
        if self.height == 0 {
            return Err(RouterError::config("height", "must be non-zero"));
        }
        if self.pool_size == 0 {
            return Err(RouterError::config("pool_size", "must hold at least one buffer"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(RouterError::config("max_consecutive_failures", "must be non-zero"));
        }
        if self.stats_interval == 0 {
            return Err(RouterError::config("stats_interval", "must be non-zero"));
        }
        if self.color_queue_capacity == 0 {
            return Err(RouterError::config("color_queue_capacity", "must be non-zero"));
        }
        if self.depth_queue_capacity == 0 {
            return Err(RouterError::config("depth_queue_capacity", "must be non-zero"));
        }
        if self.raw_capacity == Some(0) {
            return Err(RouterError::config("raw_capacity", "frames need raw storage"));
        }
        if self.pixels().is_none() {
            return Err(RouterError::config("width", "frame size overflows"));
        }
        Ok(())
    }

    fn pixels(&self) -> Option<usize> {
        (self.width as usize).checked_mul(self.height as usize)
    }

    /// Capacities and fill values for pooled buffers.
    pub fn layout(&self) -> FrameLayout {
        let pixels = self.pixels().unwrap_or(0);
        FrameLayout {
            raw_capacity: self
                .raw_capacity
                .unwrap_or_else(|| pixels.saturating_mul(RAW_BYTES_PER_PIXEL)),
            raw_fill: self.raw_fill,
            depth_capacity: self.depth_capacity.unwrap_or(pixels),
            depth_fill: self.depth_fill,
            rgb_capacity: self
                .rgb_capacity
                .unwrap_or_else(|| pixels.saturating_mul(RGB_BYTES_PER_PIXEL)),
            rgb_fill: self.rgb_fill,
        }
    }

    /// Per-session values stamped onto pooled buffers.
    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            width: self.width,
            height: self.height,
            dev_type: self.dev_type,
            zd_table: Arc::from(self.zd_table.as_slice()),
        }
    }

    pub fn transient_backoff(&self) -> Duration {
        Duration::from_millis(self.transient_backoff_ms)
    }
}
