use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::layout::Layout;
use super::media::{AudioFormat, PixelFormat, StreamKind};

/// Lowest accepted target bitrate (100 kbit/s).
pub const MIN_BITRATE: u32 = 100_000;

/// Highest accepted target bitrate (200 Mbit/s).
pub const MAX_BITRATE: u32 = 200_000_000;

/// Width and height of a video stream in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<(u32, u32)> for FrameSize {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Which timestamp a composed frame is written at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampAnchor {
    /// The Back frame that triggered the composition.
    #[default]
    Back,
    /// Midpoint of the cached Front frame and the Back frame.
    PairAverage,
}

/// Configuration for a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfiguration {
    /// Output resolution of the combined stream, and of the camera streams
    /// unless overridden below (default: 1920x1080).
    pub frame_size: FrameSize,

    /// Resolution the front camera delivers, when it differs from
    /// `frame_size`.
    pub front_size: Option<FrameSize>,

    /// Resolution the back camera delivers, when it differs from
    /// `frame_size`.
    pub back_size: Option<FrameSize>,

    /// Target video bitrate in bits per second (default: 10 Mbit/s).
    pub bitrate: u32,

    /// Nominal capture rate; one frame interval bounds composition latency
    /// (default: 30).
    pub frame_rate: u32,

    /// Pixel format delivered by both cameras (default: BGRA).
    pub pixel_format: PixelFormat,

    /// Arrangement of the combined stream.
    pub layout: Layout,

    /// Mirror the front camera inside the combined stream (default: true).
    pub mirror_front: bool,

    pub timestamp_anchor: TimestampAnchor,

    /// Audio track format of the combined stream.
    pub audio: AudioFormat,

    /// Number of reusable composition output buffers (default: 3).
    pub pool_size: usize,

    /// How long composition waits for a free pool buffer.
    pub pool_wait_ms: u64,

    /// Upper bound on how long `stop` waits for in-flight compositions.
    pub drain_timeout_ms: u64,

    /// Write `<file>.metadata.json` next to file outputs after finalize.
    pub write_metadata_sidecars: bool,
}

impl RecordingConfiguration {
    pub fn new(frame_size: impl Into<FrameSize>, bitrate: u32, layout: Layout) -> Self {
        Self {
            frame_size: frame_size.into(),
            bitrate,
            layout,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let FrameSize { width, height } = self.frame_size;
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidConfiguration(format!(
                "frame size must be non-zero, got {}x{}",
                width, height
            )));
        }
        if width % 2 != 0 || height % 2 != 0 {
            return Err(ConfigError::UnsupportedFormat(format!(
                "frame dimensions must be even, got {}x{}",
                width, height
            )));
        }
        if !(MIN_BITRATE..=MAX_BITRATE).contains(&self.bitrate) {
            return Err(ConfigError::UnsupportedFormat(format!("unsupported bitrate: {}", self.bitrate)));
        }
        if !self.pixel_format.is_packed_32bit() {
            return Err(ConfigError::UnsupportedFormat(format!(
                "unsupported pixel format: {:?}",
                self.pixel_format
            )));
        }
        if !(1..=240).contains(&self.frame_rate) {
            return Err(ConfigError::InvalidConfiguration(format!(
                "frame rate must be within 1..=240, got {}",
                self.frame_rate
            )));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidConfiguration("pool size must be at least 1".into()));
        }
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::UnsupportedFormat("audio sample rate must be positive".into()));
        }
        if ![1, 2].contains(&self.audio.channels) {
            return Err(ConfigError::UnsupportedFormat(format!(
                "unsupported audio channel count: {}",
                self.audio.channels
            )));
        }
        for (kind, size) in [(StreamKind::Front, self.front_size), (StreamKind::Back, self.back_size)] {
            if let Some(size) = size {
                if size.width == 0 || size.height == 0 {
                    return Err(ConfigError::InvalidConfiguration(format!(
                        "{} camera size must be non-zero, got {}x{}",
                        kind, size.width, size.height
                    )));
                }
            }
        }
        self.layout.validate().map_err(ConfigError::InvalidConfiguration)?;
        Ok(())
    }

    /// Frame size every frame written to `stream` must have.
    pub fn stream_size(&self, stream: StreamKind) -> FrameSize {
        match stream {
            StreamKind::Front => self.front_size.unwrap_or(self.frame_size),
            StreamKind::Back => self.back_size.unwrap_or(self.frame_size),
            StreamKind::Combined => self.frame_size,
        }
    }

    /// Time budget for one composed frame.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.frame_rate.max(1) as u64)
    }

    pub fn pool_wait(&self) -> Duration {
        Duration::from_millis(self.pool_wait_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidConfiguration(format!("bad configuration: {}", e)))
    }
}

impl Default for RecordingConfiguration {
    fn default() -> Self {
        Self {
            frame_size: FrameSize::new(1920, 1080),
            front_size: None,
            back_size: None,
            bitrate: 10_000_000,
            frame_rate: 30,
            pixel_format: PixelFormat::Bgra8,
            layout: Layout::default(),
            mirror_front: true,
            timestamp_anchor: TimestampAnchor::Back,
            audio: AudioFormat::default(),
            pool_size: 3,
            pool_wait_ms: 5,
            drain_timeout_ms: 2_000,
            write_metadata_sidecars: false,
        }
    }
}
