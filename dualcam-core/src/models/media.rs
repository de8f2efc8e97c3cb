use std::fmt;
use std::ops::{Add, Sub};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Monotonic presentation timestamp with microsecond resolution.
///
/// Values come from the capture clock, never from wall-clock time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1_000_000.0).round() as i64)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0).max(0) as u64)
    }

    /// Halfway point between two timestamps, rounded towards `self`.
    pub fn midpoint(self, other: Timestamp) -> Timestamp {
        Timestamp(self.0 + (other.0 - self.0) / 2)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.as_micros() as i64))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(rhs.as_micros() as i64))
    }
}

/// Saturating difference: `later - earlier`, clamped at zero.
impl Sub<Timestamp> for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Timestamp) -> Duration {
        self.saturating_duration_since(rhs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    /// Bi-planar 4:2:0 as delivered by most camera sensors. Accepted by
    /// `Frame`, rejected by the recording pipeline.
    Nv12,
}

impl PixelFormat {
    /// Byte length of a `width` x `height` image in this format.
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Rgba8 | Self::Bgra8 => pixels * 4,
            Self::Nv12 => pixels + pixels / 2,
        }
    }

    /// Whether this is a packed 4-byte-per-pixel format the compositor and
    /// encoders accept.
    pub fn is_packed_32bit(self) -> bool {
        matches!(self, Self::Rgba8 | Self::Bgra8)
    }

    pub(crate) fn id(self) -> u8 {
        match self {
            Self::Rgba8 => 1,
            Self::Bgra8 => 2,
            Self::Nv12 => 3,
        }
    }

    pub(crate) fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Rgba8),
            2 => Some(Self::Bgra8),
            3 => Some(Self::Nv12),
            _ => None,
        }
    }
}

/// Physical camera a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    Front,
    Back,
}

/// Origin tag carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSource {
    Front,
    Back,
    /// Produced by the compositor from a front/back pair.
    Composite,
}

impl From<CameraPosition> for FrameSource {
    fn from(position: CameraPosition) -> Self {
        match position {
            CameraPosition::Front => Self::Front,
            CameraPosition::Back => Self::Back,
        }
    }
}

/// One of the three output streams of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Front,
    Back,
    Combined,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [StreamKind::Front, StreamKind::Back, StreamKind::Combined];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Back => "back",
            Self::Combined => "combined",
        }
    }

    pub(crate) fn id(self) -> u8 {
        match self {
            Self::Front => 0,
            Self::Back => 1,
            Self::Combined => 2,
        }
    }

    pub(crate) fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Front),
            1 => Some(Self::Back),
            2 => Some(Self::Combined),
            _ => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised when a frame or audio chunk is constructed from raw parts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame dimensions must be non-zero ({width}x{height})")]
    ZeroDimension { width: u32, height: u32 },

    #[error("buffer length {actual} does not match expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("audio payload of {len} bytes is not a whole number of {channels}-channel s16 frames")]
    PartialAudioFrame { len: usize, channels: u16 },
}

/// Returns a buffer's storage to the pool it was drawn from.
pub type BufferRecycleFn = Arc<dyn Fn(Vec<u8>) + Send + Sync + 'static>;

/// Owned pixel storage.
///
/// Either a plain heap buffer handed over by the frame source, or a buffer
/// drawn from a compositor pool that is returned to the pool on drop.
pub struct PixelBuffer {
    bytes: Vec<u8>,
    recycle: Option<BufferRecycleFn>,
}

impl PixelBuffer {
    pub fn owned(bytes: Vec<u8>) -> Self {
        Self { bytes, recycle: None }
    }

    pub(crate) fn pooled(bytes: Vec<u8>, recycle: BufferRecycleFn) -> Self {
        Self {
            bytes,
            recycle: Some(recycle),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_pooled(&self) -> bool {
        self.recycle.is_some()
    }
}

impl Clone for PixelBuffer {
    /// Clones detach from the pool: only the original returns its storage.
    fn clone(&self) -> Self {
        Self::owned(self.bytes.clone())
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        if let Some(recycle) = self.recycle.take() {
            recycle(std::mem::take(&mut self.bytes));
        }
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("len", &self.bytes.len())
            .field("pooled", &self.recycle.is_some())
            .finish()
    }
}

/// One decoded video image plus its presentation timestamp and origin.
///
/// Frames are single-owner values: the frame source moves each one into the
/// coordinator, which either writes it synchronously or retains it as the
/// composition partner. Platform buffers that are not safe to share must be
/// copied or wrapped into a `PixelBuffer` before crossing that boundary.
#[derive(Debug, Clone)]
pub struct Frame {
    data: PixelBuffer,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    timestamp: Timestamp,
    source: FrameSource,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        timestamp: Timestamp,
        source: FrameSource,
    ) -> Result<Self, FrameError> {
        Self::from_buffer(PixelBuffer::owned(data), width, height, pixel_format, timestamp, source)
    }

    pub fn from_buffer(
        data: PixelBuffer,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        timestamp: Timestamp,
        source: FrameSource,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimension { width, height });
        }
        let expected = pixel_format.buffer_len(width, height);
        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            pixel_format,
            timestamp,
            source,
        })
    }

    /// A frame of one repeated 4-byte pixel. Handy for tests and for
    /// placeholder output.
    pub fn solid(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        pixel: [u8; 4],
        timestamp: Timestamp,
        source: FrameSource,
    ) -> Result<Self, FrameError> {
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::new(data, width, height, pixel_format, timestamp, source)
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn source(&self) -> FrameSource {
        self.source
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// Re-stamp the frame, keeping its pixels.
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Pixel at (`x`, `y`) for 32-bit formats, in buffer byte order.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if !self.pixel_format.is_packed_32bit() || x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let px = &self.data()[offset..offset + 4];
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// PCM format of the combined stream's audio track (signed 16-bit LE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

impl AudioFormat {
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }
}

/// A block of interleaved s16le samples with its presentation timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    data: Vec<u8>,
    format: AudioFormat,
    timestamp: Timestamp,
    duration: Duration,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, format: AudioFormat, timestamp: Timestamp) -> Result<Self, FrameError> {
        let bytes_per_frame = format.bytes_per_frame();
        if bytes_per_frame == 0 || data.len() % bytes_per_frame != 0 {
            return Err(FrameError::PartialAudioFrame {
                len: data.len(),
                channels: format.channels,
            });
        }
        let sample_frames = (data.len() / bytes_per_frame) as u64;
        let duration = if format.sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(sample_frames * 1_000_000 / format.sample_rate as u64)
        };
        Ok(Self {
            data,
            format,
            timestamp,
            duration,
        })
    }

    /// Silence covering `duration` at `format`.
    pub fn silence(format: AudioFormat, timestamp: Timestamp, duration: Duration) -> Self {
        let sample_frames = (duration.as_micros() as u64 * format.sample_rate as u64 / 1_000_000) as usize;
        Self {
            data: vec![0; sample_frames * format.bytes_per_frame()],
            format,
            timestamp,
            duration,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}
