use thiserror::Error;

use super::media::StreamKind;

/// Setup-time errors from `RecordingCoordinator::configure`.
///
/// Non-retryable without a fresh configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{stream} target is not writable: {reason}")]
    TargetUnwritable { stream: StreamKind, reason: String },

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("{first} and {second} streams share the output target {target}")]
    DuplicateTarget {
        first: StreamKind,
        second: StreamKind,
        target: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("cannot configure while a recording session is active")]
    SessionActive,
}

/// Errors from starting, feeding, or stopping a recording.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordingError {
    #[error("a recording session is already active")]
    AlreadyActive,

    #[error("no recording session is active")]
    NotActive,

    #[error("recorder has not been configured")]
    NotConfigured,

    #[error("{stream} encoder failed to start: {reason}")]
    EncoderStartFailed { stream: StreamKind, reason: String },

    #[error("{0} encoder write failed: {1}")]
    EncoderWriteFailed(StreamKind, String),

    #[error("{0} encoder finalize failed: {1}")]
    EncoderFinalizeFailed(StreamKind, String),

    #[error("invalid sample: {0}")]
    InvalidSample(String),
}

impl RecordingError {
    /// Stream the error is scoped to, if any.
    pub fn stream(&self) -> Option<StreamKind> {
        match self {
            Self::EncoderStartFailed { stream, .. } => Some(*stream),
            Self::EncoderWriteFailed(stream, _) | Self::EncoderFinalizeFailed(stream, _) => Some(*stream),
            _ => None,
        }
    }
}

/// Errors from a single composition call. The coordinator treats every
/// variant as a dropped combined frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompositorError {
    #[error("compositor resources exhausted")]
    ResourceExhausted,

    #[error("invalid compositor input: {0}")]
    InvalidInput(String),

    #[error("image backend failed: {0}")]
    Backend(String),
}

/// Failures inside one `StreamEncoder`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncoderError {
    #[error("target I/O failed: {0}")]
    Io(String),

    #[error("operation not valid in encoder state {0}")]
    InvalidState(&'static str),

    #[error("sample at {pts_us}us precedes last written {last_us}us")]
    NonMonotonic { pts_us: i64, last_us: i64 },

    #[error("sample at {pts_us}us precedes session start {start_us}us")]
    BeforeSessionStart { pts_us: i64, start_us: i64 },

    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    #[error("stream has no audio track")]
    NoAudioTrack,
}

impl EncoderError {
    /// Whether the sample was rejected without harming the stream.
    pub fn is_sample_rejection(&self) -> bool {
        matches!(
            self,
            Self::NonMonotonic { .. } | Self::BeforeSessionStart { .. } | Self::FormatMismatch(_) | Self::NoAudioTrack
        )
    }
}

impl From<std::io::Error> for EncoderError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors while parsing a finalized container.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContainerError {
    #[error("not a recording container: {0}")]
    BadMagic(&'static str),

    #[error("unsupported container version {0}")]
    UnsupportedVersion(u16),

    #[error("container is truncated: {0}")]
    Truncated(&'static str),

    #[error("container is not finalized")]
    Unfinalized,

    #[error("corrupt container: {0}")]
    Corrupt(String),
}

/// Errors while reading or writing a metadata sidecar.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("failed to serialize metadata: {0}")]
    Serialize(String),

    #[error("metadata I/O failed: {0}")]
    Io(String),

    #[error("failed to parse metadata: {0}")]
    Parse(String),
}
