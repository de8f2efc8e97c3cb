use super::error::RecordingError;

/// Coordinator lifecycle.
///
/// State transitions:
/// ```text
/// idle → configuring → ready → writing → draining → finalizing → closed
///   ↑                                                               │
///   └────────────── configure() again from closed / failed ─────────┘
/// (any) → failed
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingState {
    Idle,
    Configuring,
    Ready,
    Writing,
    Draining,
    Finalizing,
    Closed,
    Failed(RecordingError),
}

impl RecordingState {
    pub fn is_writing(&self) -> bool {
        matches!(self, Self::Writing)
    }

    /// A session exists: writing, or stopping but not yet closed.
    pub fn has_session(&self) -> bool {
        matches!(self, Self::Writing | Self::Draining | Self::Finalizing)
    }

    /// States from which `configure` may run.
    pub fn accepts_configure(&self) -> bool {
        matches!(self, Self::Idle | Self::Ready | Self::Closed | Self::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Configuring => "configuring",
            Self::Ready => "ready",
            Self::Writing => "writing",
            Self::Draining => "draining",
            Self::Finalizing => "finalizing",
            Self::Closed => "closed",
            Self::Failed(_) => "failed",
        }
    }
}

/// Lifecycle of one `StreamEncoder`.
///
/// ```text
/// idle → writing → finishing → closed
///   └───────┴──────────┴─────→ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Idle,
    Writing,
    Finishing,
    Closed,
    Failed,
}

impl EncoderState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Writing => "writing",
            Self::Finishing => "finishing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}
