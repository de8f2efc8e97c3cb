//! # dualcam-core
//!
//! Synchronized multi-writer recording core for dual-camera capture.
//!
//! Accepts timestamped front and back camera frames plus one audio stream
//! from independent delivery threads and records three outputs: front
//! only, back only, and a composite of both with the audio track. Camera
//! backends and persistence live outside this crate; they hand frames to
//! the `RecordingCoordinator` and supply `Writable` output targets.
//!
//! ## Architecture
//!
//! ```text
//! dualcam-core (this crate)
//! ├── traits/       ← Writable, Compositor, ImageBackend, RecordingDelegate
//! ├── models/       ← Timestamp, Frame, AudioChunk, RecordingConfiguration, errors, states, outputs
//! ├── processing/   ← layout geometry, FramePool, SoftwareBackend, TransformCompositor
//! ├── storage/      ← container format, StreamEncoder, FileTarget / MemoryTarget, metadata sidecar
//! └── session/      ← RecordingCoordinator, CompositionCache, ComposeWorker, sync policy
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types at crate root for convenience.
pub use models::config::{FrameSize, RecordingConfiguration, TimestampAnchor};
pub use models::diagnostics::{DropReason, RecordingDiagnostics};
pub use models::error::{CompositorError, ConfigError, ContainerError, EncoderError, MetadataError, RecordingError};
pub use models::layout::{Corner, Layout};
pub use models::media::{
    AudioChunk, AudioFormat, CameraPosition, Frame, FrameError, FrameSource, PixelBuffer, PixelFormat, StreamKind,
    Timestamp,
};
pub use models::recording_result::{OutputHandle, RecordingMetadata, RecordingOutputs, StreamOutput};
pub use models::state::{EncoderState, RecordingState};
pub use processing::frame_pool::FramePool;
pub use processing::software_backend::SoftwareBackend;
pub use processing::transform_compositor::TransformCompositor;
pub use session::coordinator::RecordingCoordinator;
pub use storage::container::ContainerReader;
pub use storage::stream_encoder::StreamEncoder;
pub use storage::targets::{FileTarget, MemoryTarget};
pub use traits::compositor::{Compositor, ImageBackend};
pub use traits::recording_delegate::RecordingDelegate;
pub use traits::writable::Writable;
