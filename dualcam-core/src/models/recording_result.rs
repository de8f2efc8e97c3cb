use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::diagnostics::RecordingDiagnostics;
use super::error::RecordingError;
use super::layout::Layout;
use super::media::{PixelFormat, StreamKind, Timestamp};

/// Where a finalized stream ended up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputHandle {
    File(PathBuf),
    Memory(String),
}

impl OutputHandle {
    pub fn as_path(&self) -> Option<&PathBuf> {
        match self {
            Self::File(path) => Some(path),
            Self::Memory(_) => None,
        }
    }
}

impl fmt::Display for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::Memory(label) => write!(f, "memory:{}", label),
        }
    }
}

/// One successfully finalized stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutput {
    pub kind: StreamKind,
    pub handle: OutputHandle,
    pub session_start: Timestamp,
    pub session_end: Timestamp,
    pub duration_secs: f64,
    pub video_frames: u64,
    pub audio_chunks: u64,
    pub bytes_written: u64,
    pub checksum: String,
    pub metadata: RecordingMetadata,
}

/// Metadata describing a finalized stream.
///
/// Serializable for the JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub recording_id: String,
    pub stream: StreamKind,
    pub target: String,
    pub created_at: String,
    pub duration_secs: f64,
    pub session_start_us: i64,
    pub session_end_us: i64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub bitrate: u32,
    pub video_frames: u64,
    pub audio_chunks: u64,
    pub checksum: String,
    pub layout: Option<Layout>,
}

/// Per-stream outcome of `RecordingCoordinator::stop`.
///
/// Each stream succeeds or fails on its own; deciding whether a partial
/// result is acceptable is up to the caller.
#[derive(Debug, Clone)]
pub struct RecordingOutputs {
    pub recording_id: String,
    pub recording_start: Timestamp,
    pub front: Result<StreamOutput, RecordingError>,
    pub back: Result<StreamOutput, RecordingError>,
    pub combined: Result<StreamOutput, RecordingError>,
    pub diagnostics: RecordingDiagnostics,
}

impl RecordingOutputs {
    pub fn get(&self, kind: StreamKind) -> &Result<StreamOutput, RecordingError> {
        match kind {
            StreamKind::Front => &self.front,
            StreamKind::Back => &self.back,
            StreamKind::Combined => &self.combined,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        StreamKind::ALL.iter().all(|kind| self.get(*kind).is_ok())
    }

    pub fn failed_streams(&self) -> Vec<StreamKind> {
        StreamKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.get(*kind).is_err())
            .collect()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &StreamOutput> {
        [&self.front, &self.back, &self.combined]
            .into_iter()
            .filter_map(|result| result.as_ref().ok())
    }
}
