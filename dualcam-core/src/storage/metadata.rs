use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::error::MetadataError;
use crate::models::recording_result::RecordingMetadata;

/// Sidecar location for a recording: `{recording_path}.metadata.json`.
pub fn metadata_path(recording_path: &Path) -> PathBuf {
    let mut name = OsString::from(recording_path.as_os_str());
    name.push(".metadata.json");
    PathBuf::from(name)
}

/// Write stream metadata as a JSON sidecar next to the recording.
pub fn write_metadata(metadata: &RecordingMetadata, recording_path: &Path) -> Result<PathBuf, MetadataError> {
    let path = metadata_path(recording_path);
    let json = serde_json::to_string_pretty(metadata).map_err(|e| MetadataError::Serialize(e.to_string()))?;
    fs::write(&path, json).map_err(|e| MetadataError::Io(e.to_string()))?;
    Ok(path)
}

/// Read stream metadata from a JSON sidecar.
pub fn read_metadata(recording_path: &Path) -> Result<RecordingMetadata, MetadataError> {
    let json = fs::read_to_string(metadata_path(recording_path)).map_err(|e| MetadataError::Io(e.to_string()))?;
    serde_json::from_str(&json).map_err(|e| MetadataError::Parse(e.to_string()))
}
