use std::io;

use crate::models::recording_result::OutputHandle;

/// An output location for one stream: a file, an in-memory buffer, or a
/// network sink. The core never assumes a filesystem.
///
/// Writes are append-only; the container format never seeks back.
/// Implemented by:
/// - `FileTarget`
/// - `MemoryTarget`
pub trait Writable: Send {
    /// Claim the location (create the file, connect the sink).
    ///
    /// Called from `configure`; a failure here surfaces as
    /// `ConfigError::TargetUnwritable`.
    fn open(&mut self) -> io::Result<()>;

    /// Append bytes.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Release the location after the stream has been finalized.
    fn close(&mut self) -> io::Result<()>;

    /// Remove anything written so far. Best-effort; callers log failures.
    fn discard(&mut self) -> io::Result<()>;

    /// Identity of the location, used for duplicate detection and returned
    /// to the caller on success.
    fn handle(&self) -> OutputHandle;
}
