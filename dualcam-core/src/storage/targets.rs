use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::recording_result::OutputHandle;
use crate::traits::writable::Writable;

/// Output written to a file on disk.
///
/// Bytes go to a `<path>.partial` staging file that replaces `path` only
/// when `close` succeeds, so a discarded or failed recording never touches
/// a file already at `path`. The parent directory is created on `open`.
pub struct FileTarget {
    path: PathBuf,
    staging: PathBuf,
    file: Option<BufWriter<File>>,
    /// Whether this target created the staging file and still owns it.
    staged: bool,
}

impl FileTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut staging = path.clone().into_os_string();
        staging.push(".partial");
        Self {
            path,
            staging: staging.into(),
            file: None,
            staged: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file target is not open"))
    }
}

impl Writable for FileTarget {
    fn open(&mut self) -> io::Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.staging)?;
        self.staged = true;
        self.file = Some(BufWriter::new(file));
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.file()?.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        let Some(writer) = self.file.take() else {
            return Ok(());
        };
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.staging, &self.path)?;
        self.staged = false;
        Ok(())
    }

    fn discard(&mut self) -> io::Result<()> {
        self.file = None;
        if !self.staged {
            return Ok(());
        }
        self.staged = false;
        match fs::remove_file(&self.staging) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn handle(&self) -> OutputHandle {
        OutputHandle::File(self.path.clone())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    bytes: Vec<u8>,
    open: bool,
    closed: bool,
    discarded: bool,
}

/// Output collected in memory.
///
/// Clones share the same buffer, so a caller can keep one clone to inspect
/// what the recorder wrote into the other.
#[derive(Clone)]
pub struct MemoryTarget {
    label: String,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTarget {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Snapshot of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.state.lock().bytes.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_discarded(&self) -> bool {
        self.state.lock().discarded
    }
}

impl Writable for MemoryTarget {
    fn open(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.bytes.clear();
        state.open = true;
        state.closed = false;
        state.discarded = false;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "memory target is not open"));
        }
        state.bytes.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.open = false;
        state.closed = true;
        Ok(())
    }

    fn discard(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.bytes.clear();
        state.open = false;
        state.discarded = true;
        Ok(())
    }

    fn handle(&self) -> OutputHandle {
        OutputHandle::Memory(self.label.clone())
    }
}
