//! Test doubles shared by the unit tests.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::diagnostics::DropReason;
use crate::models::error::{CompositorError, RecordingError};
use crate::models::layout::Layout;
use crate::models::media::{Frame, StreamKind};
use crate::models::recording_result::{OutputHandle, RecordingOutputs};
use crate::models::state::RecordingState;
use crate::traits::compositor::Compositor;
use crate::traits::recording_delegate::RecordingDelegate;
use crate::traits::writable::Writable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    Open,
    /// The first `n` writes succeed, every later one fails.
    WriteAfter(usize),
    Close,
}

#[derive(Debug, Default)]
struct FailingState {
    writes: usize,
    bytes: Vec<u8>,
    discarded: bool,
}

/// In-memory target that fails at a chosen point.
#[derive(Clone)]
pub struct FailingTarget {
    label: String,
    failure: FailurePoint,
    state: Arc<Mutex<FailingState>>,
}

impl FailingTarget {
    pub fn new(label: &str, failure: FailurePoint) -> Self {
        Self {
            label: label.into(),
            failure,
            state: Arc::new(Mutex::new(FailingState::default())),
        }
    }

    pub fn was_discarded(&self) -> bool {
        self.state.lock().discarded
    }

    pub fn contents(&self) -> Vec<u8> {
        self.state.lock().bytes.clone()
    }
}

fn injected() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "injected failure")
}

impl Writable for FailingTarget {
    fn open(&mut self) -> io::Result<()> {
        if self.failure == FailurePoint::Open {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only location"));
        }
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if let FailurePoint::WriteAfter(limit) = self.failure {
            if state.writes >= limit {
                return Err(injected());
            }
        }
        state.writes += 1;
        state.bytes.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if self.failure == FailurePoint::Close {
            return Err(injected());
        }
        Ok(())
    }

    fn discard(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        state.bytes.clear();
        state.discarded = true;
        Ok(())
    }

    fn handle(&self) -> OutputHandle {
        OutputHandle::Memory(self.label.clone())
    }
}

/// Wraps a compositor and delays every call.
pub struct SlowCompositor<C> {
    inner: C,
    delay: Duration,
    started: Option<flume::Sender<()>>,
}

impl<C: Compositor> SlowCompositor<C> {
    pub fn new(inner: C, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            started: None,
        }
    }

    /// Signal `started` each time a composition begins.
    pub fn notify_on_start(mut self, started: flume::Sender<()>) -> Self {
        self.started = Some(started);
        self
    }
}

impl<C: Compositor> Compositor for SlowCompositor<C> {
    fn compose(&self, front: &Frame, back: &Frame, layout: &Layout) -> Result<Frame, CompositorError> {
        if let Some(started) = &self.started {
            let _ = started.send(());
        }
        thread::sleep(self.delay);
        self.inner.compose(front, back, layout)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    State(&'static str),
    Dropped(DropReason),
    StreamFailed(StreamKind),
    Finished,
}

/// Delegate that records every callback.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn states(&self) -> Vec<&'static str> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::State(name) => Some(name),
                _ => None,
            })
            .collect()
    }
}

impl RecordingDelegate for EventLog {
    fn on_state_changed(&self, state: &RecordingState) {
        self.events.lock().push(Event::State(state.name()));
    }

    fn on_composite_dropped(&self, reason: &DropReason) {
        self.events.lock().push(Event::Dropped(reason.clone()));
    }

    fn on_stream_failed(&self, stream: StreamKind, _error: &RecordingError) {
        self.events.lock().push(Event::StreamFailed(stream));
    }

    fn on_recording_finished(&self, _outputs: &RecordingOutputs) {
        self.events.lock().push(Event::Finished);
    }
}
