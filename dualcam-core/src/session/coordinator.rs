use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::config::{FrameSize, RecordingConfiguration, TimestampAnchor};
use crate::models::diagnostics::{DropReason, RecordingDiagnostics};
use crate::models::error::{CompositorError, ConfigError, EncoderError, RecordingError};
use crate::models::layout::Layout;
use crate::models::media::{AudioChunk, Frame, StreamKind, Timestamp};
use crate::models::recording_result::{RecordingMetadata, RecordingOutputs, StreamOutput};
use crate::models::state::{EncoderState, RecordingState};
use crate::processing::software_backend::SoftwareBackend;
use crate::processing::transform_compositor::TransformCompositor;
use crate::session::compose_worker::ComposeWorker;
use crate::session::composition_cache::CompositionCache;
use crate::session::sync::composite_timestamp;
use crate::storage::metadata::write_metadata;
use crate::storage::stream_encoder::{EncoderSettings, FinishedStream, StreamEncoder};
use crate::traits::compositor::Compositor;
use crate::traits::recording_delegate::RecordingDelegate;
use crate::traits::writable::Writable;

struct EncoderSet {
    front: StreamEncoder,
    back: StreamEncoder,
    combined: StreamEncoder,
}

impl EncoderSet {
    fn get_mut(&mut self, kind: StreamKind) -> &mut StreamEncoder {
        match kind {
            StreamKind::Front => &mut self.front,
            StreamKind::Back => &mut self.back,
            StreamKind::Combined => &mut self.combined,
        }
    }

    fn abort_all(&mut self) {
        self.front.abort();
        self.back.abort();
        self.combined.abort();
    }
}

/// One recording, from `start` until `stop` takes its encoders.
struct Session {
    recording_id: String,
    start: Timestamp,
    config: RecordingConfiguration,
}

/// A back frame handed to the compose worker, with what is needed to
/// commit the result.
struct PendingComposite {
    front: Arc<Frame>,
    back: Arc<Frame>,
    layout: Layout,
    anchor: TimestampAnchor,
    output: FrameSize,
    budget: Duration,
    generation: u64,
}

#[derive(Clone, Copy)]
enum Sample<'a> {
    Video(&'a Frame),
    Audio(&'a AudioChunk),
}

enum WriteOutcome {
    Written,
    /// Out of order or before the session start; nothing written.
    Rejected,
    /// The encoder already failed.
    Skipped,
}

/// Delegate callbacks collected under the lock, delivered after it is
/// released.
enum Notification {
    State(RecordingState),
    CompositeDropped(DropReason),
    StreamFailed(StreamKind, RecordingError),
    Finished(Box<RecordingOutputs>),
}

/// All mutable coordinator state. Only ever touched through the one mutex.
struct CoordinatorInner {
    state: RecordingState,
    config: Option<RecordingConfiguration>,
    encoders: Option<EncoderSet>,
    session: Option<Session>,
    active: bool,
    /// Bumped at every start and at finalize; composites from an older
    /// generation are discarded.
    generation: u64,
    in_flight: usize,
    cache: CompositionCache,
    diagnostics: RecordingDiagnostics,
}

impl CoordinatorInner {
    fn new() -> Self {
        Self {
            state: RecordingState::Idle,
            config: None,
            encoders: None,
            session: None,
            active: false,
            generation: 0,
            in_flight: 0,
            cache: CompositionCache::new(),
            diagnostics: RecordingDiagnostics::default(),
        }
    }

    fn set_state(&mut self, state: RecordingState, notes: &mut Vec<Notification>) {
        log::info!("Recording state: {} -> {}", self.state.name(), state.name());
        self.state = state.clone();
        notes.push(Notification::State(state));
    }

    /// Whether appends should write. Appending before any configure is a
    /// protocol error; appending outside a session is a no-op.
    fn accepting(&self) -> Result<bool, RecordingError> {
        if self.config.is_none() {
            return Err(RecordingError::NotConfigured);
        }
        Ok(self.active)
    }

    fn check_frame(&self, stream: StreamKind, frame: &Frame) -> Result<(), RecordingError> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        if frame.pixel_format() != session.config.pixel_format {
            return Err(RecordingError::InvalidSample(format!(
                "{:?} frame from {:?} camera, recording expects {:?}",
                frame.pixel_format(),
                frame.source(),
                session.config.pixel_format
            )));
        }
        let size = session.config.stream_size(stream);
        if (frame.width(), frame.height()) != (size.width, size.height) {
            return Err(RecordingError::InvalidSample(format!(
                "{}x{} frame on the {} stream, recording expects {}x{}",
                frame.width(),
                frame.height(),
                stream,
                size.width,
                size.height
            )));
        }
        Ok(())
    }

    fn encoder_usable(&self, kind: StreamKind) -> bool {
        match &self.encoders {
            Some(encoders) => {
                let encoder = match kind {
                    StreamKind::Front => &encoders.front,
                    StreamKind::Back => &encoders.back,
                    StreamKind::Combined => &encoders.combined,
                };
                encoder.state() == EncoderState::Writing
            }
            None => false,
        }
    }

    fn write(&mut self, kind: StreamKind, sample: Sample<'_>, notes: &mut Vec<Notification>) -> Result<WriteOutcome, RecordingError> {
        let Some(encoders) = self.encoders.as_mut() else {
            return Ok(WriteOutcome::Skipped);
        };
        let encoder = encoders.get_mut(kind);
        if encoder.state() == EncoderState::Failed {
            return Ok(WriteOutcome::Skipped);
        }

        let is_video = matches!(sample, Sample::Video(_));
        let result = match sample {
            Sample::Video(frame) => encoder.append_video(frame),
            Sample::Audio(chunk) => encoder.append_audio(chunk),
        };

        match result {
            Ok(()) => {
                let counter = match (kind, is_video) {
                    (StreamKind::Front, _) => &mut self.diagnostics.front_frames_written,
                    (StreamKind::Back, _) => &mut self.diagnostics.back_frames_written,
                    (StreamKind::Combined, true) => &mut self.diagnostics.composed_frames_written,
                    (StreamKind::Combined, false) => &mut self.diagnostics.audio_chunks_written,
                };
                *counter += 1;
                Ok(WriteOutcome::Written)
            }
            Err(e @ (EncoderError::FormatMismatch(_) | EncoderError::NoAudioTrack)) => {
                Err(RecordingError::InvalidSample(e.to_string()))
            }
            Err(e) if e.is_sample_rejection() => {
                log::debug!("Dropped {} sample: {}", kind, e);
                Ok(WriteOutcome::Rejected)
            }
            Err(e) => {
                let err = RecordingError::EncoderWriteFailed(kind, e.to_string());
                notes.push(Notification::StreamFailed(kind, err.clone()));
                Err(err)
            }
        }
    }

    fn drop_composite(&mut self, reason: DropReason, notes: &mut Vec<Notification>) {
        log::debug!("Dropped combined frame: {}", reason);
        self.diagnostics.record_drop(&reason);
        notes.push(Notification::CompositeDropped(reason));
    }

    // --- operations ---

    fn configure(
        &mut self,
        front: Box<dyn Writable>,
        back: Box<dyn Writable>,
        combined: Box<dyn Writable>,
        config: RecordingConfiguration,
        notes: &mut Vec<Notification>,
    ) -> Result<(), ConfigError> {
        if !self.state.accepts_configure() {
            return Err(ConfigError::SessionActive);
        }
        config.validate()?;

        let handles = [
            (StreamKind::Front, front.handle()),
            (StreamKind::Back, back.handle()),
            (StreamKind::Combined, combined.handle()),
        ];
        for (i, (first, handle)) in handles.iter().enumerate() {
            if let Some((second, _)) = handles[i + 1..].iter().find(|(_, other)| other == handle) {
                return Err(ConfigError::DuplicateTarget {
                    first: *first,
                    second: *second,
                    target: handle.to_string(),
                });
            }
        }

        // Outputs prepared by an earlier configure are released first.
        self.encoders = None;
        self.set_state(RecordingState::Configuring, notes);

        let mut encoders = EncoderSet {
            front: StreamEncoder::new(EncoderSettings::for_stream(StreamKind::Front, &config), front),
            back: StreamEncoder::new(EncoderSettings::for_stream(StreamKind::Back, &config), back),
            combined: StreamEncoder::new(EncoderSettings::for_stream(StreamKind::Combined, &config), combined),
        };
        for kind in StreamKind::ALL {
            if let Err(e) = encoders.get_mut(kind).prepare() {
                encoders.abort_all();
                log::error!("Cannot open {} target: {}", kind, e);
                self.config = None;
                self.set_state(RecordingState::Idle, notes);
                return Err(ConfigError::TargetUnwritable {
                    stream: kind,
                    reason: e.to_string(),
                });
            }
        }

        log::info!(
            "Configured {}x{} @ {} bit/s, layout {}",
            config.frame_size.width,
            config.frame_size.height,
            config.bitrate,
            config.layout.name()
        );
        self.encoders = Some(encoders);
        self.config = Some(config);
        self.set_state(RecordingState::Ready, notes);
        Ok(())
    }

    fn start(&mut self, at: Timestamp, notes: &mut Vec<Notification>) -> Result<(), RecordingError> {
        if self.state.has_session() {
            return Err(RecordingError::AlreadyActive);
        }
        if self.state != RecordingState::Ready {
            return Err(RecordingError::NotConfigured);
        }
        let (Some(config), Some(encoders)) = (self.config.clone(), self.encoders.as_mut()) else {
            return Err(RecordingError::NotConfigured);
        };

        for kind in StreamKind::ALL {
            if let Err(e) = encoders.get_mut(kind).begin(at) {
                encoders.abort_all();
                self.encoders = None;
                let err = RecordingError::EncoderStartFailed {
                    stream: kind,
                    reason: e.to_string(),
                };
                log::error!("Start aborted: {}", err);
                self.set_state(RecordingState::Failed(err.clone()), notes);
                return Err(err);
            }
        }

        let recording_id = uuid::Uuid::new_v4().to_string();
        log::info!("Recording {} started at {}", recording_id, at);
        self.session = Some(Session {
            recording_id,
            start: at,
            config,
        });
        self.generation += 1;
        self.in_flight = 0;
        self.cache.clear();
        self.diagnostics = RecordingDiagnostics::default();
        self.active = true;
        self.set_state(RecordingState::Writing, notes);
        Ok(())
    }

    fn append_front(&mut self, frame: Frame, notes: &mut Vec<Notification>) -> Result<(), RecordingError> {
        if !self.accepting()? {
            return Ok(());
        }
        self.diagnostics.front_frames_received += 1;
        self.check_frame(StreamKind::Front, &frame)?;

        let outcome = self.write(StreamKind::Front, Sample::Video(&frame), notes);
        if let Ok(WriteOutcome::Rejected) = outcome {
            self.diagnostics.samples_rejected += 1;
            return Ok(());
        }
        // Cached even when the front stream failed: the combined stream
        // records independently.
        self.cache.store(Arc::new(frame));
        outcome.map(|_| ())
    }

    /// Write the back frame and, if a front frame is cached, register a
    /// composition to run outside the lock.
    fn begin_back(&mut self, frame: Frame, notes: &mut Vec<Notification>) -> (Result<(), RecordingError>, Option<PendingComposite>) {
        match self.accepting() {
            Err(e) => return (Err(e), None),
            Ok(false) => return (Ok(()), None),
            Ok(true) => {}
        }
        self.diagnostics.back_frames_received += 1;
        if let Err(e) = self.check_frame(StreamKind::Back, &frame) {
            return (Err(e), None);
        }

        let back_result = match self.write(StreamKind::Back, Sample::Video(&frame), notes) {
            Ok(WriteOutcome::Rejected) => {
                self.diagnostics.samples_rejected += 1;
                return (Ok(()), None);
            }
            other => other.map(|_| ()),
        };

        if !self.encoder_usable(StreamKind::Combined) {
            return (back_result, None);
        }
        let Some(session) = self.session.as_ref() else {
            return (back_result, None);
        };
        let Some(front) = self.cache.latest() else {
            log::debug!("No front frame cached yet; combined stream skips this tick");
            self.diagnostics.composites_without_front += 1;
            return (back_result, None);
        };

        let pending = PendingComposite {
            front,
            back: Arc::new(frame),
            layout: session.config.layout,
            anchor: session.config.timestamp_anchor,
            output: session.config.frame_size,
            budget: session.config.frame_interval(),
            generation: self.generation,
        };
        self.in_flight += 1;
        self.diagnostics.in_flight_high_water = self.diagnostics.in_flight_high_water.max(self.in_flight);
        (back_result, Some(pending))
    }

    fn finish_back(
        &mut self,
        pending: &PendingComposite,
        composed: Result<Frame, DropReason>,
        notes: &mut Vec<Notification>,
    ) -> Result<(), RecordingError> {
        if pending.generation != self.generation {
            log::debug!("Discarding composite that outlived its session");
            return Ok(());
        }
        self.in_flight = self.in_flight.saturating_sub(1);

        let composed = composed.and_then(|frame| {
            if frame.width() != pending.output.width || frame.height() != pending.output.height {
                return Err(DropReason::Compositor(CompositorError::InvalidInput(format!(
                    "composed frame is {}x{}, combined stream is {}x{}",
                    frame.width(),
                    frame.height(),
                    pending.output.width,
                    pending.output.height
                ))));
            }
            Ok(frame)
        });
        let frame = match composed {
            Ok(frame) => frame,
            Err(reason) => {
                self.drop_composite(reason, notes);
                return Ok(());
            }
        };

        let pts = composite_timestamp(pending.anchor, pending.front.timestamp(), pending.back.timestamp());
        let frame = frame.with_timestamp(pts);
        match self.write(StreamKind::Combined, Sample::Video(&frame), notes) {
            Ok(WriteOutcome::Rejected) => {
                self.drop_composite(DropReason::OutOfOrder, notes);
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    fn append_audio(&mut self, chunk: AudioChunk, notes: &mut Vec<Notification>) -> Result<(), RecordingError> {
        if !self.accepting()? {
            return Ok(());
        }
        self.diagnostics.audio_chunks_received += 1;
        if let Some(session) = &self.session {
            if chunk.format() != session.config.audio {
                return Err(RecordingError::InvalidSample(format!(
                    "audio chunk is {:?}, recording expects {:?}",
                    chunk.format(),
                    session.config.audio
                )));
            }
        }

        match self.write(StreamKind::Combined, Sample::Audio(&chunk), notes)? {
            WriteOutcome::Rejected => self.diagnostics.samples_rejected += 1,
            WriteOutcome::Written | WriteOutcome::Skipped => {}
        }
        Ok(())
    }
}

/// The recording pipeline's single point of control.
///
/// Owns the three stream encoders, the composition cache and the session
/// timing; every public method is safe to call concurrently from the front,
/// back and audio delivery threads. All state sits behind one mutex.
/// Composition runs on the compose worker with the lock released, so a slow
/// compositor never stalls front-camera or audio delivery.
///
/// ```text
/// append_front ─→ [front encoder] + [composition cache]
/// append_back  ─→ [back encoder] ─→ (cached front, back) ─→ [ComposeWorker] ─→ [combined encoder]
/// append_audio ─→ [combined encoder, audio track]
/// stop         ─→ drain in-flight ─→ clear cache ─→ finalize ×3 in parallel
/// ```
pub struct RecordingCoordinator<C: Compositor + 'static> {
    inner: Mutex<CoordinatorInner>,
    drained: Condvar,
    compositor: Arc<C>,
    worker: ComposeWorker,
    delegate: Option<Arc<dyn RecordingDelegate>>,
}

impl RecordingCoordinator<TransformCompositor<SoftwareBackend>> {
    /// Coordinator composing on the CPU, sized from `config`.
    pub fn software(config: &RecordingConfiguration) -> Self {
        Self::new(TransformCompositor::from_config(SoftwareBackend::new(), config))
    }
}

impl<C: Compositor + 'static> RecordingCoordinator<C> {
    pub fn new(compositor: C) -> Self {
        let compositor = Arc::new(compositor);
        let worker = ComposeWorker::spawn(Arc::clone(&compositor));
        Self {
            inner: Mutex::new(CoordinatorInner::new()),
            drained: Condvar::new(),
            compositor,
            worker,
            delegate: None,
        }
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn RecordingDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn compositor(&self) -> &C {
        &self.compositor
    }

    pub fn state(&self) -> RecordingState {
        self.inner.lock().state.clone()
    }

    pub fn diagnostics(&self) -> RecordingDiagnostics {
        self.inner.lock().diagnostics.clone()
    }

    /// Whether appends are currently written.
    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    pub fn recording_start(&self) -> Option<Timestamp> {
        self.inner.lock().session.as_ref().map(|s| s.start)
    }

    /// Bind the three outputs and validate `config`.
    /// Transitions: idle / ready / closed / failed → configuring → ready.
    ///
    /// On failure every target opened so far is discarded.
    pub fn configure(
        &self,
        front: Box<dyn Writable>,
        back: Box<dyn Writable>,
        combined: Box<dyn Writable>,
        config: RecordingConfiguration,
    ) -> Result<(), ConfigError> {
        let mut notes = Vec::new();
        let result = self.inner.lock().configure(front, back, combined, config, &mut notes);
        self.notify(notes);
        result
    }

    /// Begin all three write sessions at `at`, the timestamp of the first
    /// observed frame. Transitions: ready → writing.
    ///
    /// All-or-nothing: if any encoder cannot start, all three are aborted
    /// and their outputs discarded.
    pub fn start(&self, at: Timestamp) -> Result<(), RecordingError> {
        let mut notes = Vec::new();
        let result = self.inner.lock().start(at, &mut notes);
        self.notify(notes);
        result
    }

    /// Write a front frame and keep it as the next composition partner.
    pub fn append_front(&self, frame: Frame) -> Result<(), RecordingError> {
        let mut notes = Vec::new();
        let result = self.inner.lock().append_front(frame, &mut notes);
        self.notify(notes);
        result
    }

    /// Write a back frame, then compose it with the cached front frame into
    /// the combined stream.
    ///
    /// Blocks for at most one frame interval while composition runs; if the
    /// compositor is busy or too slow, the combined frame for this tick is
    /// dropped and the back frame still counts as written.
    pub fn append_back(&self, frame: Frame) -> Result<(), RecordingError> {
        let mut notes = Vec::new();
        let (back_result, pending) = self.inner.lock().begin_back(frame, &mut notes);

        let Some(pending) = pending else {
            self.notify(notes);
            return back_result;
        };

        let composed = self.worker.compose(
            Arc::clone(&pending.front),
            Arc::clone(&pending.back),
            pending.layout,
            pending.budget,
        );

        let combined_result = {
            let mut inner = self.inner.lock();
            let result = inner.finish_back(&pending, composed, &mut notes);
            if inner.in_flight == 0 {
                self.drained.notify_all();
            }
            result
        };
        self.notify(notes);
        back_result.and(combined_result)
    }

    /// Write an audio chunk to the combined stream's audio track.
    pub fn append_audio(&self, chunk: AudioChunk) -> Result<(), RecordingError> {
        let mut notes = Vec::new();
        let result = self.inner.lock().append_audio(chunk, &mut notes);
        self.notify(notes);
        result
    }

    /// Stop recording and finalize all three streams.
    /// Transitions: writing → draining → finalizing → closed.
    ///
    /// Appends become no-ops immediately. Compositions already handed to the
    /// worker are waited for (at most `drain_timeout_ms`), the cached front
    /// frame is dropped, and each encoder is finalized on its own thread at
    /// the earlier of its last video and last audio timestamp. Always runs
    /// to completion; per-stream failures are reported in the result.
    pub fn stop(&self) -> Result<RecordingOutputs, RecordingError> {
        let mut notes = Vec::new();
        {
            let mut inner = self.inner.lock();
            if !inner.state.is_writing() {
                return Err(if inner.config.is_none() {
                    RecordingError::NotConfigured
                } else {
                    RecordingError::NotActive
                });
            }
            inner.active = false;
            inner.set_state(RecordingState::Draining, &mut notes);
        }
        self.notify(std::mem::take(&mut notes));

        let (encoders, session, diagnostics) = {
            let mut inner = self.inner.lock();
            let timeout = inner
                .session
                .as_ref()
                .map(|s| s.config.drain_timeout())
                .unwrap_or_default();
            let deadline = Instant::now() + timeout;
            while inner.in_flight > 0 {
                if self.drained.wait_until(&mut inner, deadline).timed_out() {
                    log::warn!(
                        "{} composition(s) still in flight after {:?}; discarding them",
                        inner.in_flight,
                        timeout
                    );
                    break;
                }
            }

            if !inner.cache.is_empty() {
                log::debug!("Dropping cached front frame before finalize");
            }
            inner.cache.clear();
            inner.generation += 1;
            inner.in_flight = 0;
            inner.set_state(RecordingState::Finalizing, &mut notes);

            let encoders = inner.encoders.take();
            let session = inner.session.take();
            let (Some(encoders), Some(session)) = (encoders, session) else {
                inner.set_state(RecordingState::Closed, &mut notes);
                drop(inner);
                self.notify(notes);
                return Err(RecordingError::NotActive);
            };
            (encoders, session, inner.diagnostics.clone())
        };
        self.notify(std::mem::take(&mut notes));

        let EncoderSet {
            mut front,
            mut back,
            mut combined,
        } = encoders;
        let (front, back, combined) = thread::scope(|scope| {
            let front_task = thread::Builder::new()
                .name("finalize-front".into())
                .spawn_scoped(scope, || finalize(&mut front))
                .expect("failed to spawn finalize thread");
            let back_task = thread::Builder::new()
                .name("finalize-back".into())
                .spawn_scoped(scope, || finalize(&mut back))
                .expect("failed to spawn finalize thread");
            let combined = finalize(&mut combined);
            (
                join_finalize(front_task, StreamKind::Front),
                join_finalize(back_task, StreamKind::Back),
                combined,
            )
        });

        let outputs = RecordingOutputs {
            recording_id: session.recording_id.clone(),
            recording_start: session.start,
            front: front.map(|f| stream_output(StreamKind::Front, f, &session)),
            back: back.map(|f| stream_output(StreamKind::Back, f, &session)),
            combined: combined.map(|f| stream_output(StreamKind::Combined, f, &session)),
            diagnostics,
        };

        for kind in StreamKind::ALL {
            if let Err(err @ RecordingError::EncoderFinalizeFailed(..)) = outputs.get(kind) {
                notes.push(Notification::StreamFailed(kind, err.clone()));
            }
        }
        if session.config.write_metadata_sidecars {
            write_sidecars(&outputs);
        }

        log::info!(
            "Recording {} finished; failed streams: {:?}",
            outputs.recording_id,
            outputs.failed_streams()
        );
        {
            let mut inner = self.inner.lock();
            inner.set_state(RecordingState::Closed, &mut notes);
        }
        notes.push(Notification::Finished(Box::new(outputs.clone())));
        self.notify(notes);

        Ok(outputs)
    }

    fn notify(&self, notes: Vec<Notification>) {
        let Some(delegate) = &self.delegate else {
            return;
        };
        for note in notes {
            match note {
                Notification::State(state) => delegate.on_state_changed(&state),
                Notification::CompositeDropped(reason) => delegate.on_composite_dropped(&reason),
                Notification::StreamFailed(stream, err) => delegate.on_stream_failed(stream, &err),
                Notification::Finished(outputs) => delegate.on_recording_finished(&outputs),
            }
        }
    }
}

/// End one encoder's write session at its own synchronized end time.
fn finalize(encoder: &mut StreamEncoder) -> Result<FinishedStream, RecordingError> {
    let kind = encoder.kind();
    if encoder.state() == EncoderState::Failed {
        let reason = encoder
            .failure()
            .map(ToString::to_string)
            .unwrap_or_else(|| "encoder failed".into());
        // Partial output from a failed stream is removed here.
        encoder.abort();
        return Err(RecordingError::EncoderWriteFailed(kind, reason));
    }
    let end = encoder.session_end();
    encoder
        .finish(end)
        .map_err(|e| RecordingError::EncoderFinalizeFailed(kind, e.to_string()))
}

fn join_finalize(
    task: ScopedJoinHandle<'_, Result<FinishedStream, RecordingError>>,
    kind: StreamKind,
) -> Result<FinishedStream, RecordingError> {
    task.join()
        .unwrap_or_else(|_| Err(RecordingError::EncoderFinalizeFailed(kind, "finalize thread panicked".into())))
}

fn stream_output(kind: StreamKind, finished: FinishedStream, session: &Session) -> StreamOutput {
    let config = &session.config;
    let size = config.stream_size(kind);
    let duration_secs = (finished.session_end - finished.session_start).as_secs_f64();
    let metadata = RecordingMetadata {
        id: uuid::Uuid::new_v4().to_string(),
        recording_id: session.recording_id.clone(),
        stream: kind,
        target: finished.handle.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        duration_secs,
        session_start_us: finished.session_start.as_micros(),
        session_end_us: finished.session_end.as_micros(),
        width: size.width,
        height: size.height,
        pixel_format: config.pixel_format,
        bitrate: config.bitrate,
        video_frames: finished.video_frames,
        audio_chunks: finished.audio_chunks,
        checksum: finished.checksum.clone(),
        layout: (kind == StreamKind::Combined).then_some(config.layout),
    };

    StreamOutput {
        kind,
        handle: finished.handle,
        session_start: finished.session_start,
        session_end: finished.session_end,
        duration_secs,
        video_frames: finished.video_frames,
        audio_chunks: finished.audio_chunks,
        bytes_written: finished.bytes_written,
        checksum: finished.checksum,
        metadata,
    }
}

fn write_sidecars(outputs: &RecordingOutputs) {
    for output in outputs.succeeded() {
        let Some(path) = output.handle.as_path() else {
            continue;
        };
        if let Err(e) = write_metadata(&output.metadata, path) {
            log::warn!("Failed to write {} metadata sidecar: {}", output.kind, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::media::{AudioFormat, FrameSource, PixelFormat};
    use crate::storage::container::ContainerReader;
    use crate::storage::metadata::read_metadata;
    use crate::storage::targets::{FileTarget, MemoryTarget};
    use crate::test_support::{Event, EventLog, FailingTarget, FailurePoint, SlowCompositor};
    use image::imageops::FilterType;
    use sha2::{Digest, Sha256};
    use std::sync::Barrier;

    const SIZE: u32 = 16;

    type Software = TransformCompositor<SoftwareBackend>;

    fn config() -> RecordingConfiguration {
        let mut config = RecordingConfiguration::new((SIZE, SIZE), 1_000_000, Layout::default());
        config.pixel_format = PixelFormat::Rgba8;
        config.front_size = Some(FrameSize::new(8, 4));
        config.back_size = Some(FrameSize::new(8, 4));
        config.mirror_front = false;
        // one second per tick keeps composition well inside its budget
        config.frame_rate = 1;
        config
    }

    fn ms(v: i64) -> Timestamp {
        Timestamp::from_millis(v)
    }

    fn front(at: i64) -> Frame {
        Frame::solid(8, 4, PixelFormat::Rgba8, [200, 10, 10, 255], ms(at), FrameSource::Front).unwrap()
    }

    fn back(at: i64) -> Frame {
        Frame::solid(8, 4, PixelFormat::Rgba8, [10, 10, 200, 255], ms(at), FrameSource::Back).unwrap()
    }

    fn audio(at: i64) -> AudioChunk {
        AudioChunk::silence(AudioFormat::default(), ms(at), Duration::from_millis(10))
    }

    struct Targets {
        front: MemoryTarget,
        back: MemoryTarget,
        combined: MemoryTarget,
    }

    impl Targets {
        fn new() -> Self {
            Self {
                front: MemoryTarget::new("front"),
                back: MemoryTarget::new("back"),
                combined: MemoryTarget::new("combined"),
            }
        }

        fn bind<C: Compositor + 'static>(&self, coordinator: &RecordingCoordinator<C>, config: RecordingConfiguration) {
            coordinator
                .configure(
                    Box::new(self.front.clone()),
                    Box::new(self.back.clone()),
                    Box::new(self.combined.clone()),
                    config,
                )
                .unwrap();
        }
    }

    fn rig() -> (RecordingCoordinator<Software>, Targets) {
        let config = config();
        let coordinator = RecordingCoordinator::software(&config);
        let targets = Targets::new();
        targets.bind(&coordinator, config);
        (coordinator, targets)
    }

    fn video_pts(bytes: &[u8]) -> Vec<Timestamp> {
        ContainerReader::parse(bytes)
            .unwrap()
            .video_packets()
            .map(|p| p.header.pts)
            .collect()
    }

    #[test]
    fn scenario_a_first_pair_composes_at_start() {
        let mut config = RecordingConfiguration::new((1920, 1080), 10_000_000, Layout::default());
        // each half of a stacked 1920x1080 frame is 1920x540
        config.front_size = Some(FrameSize::new(1920, 540));
        config.back_size = Some(FrameSize::new(1920, 540));
        config.mirror_front = false;
        config.frame_rate = 1;
        let compositor = TransformCompositor::from_config(SoftwareBackend::with_filter(FilterType::Nearest), &config);
        let coordinator = RecordingCoordinator::new(compositor);
        let targets = Targets::new();
        targets.bind(&coordinator, config);

        coordinator.start(Timestamp::ZERO).unwrap();
        let half = |source| Frame::solid(1920, 540, PixelFormat::Bgra8, [1, 2, 3, 255], Timestamp::ZERO, source).unwrap();
        coordinator.append_front(half(FrameSource::Front)).unwrap();
        coordinator.append_back(half(FrameSource::Back)).unwrap();
        let outputs = coordinator.stop().unwrap();

        assert!(outputs.all_succeeded());
        assert_eq!(video_pts(&targets.combined.contents()), vec![Timestamp::ZERO]);
        assert_eq!(outputs.diagnostics.composed_frames_written, 1);
        let reader_bytes = targets.combined.contents();
        let reader = ContainerReader::parse(&reader_bytes).unwrap();
        let packet = reader.video_packets().next().unwrap();
        assert_eq!((packet.header.width, packet.header.height), (1920, 1080));
    }

    #[test]
    fn scenario_b_no_composite_without_front() {
        let (coordinator, targets) = rig();
        coordinator.start(ms(0)).unwrap();
        coordinator.append_back(back(0)).unwrap();
        coordinator.append_back(back(33)).unwrap();
        let outputs = coordinator.stop().unwrap();

        assert_eq!(video_pts(&targets.back.contents()), vec![ms(0), ms(33)]);
        assert!(video_pts(&targets.front.contents()).is_empty());
        assert!(video_pts(&targets.combined.contents()).is_empty());
        assert_eq!(outputs.diagnostics.composites_without_front, 2);
    }

    #[test]
    fn scenario_c_empty_session_produces_valid_containers() {
        let (coordinator, targets) = rig();
        coordinator.start(ms(500)).unwrap();
        let outputs = coordinator.stop().unwrap();

        assert!(outputs.all_succeeded());
        for target in [&targets.front, &targets.back, &targets.combined] {
            let bytes = target.contents();
            let reader = ContainerReader::parse(&bytes).unwrap();
            assert!(reader.packets().is_empty());
            assert_eq!(reader.duration_secs(), 0.0);
            assert!(target.is_closed());
        }
        let combined = outputs.combined.as_ref().unwrap();
        assert_eq!(combined.session_end, ms(500));
        assert_eq!(combined.video_frames, 0);
    }

    #[test]
    fn scenario_d_end_uses_lagging_audio() {
        let (coordinator, targets) = rig();
        coordinator.start(ms(0)).unwrap();
        for t in (0..=1_000).step_by(100) {
            coordinator.append_front(front(t)).unwrap();
            coordinator.append_back(back(t)).unwrap();
            if t <= 800 {
                coordinator.append_audio(audio(t)).unwrap();
            }
        }
        let outputs = coordinator.stop().unwrap();

        let combined = outputs.combined.as_ref().unwrap();
        assert_eq!(combined.session_end, ms(800));
        approx::assert_relative_eq!(combined.duration_secs, 0.8);
        // video-only streams end at their last frame
        assert_eq!(outputs.front.as_ref().unwrap().session_end, ms(1_000));

        let bytes = targets.combined.contents();
        let reader = ContainerReader::parse(&bytes).unwrap();
        assert_eq!(reader.footer().session_end, ms(800));
        assert!(reader.packets().iter().all(|p| p.header.pts <= ms(800)));
        assert_eq!(reader.video_packets().count(), 9);
        assert_eq!(reader.audio_packets().count(), 9);

        let front_bytes = targets.front.contents();
        assert_eq!(ContainerReader::parse(&front_bytes).unwrap().audio_packets().count(), 0);
    }

    #[test]
    fn concurrent_starts_admit_exactly_one() {
        let (coordinator, _targets) = rig();
        let coordinator = Arc::new(coordinator);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || coordinator.start(ms(0)))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| *e == RecordingError::AlreadyActive));
    }

    /// One delivery thread appending `count` samples once all are ready.
    fn deliver(
        coordinator: &Arc<RecordingCoordinator<Software>>,
        gate: &Arc<Barrier>,
        count: i64,
        append: impl Fn(&RecordingCoordinator<Software>, i64) + Send + 'static,
    ) -> thread::JoinHandle<()> {
        let coordinator = Arc::clone(coordinator);
        let gate = Arc::clone(gate);
        thread::spawn(move || {
            gate.wait();
            for i in 0..count {
                append(&coordinator, i);
            }
        })
    }

    #[test]
    fn parallel_delivery_keeps_streams_ordered() {
        const N: i64 = 60;
        let (coordinator, targets) = rig();
        let coordinator = Arc::new(coordinator);
        coordinator.start(ms(0)).unwrap();

        let gate = Arc::new(Barrier::new(3));
        let threads = [
            deliver(&coordinator, &gate, N, |c, i| c.append_front(front(i * 33)).unwrap()),
            deliver(&coordinator, &gate, N, |c, i| c.append_back(back(i * 33 + 5)).unwrap()),
            deliver(&coordinator, &gate, N, |c, i| c.append_audio(audio(i * 33)).unwrap()),
        ];
        for handle in threads {
            handle.join().unwrap();
        }
        let outputs = coordinator.stop().unwrap();
        assert!(outputs.all_succeeded());

        for target in [&targets.front, &targets.back, &targets.combined] {
            let pts = video_pts(&target.contents());
            assert!(pts.windows(2).all(|w| w[0] <= w[1]));
        }
        assert_eq!(video_pts(&targets.front.contents()).len(), N as usize);
        assert_eq!(video_pts(&targets.back.contents()).len(), N as usize);

        let d = &outputs.diagnostics;
        assert_eq!((d.front_frames_written, d.back_frames_written), (N as u64, N as u64));
        assert_eq!(d.audio_chunks_written, N as u64);
        assert_eq!(d.samples_rejected, 0);
        // every back frame with a cached partner was either composed or dropped
        assert_eq!(
            d.composed_frames_written + d.composites_dropped(),
            d.back_frames_written - d.composites_without_front
        );
    }

    #[test]
    fn appends_after_stop_write_nothing() {
        let (coordinator, targets) = rig();
        coordinator.start(ms(0)).unwrap();
        coordinator.append_front(front(0)).unwrap();
        coordinator.append_back(back(0)).unwrap();
        coordinator.stop().unwrap();

        let before = [targets.front.contents(), targets.back.contents(), targets.combined.contents()];
        assert!(coordinator.append_front(front(40)).is_ok());
        assert!(coordinator.append_back(back(40)).is_ok());
        assert!(coordinator.append_audio(audio(40)).is_ok());
        let after = [targets.front.contents(), targets.back.contents(), targets.combined.contents()];

        assert_eq!(before, after);
        assert_eq!(coordinator.state(), RecordingState::Closed);
        assert!(!coordinator.is_active());
    }

    #[test]
    fn appends_while_draining_write_nothing() {
        let config = config();
        let (started_tx, started_rx) = flume::bounded(1);
        let slow = SlowCompositor::new(TransformCompositor::from_config(SoftwareBackend::new(), &config), Duration::from_millis(400))
            .notify_on_start(started_tx);
        let coordinator = Arc::new(RecordingCoordinator::new(slow));
        let targets = Targets::new();
        targets.bind(&*coordinator, config);

        coordinator.start(ms(0)).unwrap();
        coordinator.append_front(front(0)).unwrap();
        let appender = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || coordinator.append_back(back(0)))
        };
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let stopper = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || coordinator.stop())
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while coordinator.state() != RecordingState::Draining {
            assert!(Instant::now() < deadline, "stop never began draining");
            thread::sleep(Duration::from_millis(1));
        }

        let before = [targets.front.contents(), targets.back.contents()];
        assert_eq!(coordinator.append_front(front(40)), Ok(()));
        assert_eq!(coordinator.append_back(back(40)), Ok(()));
        assert_eq!(coordinator.append_audio(audio(40)), Ok(()));
        assert_eq!(coordinator.state(), RecordingState::Draining);
        assert_eq!(before, [targets.front.contents(), targets.back.contents()]);

        let outputs = stopper.join().unwrap().unwrap();
        appender.join().unwrap().unwrap();
        assert_eq!(video_pts(&targets.front.contents()), vec![ms(0)]);
        assert_eq!(video_pts(&targets.back.contents()), vec![ms(0)]);
        assert_eq!(video_pts(&targets.combined.contents()), vec![ms(0)]);
        assert_eq!(outputs.diagnostics.front_frames_received, 1);
        assert_eq!(outputs.diagnostics.audio_chunks_written, 0);
    }

    #[test]
    fn stop_waits_for_in_flight_composite() {
        let config = config();
        let (started_tx, started_rx) = flume::bounded(1);
        let slow = SlowCompositor::new(TransformCompositor::from_config(SoftwareBackend::new(), &config), Duration::from_millis(150))
            .notify_on_start(started_tx);
        let coordinator = Arc::new(RecordingCoordinator::new(slow));
        let targets = Targets::new();
        targets.bind(&*coordinator, config);

        coordinator.start(ms(0)).unwrap();
        coordinator.append_front(front(0)).unwrap();
        let appender = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || coordinator.append_back(back(0)))
        };
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let outputs = coordinator.stop().unwrap();
        appender.join().unwrap().unwrap();

        assert_eq!(video_pts(&targets.combined.contents()), vec![ms(0)]);
        assert_eq!(outputs.diagnostics.composed_frames_written, 1);
        assert_eq!(outputs.diagnostics.in_flight_high_water, 1);
    }

    #[test]
    fn out_of_order_frames_are_dropped() {
        let (coordinator, targets) = rig();
        coordinator.start(ms(0)).unwrap();
        for t in [0, 66, 33, 100] {
            coordinator.append_front(front(t)).unwrap();
        }
        let outputs = coordinator.stop().unwrap();

        let pts = video_pts(&targets.front.contents());
        assert_eq!(pts, vec![ms(0), ms(66), ms(100)]);
        assert!(pts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(outputs.diagnostics.samples_rejected, 1);
    }

    #[test]
    fn late_frames_before_start_are_dropped() {
        let (coordinator, targets) = rig();
        coordinator.start(ms(100)).unwrap();
        coordinator.append_front(front(50)).unwrap();
        coordinator.append_back(back(60)).unwrap();
        let outputs = coordinator.stop().unwrap();

        assert!(video_pts(&targets.front.contents()).is_empty());
        assert!(video_pts(&targets.combined.contents()).is_empty());
        assert_eq!(outputs.diagnostics.samples_rejected, 2);
    }

    #[test]
    fn combined_frames_have_no_transparent_pixels() {
        // portrait front, ultra-wide back
        let mut config = config();
        config.front_size = Some(FrameSize::new(9, 16));
        config.back_size = Some(FrameSize::new(40, 10));
        let coordinator = RecordingCoordinator::software(&config);
        let targets = Targets::new();
        targets.bind(&coordinator, config);
        coordinator.start(ms(0)).unwrap();
        let tall = Frame::solid(9, 16, PixelFormat::Rgba8, [255, 0, 0, 255], ms(0), FrameSource::Front).unwrap();
        let wide = Frame::solid(40, 10, PixelFormat::Rgba8, [0, 0, 255, 255], ms(0), FrameSource::Back).unwrap();
        coordinator.append_front(tall).unwrap();
        coordinator.append_back(wide).unwrap();
        coordinator.stop().unwrap();

        let bytes = targets.combined.contents();
        let reader = ContainerReader::parse(&bytes).unwrap();
        let packet = reader.video_packets().next().unwrap();
        assert_eq!(packet.payload.len(), (SIZE * SIZE * 4) as usize);
        assert!(packet.payload.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn combined_write_failure_is_isolated() {
        let config = config();
        let mut coordinator = RecordingCoordinator::software(&config);
        let events = Arc::new(EventLog::default());
        coordinator.set_delegate(events.clone());

        let front_target = MemoryTarget::new("front");
        let back_target = MemoryTarget::new("back");
        // header succeeds, first packet fails
        let combined_target = FailingTarget::new("combined", FailurePoint::WriteAfter(1));
        coordinator
            .configure(
                Box::new(front_target.clone()),
                Box::new(back_target.clone()),
                Box::new(combined_target.clone()),
                config,
            )
            .unwrap();

        coordinator.start(ms(0)).unwrap();
        coordinator.append_front(front(0)).unwrap();
        let err = coordinator.append_back(back(0)).unwrap_err();
        assert!(matches!(err, RecordingError::EncoderWriteFailed(StreamKind::Combined, _)));

        coordinator.append_front(front(33)).unwrap();
        coordinator.append_back(back(33)).unwrap();
        coordinator.append_audio(audio(33)).unwrap();
        let outputs = coordinator.stop().unwrap();

        assert_eq!(outputs.front.as_ref().unwrap().video_frames, 2);
        assert_eq!(outputs.back.as_ref().unwrap().video_frames, 2);
        assert!(matches!(
            outputs.combined,
            Err(RecordingError::EncoderWriteFailed(StreamKind::Combined, _))
        ));
        assert_eq!(outputs.failed_streams(), vec![StreamKind::Combined]);
        assert!(combined_target.was_discarded());
        assert!(combined_target.contents().is_empty());
        assert_eq!(
            events
                .events()
                .iter()
                .filter(|e| **e == Event::StreamFailed(StreamKind::Combined))
                .count(),
            1
        );
    }

    #[test]
    fn finalize_failure_is_isolated() {
        let config = config();
        let coordinator = RecordingCoordinator::software(&config);
        let front_target = FailingTarget::new("front", FailurePoint::Close);
        let back_target = MemoryTarget::new("back");
        let combined_target = MemoryTarget::new("combined");
        coordinator
            .configure(
                Box::new(front_target.clone()),
                Box::new(back_target.clone()),
                Box::new(combined_target.clone()),
                config,
            )
            .unwrap();

        coordinator.start(ms(0)).unwrap();
        coordinator.append_front(front(0)).unwrap();
        coordinator.append_back(back(0)).unwrap();
        let outputs = coordinator.stop().unwrap();

        assert!(matches!(
            outputs.front,
            Err(RecordingError::EncoderFinalizeFailed(StreamKind::Front, _))
        ));
        assert!(front_target.was_discarded());
        assert!(outputs.back.is_ok());
        assert!(outputs.combined.is_ok());
    }

    #[test]
    fn configure_failure_leaves_nothing_behind() {
        let coordinator = RecordingCoordinator::software(&config());
        let front_target = MemoryTarget::new("front");
        let combined_target = MemoryTarget::new("combined");

        let err = coordinator
            .configure(
                Box::new(front_target.clone()),
                Box::new(FailingTarget::new("back", FailurePoint::Open)),
                Box::new(combined_target.clone()),
                config(),
            )
            .unwrap_err();

        assert!(matches!(err, ConfigError::TargetUnwritable { stream: StreamKind::Back, .. }));
        assert!(front_target.is_discarded());
        assert!(combined_target.contents().is_empty());
        assert_eq!(coordinator.state(), RecordingState::Idle);
        assert_eq!(coordinator.start(ms(0)), Err(RecordingError::NotConfigured));
    }

    #[test]
    fn failed_configure_keeps_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let front_path = dir.path().join("front.dcr");
        std::fs::write(&front_path, b"previous recording").unwrap();

        let coordinator = RecordingCoordinator::software(&config());
        let err = coordinator
            .configure(
                Box::new(FileTarget::new(&front_path)),
                Box::new(FailingTarget::new("back", FailurePoint::Open)),
                Box::new(FileTarget::new(dir.path().join("combined.dcr"))),
                config(),
            )
            .unwrap_err();

        assert!(matches!(err, ConfigError::TargetUnwritable { stream: StreamKind::Back, .. }));
        assert_eq!(std::fs::read(&front_path).unwrap(), b"previous recording");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn configure_rejects_shared_targets_and_bad_config() {
        let coordinator = RecordingCoordinator::software(&config());
        let err = coordinator
            .configure(
                Box::new(MemoryTarget::new("same")),
                Box::new(MemoryTarget::new("same")),
                Box::new(MemoryTarget::new("combined")),
                config(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateTarget {
                first: StreamKind::Front,
                second: StreamKind::Back,
                target: "memory:same".into(),
            }
        );

        let mut nv12 = config();
        nv12.pixel_format = PixelFormat::Nv12;
        let targets = Targets::new();
        let err = coordinator
            .configure(
                Box::new(targets.front.clone()),
                Box::new(targets.back.clone()),
                Box::new(targets.combined.clone()),
                nv12,
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
        assert_eq!(coordinator.state(), RecordingState::Idle);
    }

    #[test]
    fn start_is_all_or_nothing() {
        let config = config();
        let coordinator = RecordingCoordinator::software(&config);
        let front_target = MemoryTarget::new("front");
        let back_target = MemoryTarget::new("back");
        coordinator
            .configure(
                Box::new(front_target.clone()),
                Box::new(back_target.clone()),
                Box::new(FailingTarget::new("combined", FailurePoint::WriteAfter(0))),
                config,
            )
            .unwrap();

        let err = coordinator.start(ms(0)).unwrap_err();
        assert!(matches!(
            err,
            RecordingError::EncoderStartFailed {
                stream: StreamKind::Combined,
                ..
            }
        ));
        assert!(front_target.is_discarded());
        assert!(back_target.is_discarded());
        assert!(matches!(coordinator.state(), RecordingState::Failed(_)));
        assert!(!coordinator.is_active());
        assert_eq!(coordinator.start(ms(0)), Err(RecordingError::NotConfigured));
    }

    #[test]
    fn protocol_errors() {
        let coordinator = RecordingCoordinator::software(&config());
        assert_eq!(coordinator.append_front(front(0)), Err(RecordingError::NotConfigured));
        assert_eq!(coordinator.append_audio(audio(0)), Err(RecordingError::NotConfigured));
        assert_eq!(coordinator.stop().unwrap_err(), RecordingError::NotConfigured);

        let targets = Targets::new();
        targets.bind(&coordinator, config());
        // configured but not started: appends are ignored
        assert_eq!(coordinator.append_back(back(0)), Ok(()));
        assert_eq!(coordinator.stop().unwrap_err(), RecordingError::NotActive);

        coordinator.start(ms(0)).unwrap();
        assert_eq!(coordinator.start(ms(0)), Err(RecordingError::AlreadyActive));
        let again = Targets::new();
        let err = coordinator
            .configure(
                Box::new(again.front.clone()),
                Box::new(again.back.clone()),
                Box::new(again.combined.clone()),
                config(),
            )
            .unwrap_err();
        assert_eq!(err, ConfigError::SessionActive);
    }

    #[test]
    fn invalid_samples_are_rejected() {
        let (coordinator, targets) = rig();
        coordinator.start(ms(0)).unwrap();

        let bgra = Frame::solid(8, 4, PixelFormat::Bgra8, [0; 4], ms(0), FrameSource::Front).unwrap();
        assert!(matches!(coordinator.append_front(bgra), Err(RecordingError::InvalidSample(_))));
        let oversized = Frame::solid(SIZE, SIZE, PixelFormat::Rgba8, [0; 4], ms(0), FrameSource::Back).unwrap();
        assert!(matches!(coordinator.append_back(oversized), Err(RecordingError::InvalidSample(_))));
        let mono = AudioChunk::silence(AudioFormat { sample_rate: 48_000, channels: 1 }, ms(0), Duration::from_millis(10));
        assert!(matches!(coordinator.append_audio(mono), Err(RecordingError::InvalidSample(_))));

        coordinator.append_front(front(0)).unwrap();
        coordinator.stop().unwrap();
        assert_eq!(video_pts(&targets.front.contents()), vec![ms(0)]);
    }

    #[test]
    fn slow_composition_drops_the_tick() {
        let mut config = config();
        config.frame_rate = 30;
        let slow = SlowCompositor::new(TransformCompositor::from_config(SoftwareBackend::new(), &config), Duration::from_millis(300));
        let mut coordinator = RecordingCoordinator::new(slow);
        let events = Arc::new(EventLog::default());
        coordinator.set_delegate(events.clone());
        let targets = Targets::new();
        targets.bind(&coordinator, config);

        coordinator.start(ms(0)).unwrap();
        coordinator.append_front(front(0)).unwrap();
        let begun = Instant::now();
        coordinator.append_back(back(0)).unwrap();
        assert!(begun.elapsed() < Duration::from_millis(250));

        let outputs = coordinator.stop().unwrap();
        assert_eq!(outputs.diagnostics.composites_dropped_timeout, 1);
        assert_eq!(outputs.diagnostics.back_frames_written, 1);
        assert!(video_pts(&targets.combined.contents()).is_empty());
        assert!(events.events().contains(&Event::Dropped(DropReason::CompositorTimeout)));
    }

    #[test]
    fn pair_average_anchor() {
        let mut config = config();
        config.timestamp_anchor = TimestampAnchor::PairAverage;
        let coordinator = RecordingCoordinator::software(&config);
        let targets = Targets::new();
        targets.bind(&coordinator, config);

        coordinator.start(ms(0)).unwrap();
        coordinator.append_front(front(10)).unwrap();
        coordinator.append_back(back(30)).unwrap();
        coordinator.stop().unwrap();

        assert_eq!(video_pts(&targets.combined.contents()), vec![ms(20)]);
    }

    #[test]
    fn file_outputs_get_metadata_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.write_metadata_sidecars = true;
        let coordinator = RecordingCoordinator::software(&config);
        coordinator
            .configure(
                Box::new(FileTarget::new(dir.path().join("front.dcr"))),
                Box::new(FileTarget::new(dir.path().join("back.dcr"))),
                Box::new(FileTarget::new(dir.path().join("combined.dcr"))),
                config,
            )
            .unwrap();

        coordinator.start(ms(0)).unwrap();
        coordinator.append_front(front(0)).unwrap();
        coordinator.append_back(back(0)).unwrap();
        coordinator.append_audio(audio(0)).unwrap();
        let outputs = coordinator.stop().unwrap();

        for output in outputs.succeeded() {
            let path = output.handle.as_path().unwrap();
            let bytes = std::fs::read(path).unwrap();
            let digest: String = Sha256::digest(&bytes).iter().map(|b| format!("{:02x}", b)).collect();
            assert_eq!(output.checksum, digest);

            let metadata = read_metadata(path).unwrap();
            assert_eq!(metadata.stream, output.kind);
            assert_eq!(metadata.recording_id, outputs.recording_id);
            assert_eq!(metadata.video_frames, 1);
            let expected = if output.kind == StreamKind::Combined { (SIZE, SIZE) } else { (8, 4) };
            assert_eq!((metadata.width, metadata.height), expected);
            assert_eq!(metadata.layout.is_some(), output.kind == StreamKind::Combined);
        }
        assert_eq!(outputs.succeeded().count(), 3);
    }

    #[test]
    fn delegate_sees_lifecycle() {
        let config = config();
        let mut coordinator = RecordingCoordinator::software(&config);
        let events = Arc::new(EventLog::default());
        coordinator.set_delegate(events.clone());
        let targets = Targets::new();
        targets.bind(&coordinator, config);

        coordinator.start(ms(0)).unwrap();
        coordinator.stop().unwrap();

        assert_eq!(
            events.states(),
            vec!["configuring", "ready", "writing", "draining", "finalizing", "closed"]
        );
        assert_eq!(events.events().last(), Some(&Event::Finished));
    }

    #[test]
    fn reconfigure_after_stop() {
        let (coordinator, _first) = rig();
        coordinator.start(ms(0)).unwrap();
        let first = coordinator.stop().unwrap();
        assert_eq!(coordinator.start(ms(0)), Err(RecordingError::NotConfigured));

        let second_targets = Targets::new();
        second_targets.bind(&coordinator, config());
        coordinator.start(ms(1_000)).unwrap();
        assert_eq!(coordinator.recording_start(), Some(ms(1_000)));
        coordinator.append_front(front(1_000)).unwrap();
        let second = coordinator.stop().unwrap();

        assert_ne!(first.recording_id, second.recording_id);
        assert_eq!(second.recording_start, ms(1_000));
        assert_eq!(video_pts(&second_targets.front.contents()), vec![ms(1_000)]);
    }
}
