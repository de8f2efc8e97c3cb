use sha2::{Digest, Sha256};

use crate::models::config::{FrameSize, RecordingConfiguration};
use crate::models::error::EncoderError;
use crate::models::media::{AudioChunk, AudioFormat, Frame, PixelFormat, StreamKind, Timestamp};
use crate::models::recording_result::OutputHandle;
use crate::models::state::EncoderState;
use crate::session::sync::TrackClock;
use crate::storage::container::{
    encode_trailer, ContainerHeader, IndexEntry, PacketHeader, TrackKind, VideoCodec,
};
use crate::traits::writable::Writable;

/// Track layout of one output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    pub stream: StreamKind,
    pub frame_size: FrameSize,
    pub pixel_format: PixelFormat,
    pub bitrate: u32,
    pub codec: VideoCodec,
    /// Only the combined stream carries audio.
    pub audio: Option<AudioFormat>,
}

impl EncoderSettings {
    pub fn for_stream(stream: StreamKind, config: &RecordingConfiguration) -> Self {
        Self {
            stream,
            frame_size: config.stream_size(stream),
            pixel_format: config.pixel_format,
            bitrate: config.bitrate,
            codec: VideoCodec::Raw,
            audio: (stream == StreamKind::Combined).then_some(config.audio),
        }
    }
}

/// Result of a successful finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedStream {
    pub handle: OutputHandle,
    pub session_start: Timestamp,
    pub session_end: Timestamp,
    pub video_frames: u64,
    pub audio_chunks: u64,
    pub bytes_written: u64,
    pub checksum: String,
}

/// One output stream: a video track, optionally an audio track, written as
/// a container into a `Writable`.
///
/// Owned exclusively by the recording session; never shared.
pub struct StreamEncoder {
    settings: EncoderSettings,
    target: Box<dyn Writable>,
    state: EncoderState,
    target_open: bool,
    clock: TrackClock,
    index: Vec<IndexEntry>,
    hasher: Sha256,
    bytes_written: u64,
    failure: Option<EncoderError>,
}

impl StreamEncoder {
    pub fn new(settings: EncoderSettings, target: Box<dyn Writable>) -> Self {
        Self {
            settings,
            target,
            state: EncoderState::Idle,
            target_open: false,
            clock: TrackClock::default(),
            index: Vec::new(),
            hasher: Sha256::new(),
            bytes_written: 0,
            failure: None,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.settings.stream
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn handle(&self) -> OutputHandle {
        self.target.handle()
    }

    pub fn clock(&self) -> &TrackClock {
        &self.clock
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// The error that moved this encoder to `Failed`, if any.
    pub fn failure(&self) -> Option<&EncoderError> {
        self.failure.as_ref()
    }

    /// Claim the output location. Called at configure time.
    pub fn prepare(&mut self) -> Result<(), EncoderError> {
        if self.state != EncoderState::Idle {
            return Err(EncoderError::InvalidState(self.state.name()));
        }
        self.target.open()?;
        self.target_open = true;
        Ok(())
    }

    /// Start the write session at `at`. Transitions: idle → writing.
    pub fn begin(&mut self, at: Timestamp) -> Result<(), EncoderError> {
        if self.state != EncoderState::Idle || !self.target_open {
            return Err(EncoderError::InvalidState(self.state.name()));
        }

        let header = ContainerHeader {
            stream: self.settings.stream,
            width: self.settings.frame_size.width,
            height: self.settings.frame_size.height,
            pixel_format: self.settings.pixel_format,
            codec: self.settings.codec,
            bitrate: self.settings.bitrate,
            session_start: at,
            audio: self.settings.audio,
        };
        if let Err(e) = self.write_raw(&header.encode()) {
            return Err(self.fail(e));
        }

        self.clock = TrackClock::started_at(at);
        self.state = EncoderState::Writing;
        log::debug!("{} encoder writing to {} from {}", self.kind(), self.handle(), at);
        Ok(())
    }

    /// Append one video frame.
    ///
    /// Samples that violate ordering or format are rejected without harming
    /// the stream (`EncoderError::is_sample_rejection`); target I/O failures
    /// move the encoder to `Failed`.
    pub fn append_video(&mut self, frame: &Frame) -> Result<(), EncoderError> {
        self.require_writing()?;
        if frame.pixel_format() != self.settings.pixel_format {
            return Err(EncoderError::FormatMismatch(format!(
                "{} stream expects {:?}, got {:?}",
                self.kind(),
                self.settings.pixel_format,
                frame.pixel_format()
            )));
        }
        let size = self.settings.frame_size;
        if (frame.width(), frame.height()) != (size.width, size.height) {
            return Err(EncoderError::FormatMismatch(format!(
                "{} stream expects {}x{} frames, got {}x{}",
                self.kind(),
                size.width,
                size.height,
                frame.width(),
                frame.height()
            )));
        }
        let pts = frame.timestamp();
        self.clock.admit_video(pts)?;

        let packet = PacketHeader::video(
            frame.pixel_format(),
            frame.width(),
            frame.height(),
            pts,
            frame.data().len() as u32,
        );
        self.write_packet(packet, frame.data())?;
        self.clock.record_video(pts);
        Ok(())
    }

    /// Append one audio chunk to the audio track.
    pub fn append_audio(&mut self, chunk: &AudioChunk) -> Result<(), EncoderError> {
        self.require_writing()?;
        let Some(format) = self.settings.audio else {
            return Err(EncoderError::NoAudioTrack);
        };
        if chunk.format() != format {
            return Err(EncoderError::FormatMismatch(format!(
                "audio track expects {:?}, got {:?}",
                format,
                chunk.format()
            )));
        }
        let pts = chunk.timestamp();
        self.clock.admit_audio(pts)?;

        let packet = PacketHeader::audio(pts, chunk.duration().as_micros() as i64, chunk.data().len() as u32);
        self.write_packet(packet, chunk.data())?;
        self.clock.record_audio(pts);
        Ok(())
    }

    /// End of this writer's session under the synchronization policy.
    pub fn session_end(&self) -> Timestamp {
        self.clock.session_end()
    }

    /// Finalize the stream at `end`. Transitions: writing → finishing →
    /// closed, or → failed with the partial output discarded.
    ///
    /// Packets later than `end` stay out of the index and are never
    /// presented.
    pub fn finish(&mut self, end: Timestamp) -> Result<FinishedStream, EncoderError> {
        if self.state == EncoderState::Failed {
            self.discard();
            let failure = self
                .failure
                .clone()
                .unwrap_or(EncoderError::InvalidState(EncoderState::Failed.name()));
            return Err(failure);
        }
        self.require_writing()?;
        self.state = EncoderState::Finishing;

        let session_start = self.clock.session_start().unwrap_or(end);
        let end = end.max(session_start);
        let presented: Vec<IndexEntry> = self.index.iter().copied().filter(|e| e.pts <= end).collect();
        let trailer = encode_trailer(&presented, self.bytes_written, end);

        let finalized = self
            .write_raw(&trailer)
            .and_then(|_| self.target.flush().map_err(EncoderError::from))
            .and_then(|_| self.target.close().map_err(EncoderError::from));
        if let Err(e) = finalized {
            let err = self.fail(e);
            self.discard();
            return Err(err);
        }

        self.state = EncoderState::Closed;
        let video_frames = presented.iter().filter(|e| e.track == TrackKind::Video).count() as u64;
        let checksum = hex_encode(&self.hasher.clone().finalize());
        log::info!(
            "{} stream finalized: {} video / {} audio packets, {} bytes",
            self.kind(),
            video_frames,
            presented.len() as u64 - video_frames,
            self.bytes_written
        );

        Ok(FinishedStream {
            handle: self.target.handle(),
            session_start,
            session_end: end,
            video_frames,
            audio_chunks: presented.len() as u64 - video_frames,
            bytes_written: self.bytes_written,
            checksum,
        })
    }

    /// Abandon the stream and remove its output.
    pub fn abort(&mut self) {
        if self.state != EncoderState::Closed {
            self.state = EncoderState::Failed;
        }
        self.discard();
    }

    fn discard(&mut self) {
        if !self.target_open {
            return;
        }
        if let Err(e) = self.target.discard() {
            log::warn!("Failed to remove partial {} output {}: {}", self.kind(), self.handle(), e);
        }
        self.target_open = false;
    }

    fn require_writing(&self) -> Result<(), EncoderError> {
        if self.state != EncoderState::Writing {
            return Err(EncoderError::InvalidState(self.state.name()));
        }
        Ok(())
    }

    fn write_packet(&mut self, packet: PacketHeader, payload: &[u8]) -> Result<(), EncoderError> {
        let offset = self.bytes_written;
        let written = self
            .write_raw(&packet.encode())
            .and_then(|_| self.write_raw(payload));
        if let Err(e) = written {
            return Err(self.fail(e));
        }
        self.index.push(IndexEntry {
            offset,
            pts: packet.pts,
            track: packet.track,
            payload_len: packet.payload_len,
        });
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), EncoderError> {
        self.target.write_all(data)?;
        self.hasher.update(data);
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn fail(&mut self, err: EncoderError) -> EncoderError {
        log::error!("{} encoder failed: {}", self.kind(), err);
        self.state = EncoderState::Failed;
        self.failure = Some(err.clone());
        err
    }
}

impl Drop for StreamEncoder {
    /// An encoder dropped before it was finalized leaves no output behind.
    fn drop(&mut self) {
        if self.target_open && self.state != EncoderState::Closed {
            self.abort();
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
