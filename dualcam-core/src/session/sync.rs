//! Synchronization policy.
//!
//! Reconciles independently arriving video and audio timestamps into
//! monotonic per-writer session boundaries:
//! - every writer starts at the shared recording start,
//! - a track never moves backwards,
//! - a writer ends at the earlier of its last video and last audio sample,
//!   so neither track runs past the other in the finalized output.

use crate::models::config::TimestampAnchor;
use crate::models::error::EncoderError;
use crate::models::media::Timestamp;

/// Timing state of one writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackClock {
    session_start: Option<Timestamp>,
    last_video: Option<Timestamp>,
    last_audio: Option<Timestamp>,
}

impl TrackClock {
    pub fn started_at(at: Timestamp) -> Self {
        Self {
            session_start: Some(at),
            last_video: None,
            last_audio: None,
        }
    }

    pub fn session_start(&self) -> Option<Timestamp> {
        self.session_start
    }

    pub fn last_video(&self) -> Option<Timestamp> {
        self.last_video
    }

    pub fn last_audio(&self) -> Option<Timestamp> {
        self.last_audio
    }

    pub fn admit_video(&self, pts: Timestamp) -> Result<(), EncoderError> {
        self.admit(pts, self.last_video)
    }

    pub fn admit_audio(&self, pts: Timestamp) -> Result<(), EncoderError> {
        self.admit(pts, self.last_audio)
    }

    pub fn record_video(&mut self, pts: Timestamp) {
        self.last_video = Some(pts);
    }

    pub fn record_audio(&mut self, pts: Timestamp) {
        self.last_audio = Some(pts);
    }

    /// Where this writer's session ends.
    pub fn session_end(&self) -> Timestamp {
        session_end(
            self.session_start.unwrap_or(Timestamp::ZERO),
            self.last_video,
            self.last_audio,
        )
    }

    fn admit(&self, pts: Timestamp, last: Option<Timestamp>) -> Result<(), EncoderError> {
        if let Some(start) = self.session_start {
            if pts < start {
                return Err(EncoderError::BeforeSessionStart {
                    pts_us: pts.as_micros(),
                    start_us: start.as_micros(),
                });
            }
        }
        match last {
            Some(last) if pts < last => Err(EncoderError::NonMonotonic {
                pts_us: pts.as_micros(),
                last_us: last.as_micros(),
            }),
            _ => Ok(()),
        }
    }
}

/// End of a writer's session: `min(last_video, last_audio)` when both
/// tracks have samples, the one that exists otherwise, and the start itself
/// for an empty session.
pub fn session_end(start: Timestamp, last_video: Option<Timestamp>, last_audio: Option<Timestamp>) -> Timestamp {
    let end = match (last_video, last_audio) {
        (Some(video), Some(audio)) => video.min(audio),
        (Some(video), None) => video,
        (None, Some(audio)) => audio,
        (None, None) => start,
    };
    end.max(start)
}

/// Timestamp a composed frame is written at.
pub fn composite_timestamp(anchor: TimestampAnchor, front: Timestamp, back: Timestamp) -> Timestamp {
    match anchor {
        TimestampAnchor::Back => back,
        TimestampAnchor::PairAverage => front.midpoint(back),
    }
}
