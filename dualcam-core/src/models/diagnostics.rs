use std::fmt;

use super::error::CompositorError;

/// Why a combined frame was not produced for a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The compose worker was still busy with an earlier pair.
    CompositorBusy,
    /// Composition did not finish within one frame interval.
    CompositorTimeout,
    /// The compositor reported a failure.
    Compositor(CompositorError),
    /// The composed frame would move the combined track backwards.
    OutOfOrder,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompositorBusy => f.write_str("compositor busy"),
            Self::CompositorTimeout => f.write_str("composition exceeded frame interval"),
            Self::Compositor(err) => write!(f, "{}", err),
            Self::OutOfOrder => f.write_str("composed frame out of order"),
        }
    }
}

/// Counters for debugging a recording.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingDiagnostics {
    pub front_frames_received: u64,
    pub back_frames_received: u64,
    pub audio_chunks_received: u64,
    pub front_frames_written: u64,
    pub back_frames_written: u64,
    pub composed_frames_written: u64,
    pub audio_chunks_written: u64,
    pub composites_without_front: u64,
    pub composites_dropped_busy: u64,
    pub composites_dropped_timeout: u64,
    pub composites_dropped_error: u64,
    pub composites_dropped_out_of_order: u64,
    pub samples_rejected: u64,
    pub in_flight_high_water: usize,
}

impl RecordingDiagnostics {
    pub(crate) fn record_drop(&mut self, reason: &DropReason) {
        match reason {
            DropReason::CompositorBusy => self.composites_dropped_busy += 1,
            DropReason::CompositorTimeout => self.composites_dropped_timeout += 1,
            DropReason::Compositor(_) => self.composites_dropped_error += 1,
            DropReason::OutOfOrder => self.composites_dropped_out_of_order += 1,
        }
    }

    pub fn composites_dropped(&self) -> u64 {
        self.composites_dropped_busy
            + self.composites_dropped_timeout
            + self.composites_dropped_error
            + self.composites_dropped_out_of_order
    }
}
