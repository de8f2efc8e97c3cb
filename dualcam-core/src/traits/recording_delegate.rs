use crate::models::diagnostics::DropReason;
use crate::models::error::RecordingError;
use crate::models::media::StreamKind;
use crate::models::recording_result::RecordingOutputs;
use crate::models::state::RecordingState;

/// Event delegate for recording notifications.
///
/// Called from whichever delivery thread triggered the event, never while
/// the coordinator's lock is held. Implementations should marshal to a UI
/// thread if needed.
pub trait RecordingDelegate: Send + Sync {
    /// Called when the coordinator state changes.
    fn on_state_changed(&self, state: &RecordingState);

    /// Called when a combined frame is dropped for a tick.
    fn on_composite_dropped(&self, reason: &DropReason) {
        let _ = reason;
    }

    /// Called once when a stream fails; the other streams keep recording.
    fn on_stream_failed(&self, stream: StreamKind, error: &RecordingError);

    /// Called when `stop` has finalized every stream.
    fn on_recording_finished(&self, outputs: &RecordingOutputs);
}
