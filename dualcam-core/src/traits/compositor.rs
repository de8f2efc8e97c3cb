use crate::models::error::CompositorError;
use crate::models::layout::Layout;
use crate::models::media::Frame;
use crate::processing::geometry::{Canvas, Rect};

/// Combines a front and a back frame into one output frame.
///
/// Pure with respect to recording state. Implementations may keep a GPU
/// context or a buffer pool internally. The output carries the back frame's
/// timestamp; the coordinator re-stamps it according to its anchor policy.
pub trait Compositor: Send + Sync {
    fn compose(&self, front: &Frame, back: &Frame, layout: &Layout) -> Result<Frame, CompositorError>;
}

/// Image transforms a compositor is built from.
///
/// A GPU implementation and the software fallback satisfy the same
/// contract, so composition can be tested without hardware.
pub trait ImageBackend: Send + Sync {
    /// Resample `frame` to exactly `width` x `height`.
    fn scale(&self, frame: &Frame, width: u32, height: u32) -> Result<Frame, CompositorError>;

    /// Cut `region` out of `frame`. The region must lie inside the frame.
    fn crop(&self, frame: &Frame, region: Rect) -> Result<Frame, CompositorError>;

    /// Flip `frame` horizontally.
    fn mirror(&self, frame: &Frame) -> Result<Frame, CompositorError>;

    /// Alpha-blend `layer` over `canvas` with its top-left corner at
    /// (`x`, `y`), clipping whatever falls outside the canvas.
    fn composite_over(&self, canvas: &mut Canvas, layer: &Frame, x: u32, y: u32) -> Result<(), CompositorError>;

    fn name(&self) -> &str;
}
