use std::borrow::Cow;
use std::time::Duration;

use crate::models::config::{FrameSize, RecordingConfiguration};
use crate::models::error::CompositorError;
use crate::models::layout::Layout;
use crate::models::media::{CameraPosition, Frame, FrameSource, PixelFormat};
use crate::processing::frame_pool::FramePool;
use crate::processing::geometry::{aspect_fill, placements, Canvas, Rect};
use crate::traits::compositor::{Compositor, ImageBackend};

/// Compositor built from an `ImageBackend`'s scale / crop / mirror /
/// composite-over primitives.
///
/// Each camera is mirrored (front only, when enabled), aspect-filled into
/// its region and copied onto a canvas drawn from a bounded `FramePool`.
pub struct TransformCompositor<B: ImageBackend> {
    backend: B,
    output: FrameSize,
    pixel_format: PixelFormat,
    mirror_front: bool,
    pool: FramePool,
    pool_wait: Duration,
}

impl<B: ImageBackend> TransformCompositor<B> {
    pub fn new(backend: B, output: FrameSize, pixel_format: PixelFormat, pool_size: usize) -> Self {
        Self {
            backend,
            output,
            pixel_format,
            mirror_front: false,
            pool: FramePool::new(pool_size, pixel_format.buffer_len(output.width, output.height)),
            pool_wait: Duration::from_millis(5),
        }
    }

    /// Compositor sized and tuned from a recording configuration.
    pub fn from_config(backend: B, config: &RecordingConfiguration) -> Self {
        Self::new(backend, config.frame_size, config.pixel_format, config.pool_size)
            .with_mirror_front(config.mirror_front)
            .with_pool_wait(config.pool_wait())
    }

    pub fn with_mirror_front(mut self, mirror_front: bool) -> Self {
        self.mirror_front = mirror_front;
        self
    }

    pub fn with_pool_wait(mut self, pool_wait: Duration) -> Self {
        self.pool_wait = pool_wait;
        self
    }

    pub fn output_size(&self) -> FrameSize {
        self.output
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Produce the layer for one camera: mirrored if needed, scaled to cover
    /// `region`, overflow cropped.
    fn render_layer(&self, frame: &Frame, camera: CameraPosition, region: Rect) -> Result<Frame, CompositorError> {
        let source: Cow<'_, Frame> = if camera == CameraPosition::Front && self.mirror_front {
            Cow::Owned(self.backend.mirror(frame)?)
        } else {
            Cow::Borrowed(frame)
        };

        let plan = aspect_fill(source.width(), source.height(), region.width, region.height);
        let scaled = self.backend.scale(&source, plan.scaled_width, plan.scaled_height)?;
        if plan.is_exact() {
            Ok(scaled)
        } else {
            self.backend.crop(&scaled, plan.crop)
        }
    }

    fn check_input(&self, frame: &Frame, camera: &str) -> Result<(), CompositorError> {
        if frame.pixel_format() != self.pixel_format {
            return Err(CompositorError::InvalidInput(format!(
                "{} frame is {:?}, compositor expects {:?}",
                camera,
                frame.pixel_format(),
                self.pixel_format
            )));
        }
        Ok(())
    }
}

impl<B: ImageBackend> Compositor for TransformCompositor<B> {
    fn compose(&self, front: &Frame, back: &Frame, layout: &Layout) -> Result<Frame, CompositorError> {
        self.check_input(front, "front")?;
        self.check_input(back, "back")?;

        let buffer = self.pool.acquire(self.pool_wait)?;
        let mut canvas = Canvas::new(buffer, self.output.width, self.output.height, self.pixel_format)?;

        for placement in placements(layout, self.output) {
            let source = match placement.camera {
                CameraPosition::Front => front,
                CameraPosition::Back => back,
            };
            let layer = self.render_layer(source, placement.camera, placement.region)?;
            self.backend
                .composite_over(&mut canvas, &layer, placement.region.x, placement.region.y)?;
        }

        canvas.into_frame(back.timestamp(), FrameSource::Composite)
    }
}
