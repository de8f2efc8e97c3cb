use image::imageops::{self, FilterType};
use image::{GenericImage, ImageBuffer, Rgba, RgbaImage};

use crate::models::error::CompositorError;
use crate::models::media::Frame;
use crate::processing::geometry::{Canvas, Rect};
use crate::traits::compositor::ImageBackend;

/// CPU implementation of the image transforms, built on the `image` crate.
///
/// Works on any packed 32-bit format: the channel order is carried through
/// untouched, so BGRA input produces BGRA output.
#[derive(Debug, Clone, Copy)]
pub struct SoftwareBackend {
    filter: FilterType,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            filter: FilterType::Triangle,
        }
    }

    /// Use a different resampling filter (e.g. `Nearest` for speed).
    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn view(frame: &Frame) -> Result<ImageBuffer<Rgba<u8>, &[u8]>, CompositorError> {
    if !frame.pixel_format().is_packed_32bit() {
        return Err(CompositorError::InvalidInput(format!(
            "software backend needs a 32-bit packed frame, got {:?}",
            frame.pixel_format()
        )));
    }
    ImageBuffer::from_raw(frame.width(), frame.height(), frame.data())
        .ok_or_else(|| CompositorError::InvalidInput("frame buffer smaller than its dimensions".into()))
}

fn into_frame(image: RgbaImage, like: &Frame) -> Result<Frame, CompositorError> {
    let (width, height) = image.dimensions();
    Frame::new(image.into_raw(), width, height, like.pixel_format(), like.timestamp(), like.source())
        .map_err(|e| CompositorError::Backend(e.to_string()))
}

impl ImageBackend for SoftwareBackend {
    fn scale(&self, frame: &Frame, width: u32, height: u32) -> Result<Frame, CompositorError> {
        if width == 0 || height == 0 {
            return Err(CompositorError::InvalidInput(format!("cannot scale to {}x{}", width, height)));
        }
        if frame.width() == width && frame.height() == height {
            return Ok(frame.clone());
        }
        let source = view(frame)?;
        into_frame(imageops::resize(&source, width, height, self.filter), frame)
    }

    fn crop(&self, frame: &Frame, region: Rect) -> Result<Frame, CompositorError> {
        let bounds = Rect::new(0, 0, frame.width(), frame.height());
        if region.width == 0 || region.height == 0 || !bounds.encloses(&region) {
            return Err(CompositorError::InvalidInput(format!(
                "crop {:?} outside {}x{} frame",
                region,
                frame.width(),
                frame.height()
            )));
        }
        if region == bounds {
            return Ok(frame.clone());
        }
        let source = view(frame)?;
        let window = imageops::crop_imm(&source, region.x, region.y, region.width, region.height);
        // `SubImage::to_image` needs a 'static source, so copy out of the view.
        let mut cropped = RgbaImage::new(region.width, region.height);
        cropped
            .copy_from(&*window, 0, 0)
            .map_err(|e| CompositorError::Backend(e.to_string()))?;
        into_frame(cropped, frame)
    }

    fn mirror(&self, frame: &Frame) -> Result<Frame, CompositorError> {
        let source = view(frame)?;
        into_frame(imageops::flip_horizontal(&source), frame)
    }

    fn composite_over(&self, canvas: &mut Canvas, layer: &Frame, x: u32, y: u32) -> Result<(), CompositorError> {
        if layer.pixel_format() != canvas.pixel_format() {
            return Err(CompositorError::InvalidInput(format!(
                "layer format {:?} does not match canvas {:?}",
                layer.pixel_format(),
                canvas.pixel_format()
            )));
        }
        let source = view(layer)?;
        let (width, height) = (canvas.width(), canvas.height());
        let mut target: ImageBuffer<Rgba<u8>, &mut [u8]> = ImageBuffer::from_raw(width, height, canvas.bytes_mut())
            .ok_or_else(|| CompositorError::InvalidInput("canvas buffer smaller than its dimensions".into()))?;
        imageops::overlay(&mut target, &source, x as i64, y as i64);
        Ok(())
    }

    fn name(&self) -> &str {
        "software"
    }
}
