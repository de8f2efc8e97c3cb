//! Layout geometry for composition.
//!
//! Everything here is integer pixel math with no image data involved:
//! where each camera goes in the output, and how a source is scaled and
//! cropped so that it covers its region completely (aspect-fill).

use crate::models::config::FrameSize;
use crate::models::error::CompositorError;
use crate::models::layout::{Corner, Layout};
use crate::models::media::{CameraPosition, Frame, FrameSource, PixelBuffer, PixelFormat, Timestamp};

/// Distance in pixels between a picture-in-picture inset and the output
/// edges. Shrinks when the inset would not fit otherwise.
pub const PIP_MARGIN: u32 = 24;

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn encloses(&self, other: &Rect) -> bool {
        other.x >= self.x && other.y >= self.y && other.right() <= self.right() && other.bottom() <= self.bottom()
    }
}

/// Scale-then-crop recipe that makes a source cover a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillPlan {
    pub scaled_width: u32,
    pub scaled_height: u32,
    /// Centered window of the scaled image, sized exactly to the region.
    pub crop: Rect,
}

impl FillPlan {
    /// Whether the plan is a plain resize with nothing cropped.
    pub fn is_exact(&self) -> bool {
        self.crop.x == 0
            && self.crop.y == 0
            && self.crop.width == self.scaled_width
            && self.crop.height == self.scaled_height
    }
}

/// Aspect-fill: scale uniformly by the larger of the two axis ratios so the
/// source covers `dst_width` x `dst_height`, then crop the overflow evenly
/// from both sides. Never letterboxes.
pub fn aspect_fill(src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> FillPlan {
    let scale = f64::max(
        dst_width as f64 / src_width as f64,
        dst_height as f64 / src_height as f64,
    );
    // Rounding may land one pixel short of the region; the max() keeps
    // coverage at the cost of a sub-pixel stretch.
    let scaled_width = ((src_width as f64 * scale).round() as u32).max(dst_width);
    let scaled_height = ((src_height as f64 * scale).round() as u32).max(dst_height);

    FillPlan {
        scaled_width,
        scaled_height,
        crop: Rect::new(
            (scaled_width - dst_width) / 2,
            (scaled_height - dst_height) / 2,
            dst_width,
            dst_height,
        ),
    }
}

/// Where one camera is drawn in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub camera: CameraPosition,
    pub region: Rect,
}

/// Regions for both cameras, in draw order (later entries on top).
pub fn placements(layout: &Layout, output: FrameSize) -> [Placement; 2] {
    let FrameSize { width, height } = output;
    match *layout {
        Layout::Stacked { front_on_top } => {
            let top = Rect::new(0, 0, width, height / 2);
            let bottom = Rect::new(0, height / 2, width, height - height / 2);
            let (front, back) = if front_on_top { (top, bottom) } else { (bottom, top) };
            [
                Placement {
                    camera: CameraPosition::Front,
                    region: front,
                },
                Placement {
                    camera: CameraPosition::Back,
                    region: back,
                },
            ]
        }
        Layout::SideBySide { front_on_left } => {
            let left = Rect::new(0, 0, width / 2, height);
            let right = Rect::new(width / 2, 0, width - width / 2, height);
            let (front, back) = if front_on_left { (left, right) } else { (right, left) };
            [
                Placement {
                    camera: CameraPosition::Front,
                    region: front,
                },
                Placement {
                    camera: CameraPosition::Back,
                    region: back,
                },
            ]
        }
        Layout::PictureInPicture {
            inset_fraction,
            corner,
            primary,
        } => {
            let inset = inset_rect(output, inset_fraction, corner);
            let secondary = match primary {
                CameraPosition::Front => CameraPosition::Back,
                CameraPosition::Back => CameraPosition::Front,
            };
            [
                Placement {
                    camera: primary,
                    region: Rect::new(0, 0, width, height),
                },
                Placement {
                    camera: secondary,
                    region: inset,
                },
            ]
        }
    }
}

fn inset_rect(output: FrameSize, fraction: f64, corner: Corner) -> Rect {
    let inset_width = ((output.width as f64 * fraction).round() as u32).clamp(1, output.width);
    let inset_height = ((output.height as f64 * fraction).round() as u32).clamp(1, output.height);
    let margin_x = PIP_MARGIN.min(output.width - inset_width);
    let margin_y = PIP_MARGIN.min(output.height - inset_height);

    let left = margin_x;
    let right = output.width - inset_width - margin_x;
    let top = margin_y;
    let bottom = output.height - inset_height - margin_y;

    let (x, y) = match corner {
        Corner::TopLeft => (left, top),
        Corner::TopRight => (right, top),
        Corner::BottomLeft => (left, bottom),
        Corner::BottomRight => (right, bottom),
    };
    Rect::new(x, y, inset_width, inset_height)
}

/// Mutable output image a compositor draws into.
#[derive(Debug)]
pub struct Canvas {
    buffer: PixelBuffer,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl Canvas {
    pub fn new(buffer: PixelBuffer, width: u32, height: u32, pixel_format: PixelFormat) -> Result<Self, CompositorError> {
        let expected = pixel_format.buffer_len(width, height);
        if buffer.len() != expected {
            return Err(CompositorError::InvalidInput(format!(
                "canvas buffer is {} bytes, expected {}",
                buffer.len(),
                expected
            )));
        }
        Ok(Self {
            buffer,
            width,
            height,
            pixel_format,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    pub fn into_frame(self, timestamp: Timestamp, source: FrameSource) -> Result<Frame, CompositorError> {
        Frame::from_buffer(self.buffer, self.width, self.height, self.pixel_format, timestamp, source)
            .map_err(|e| CompositorError::InvalidInput(e.to_string()))
    }
}
