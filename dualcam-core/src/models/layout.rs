use serde::{Deserialize, Serialize};

use super::media::CameraPosition;

/// Corner of the output frame that hosts a picture-in-picture inset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// How the front and back frames are arranged in the combined stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layout {
    /// Two horizontal bands, each covering half the output height.
    Stacked { front_on_top: bool },

    /// Split screen, each camera covering half the output width.
    SideBySide { front_on_left: bool },

    /// `primary` fills the output; the other camera is an inset sized to
    /// `inset_fraction` of the output dimensions.
    PictureInPicture {
        inset_fraction: f64,
        corner: Corner,
        #[serde(default = "default_primary")]
        primary: CameraPosition,
    },
}

fn default_primary() -> CameraPosition {
    CameraPosition::Back
}

impl Default for Layout {
    fn default() -> Self {
        Self::Stacked { front_on_top: true }
    }
}

impl Layout {
    pub fn picture_in_picture(inset_fraction: f64, corner: Corner) -> Self {
        Self::PictureInPicture {
            inset_fraction,
            corner,
            primary: CameraPosition::Back,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Self::PictureInPicture { inset_fraction, .. } = self {
            if !(*inset_fraction > 0.0 && *inset_fraction < 1.0) {
                return Err(format!("inset fraction must be in (0, 1), got {}", inset_fraction));
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Stacked { .. } => "stacked",
            Self::SideBySide { .. } => "side_by_side",
            Self::PictureInPicture { .. } => "picture_in_picture",
        }
    }
}
