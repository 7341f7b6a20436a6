//! Frames and decoded pixel buffers.
//!
//! - `FrameDescriptor`: what the scheduler hands to a worker. Moved, never shared.
//! - `PixelBuffer`: a decoded RGB frame. While it is alive it holds an
//!   admission permit, so the number of resident decoded frames is bounded
//!   by the admission gate rather than by the size of the input directory.

use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::error::FrameError;
use crate::pipeline::admission::Permit;

/// One input frame, as discovered by the frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Stable index assigned in discovery order.
    pub index: u64,
    /// Path of the image file.
    pub path: PathBuf,
    /// Path relative to the scanned root. Used to mirror output layout.
    pub relative_path: PathBuf,
    /// `(width, height)`, known only after decode.
    pub dimensions: Option<(u32, u32)>,
}

impl FrameDescriptor {
    pub fn new(index: u64, path: PathBuf, relative_path: PathBuf) -> Self {
        Self {
            index,
            path,
            relative_path,
            dimensions: None,
        }
    }

    /// Record decoded dimensions. Consumes the descriptor so the owning
    /// worker is the only one who can do it.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Some((width, height));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Decoded RGB frame passed to detector backends.
pub struct PixelBuffer {
    image: RgbImage,
    // Released when the buffer is dropped, including when a timed-out
    // detector call finally lets go of it.
    _permit: Option<Permit>,
}

impl PixelBuffer {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            _permit: None,
        }
    }

    pub(crate) fn with_permit(image: RgbImage, permit: Permit) -> Self {
        Self {
            image,
            _permit: Some(permit),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Interleaved RGB8 bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Decode an image file to RGB8. The format is sniffed from content, not
/// trusted from the extension.
pub fn decode_rgb(path: &Path) -> Result<RgbImage, FrameError> {
    let reader = image::ImageReader::open(path)
        .map_err(|e| FrameError::Decode(format!("{}: {}", path.display(), e)))?
        .with_guessed_format()
        .map_err(|e| FrameError::Decode(format!("{}: {}", path.display(), e)))?;
    let image = reader
        .decode()
        .map_err(|e| FrameError::Decode(format!("{}: {}", path.display(), e)))?;
    let rgb = image.into_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(FrameError::Decode(format!(
            "{}: image has zero area",
            path.display()
        )));
    }
    Ok(rgb)
}
