//! Camera frame sequences.
//!
//! Frames are stored one file per timestep with names such as `im_0.jpg`,
//! `im_1.jpg`, ..., `im_10.jpg`, so they are ordered with a natural
//! (numeric-aware) comparator rather than lexicographically.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use tracing::debug;

/// A decoded RGB frame, shared between steps when it is a placeholder.
pub type Frame = Arc<RgbImage>;

/// File extensions recognised as frames.
const IMAGE_EXTENSIONS: [&str; 3] = [".png", ".jpg", ".jpeg"];

/// Pixel value used in every channel of a placeholder frame.
pub const PLACEHOLDER_VALUE: u8 = 1;

/// Height and width every frame is normalized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameShape {
    pub height: u32,
    pub width: u32,
}

impl FrameShape {
    /// Number of bytes in one RGB frame of this shape.
    pub fn byte_len(&self) -> usize {
        self.height as usize * self.width as usize * 3
    }
}

impl Default for FrameShape {
    fn default() -> Self {
        Self {
            height: 480,
            width: 640,
        }
    }
}

/// Frame substituted for a camera that was not recorded.
pub fn placeholder_frame(shape: FrameShape) -> Frame {
    Arc::new(RgbImage::from_pixel(
        shape.width,
        shape.height,
        Rgb([PLACEHOLDER_VALUE; 3]),
    ))
}

/// Whether a file name carries one of the recognised image extensions.
pub fn is_image_file(name: &str) -> bool {
    IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Numeric-aware, case-insensitive comparison: `im2.png` < `im10.png`.
pub fn compare_natural(a: &str, b: &str) -> Ordering {
    natord::compare_ignore_case(a, b)
}

/// Sort file names in temporal order.
pub fn sort_natural(names: &mut [String]) {
    names.sort_by(|a, b| compare_natural(a, b));
}

/// List the frame files of an image directory in temporal order.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list image directory {}", dir.display()))?
    {
        let entry = entry
            .with_context(|| format!("Failed to read entry in {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_image_file(&name) {
            names.push(name);
        }
    }
    sort_natural(&mut names);
    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}

/// Decode one frame as RGB8, resizing it when it does not match `shape`.
pub fn load_frame(path: &Path, shape: FrameShape) -> Result<RgbImage> {
    let frame = image::open(path)
        .with_context(|| format!("Failed to decode image {}", path.display()))?
        .to_rgb8();

    if frame.height() == shape.height && frame.width() == shape.width {
        return Ok(frame);
    }

    debug!(
        path = %path.display(),
        from_h = frame.height(),
        from_w = frame.width(),
        to_h = shape.height,
        to_w = shape.width,
        "resizing frame"
    );
    Ok(image::imageops::resize(
        &frame,
        shape.width,
        shape.height,
        FilterType::Triangle,
    ))
}

/// Decode every frame of an image directory, in temporal order.
pub fn load_sequence(dir: &Path, shape: FrameShape) -> Result<Vec<Frame>> {
    let frames = list_frames(dir)?
        .iter()
        .map(|path| load_frame(path, shape).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;
    debug!(dir = %dir.display(), frames = frames.len(), "loaded image sequence");
    Ok(frames)
}
