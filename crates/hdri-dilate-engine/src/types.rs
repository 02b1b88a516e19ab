//! Shared types for the dilation engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference masks
/// without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `Rgb32FImage`, the floating-point pixel grid the engine
/// reads and writes.
pub use image::Rgb32FImage;

/// Re-export `RgbImage`, used for the 8-bit dilated-mask preview.
pub use image::RgbImage;

/// Per-pixel connected-component labels. `0` is background,
/// `1..=N` are the components of the saturation mask.
pub type LabelMap = image::ImageBuffer<image::Luma<u32>, Vec<u32>>;

/// Number of colour channels the engine operates on.
pub const CHANNELS: usize = 3;

/// Per-channel average of an image over a masked region.
pub type ChannelMean = [f32; CHANNELS];

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an image buffer.
    #[must_use]
    pub fn of<P: image::Pixel, C>(image: &image::ImageBuffer<P, C>) -> Self
    where
        C: std::ops::Deref<Target = [P::Subpixel]>,
    {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total pixel count (`width * height`).
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Storage order of the three colour channels in a loaded buffer.
///
/// Purely a layout flag: the algorithm treats channels symmetrically,
/// only the luminance weights used when building the saturation mask
/// depend on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    /// Red, green, blue.
    #[default]
    Rgb,
    /// Blue, green, red.
    Bgr,
}

impl ChannelOrder {
    /// Luminance weights for channels stored in this order.
    #[must_use]
    pub const fn luma_weights(self) -> [f32; CHANNELS] {
        match self {
            Self::Rgb => [0.299, 0.587, 0.114],
            Self::Bgr => [0.114, 0.587, 0.299],
        }
    }

    /// Reorder an RGB triple into this storage order (and back, since
    /// the swap is its own inverse).
    #[must_use]
    pub const fn arrange<T: Copy>(self, rgb: [T; CHANNELS]) -> [T; CHANNELS] {
        match self {
            Self::Rgb => rgb,
            Self::Bgr => [rgb[2], rgb[1], rgb[0]],
        }
    }
}

/// File format a source image was decoded from.
///
/// Carried through the run untouched so the writer can round-trip the
/// output into the same format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    /// OpenEXR (`.exr`).
    OpenExr,
    /// Radiance RGBE (`.hdr`).
    Radiance,
}

/// A decoded source image as handed to the engine by an [`ImageLoader`].
///
/// [`ImageLoader`]: crate::supervisor::ImageLoader
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Pixel data, channels in the requested [`ChannelOrder`].
    pub image: Rgb32FImage,
    /// Format token for round-tripping on save.
    pub format: SourceFormat,
}

/// The four images produced by a run.
///
/// Only complete when the run finished normally; a cancelled run hands
/// back the same structure with whatever compositing had been done.
#[derive(Debug, Clone)]
pub struct OutputBundle {
    /// Binarized saturation mask (0 / 255).
    pub threshold_mask: GrayImage,
    /// Union of every converged (and possibly blurred) component mask,
    /// binarized to 0 / 255. Visualization only.
    pub dilated_mask: GrayImage,
    /// The untouched source pixels.
    pub original: Rgb32FImage,
    /// The source with each converged region flattened to its mean.
    pub processed: Rgb32FImage,
    /// Format of the source file.
    pub format: SourceFormat,
}

impl OutputBundle {
    /// Dimensions shared by all four images.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.original)
    }
}

/// Problems with the source image, detected before any processing.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// The source path does not exist.
    #[error("the specified path does not exist: {}", .0.display())]
    NotFound(PathBuf),

    /// The source exists but could not be read or decoded.
    #[error("failed to read {}: {reason}", path.display())]
    Unreadable {
        /// Path that failed.
        path: PathBuf,
        /// Underlying decoder or filesystem message.
        reason: String,
    },

    /// The file extension names a format the loader does not support.
    #[error("unsupported image format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// The decoded image has no pixels.
    #[error("unsupported image shape {width}x{height}")]
    UnsupportedShape {
        /// Decoded width.
        width: u32,
        /// Decoded height.
        height: u32,
    },
}

/// Errors that end a run in the failed state.
#[derive(Debug, thiserror::Error)]
pub enum DilateError {
    /// Run configuration is invalid.
    #[error("invalid dilate configuration: {0}")]
    InvalidConfig(String),

    /// The source image could not be loaded.
    #[error(transparent)]
    Input(#[from] InputError),

    /// An image primitive failed while the run was in progress.
    #[error("processing failed: {0}")]
    Runtime(String),
}
