//! Writing a converged region back into the output buffer.
//!
//! Every pixel under the region's final mask (optionally widened and
//! softened by a Gaussian blur first) is replaced by the region's mean.
//! The same pixels are marked in an 8-bit preview buffer used only for
//! visualization. Later components overwrite earlier ones where their
//! grown masks overlap.

use crate::ops::ImageOps;
use crate::types::{ChannelMean, GrayImage, Rgb32FImage, RgbImage};

/// Value written into the preview buffer under each composited mask.
pub const PREVIEW_MARKER: image::Rgb<u8> = image::Rgb([255, 255, 255]);

/// Blur settings for compositing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeOptions {
    /// Blur the mask before use.
    pub use_blur: bool,
    /// Odd Gaussian kernel size, at least 3.
    pub blur_size: u32,
}

/// Composite one converged region.
///
/// Returns the number of pixels written.
pub fn composite<O: ImageOps + ?Sized>(
    ops: &O,
    processed: &mut Rgb32FImage,
    preview: &mut RgbImage,
    mask: &GrayImage,
    mean: ChannelMean,
    options: CompositeOptions,
) -> u64 {
    let blurred;
    let mask = if options.use_blur {
        blurred = ops.gaussian_blur(mask, options.blur_size);
        &blurred
    } else {
        mask
    };

    let value = image::Rgb(mean);
    let mut written = 0;
    for (x, y, m) in mask.enumerate_pixels() {
        if m.0[0] == 0 {
            continue;
        }
        processed.put_pixel(x, y, value);
        preview.put_pixel(x, y, PREVIEW_MARKER);
        written += 1;
    }
    written
}

/// Binarize the preview buffer: 255 wherever any channel is marked.
#[must_use]
pub fn preview_mask(preview: &RgbImage) -> GrayImage {
    GrayImage::from_fn(preview.width(), preview.height(), |x, y| {
        let marked = preview.get_pixel(x, y).0.iter().any(|&c| c > 0);
        image::Luma([if marked { 255 } else { 0 }])
    })
}
