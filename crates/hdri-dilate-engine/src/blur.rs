//! Gaussian blur for softening converged masks.
//!
//! Wraps [`imageproc::filter::gaussian_blur_f32`]. Callers describe the
//! blur by an odd kernel size (as the run configuration does); the
//! matching sigma is derived with the conventional
//! `0.3 * ((size - 1) * 0.5 - 1) + 0.8` rule.

use image::GrayImage;

/// Sigma for a Gaussian kernel of the given (odd) size.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sigma_for_size(size: u32) -> f32 {
    let half = (size.saturating_sub(1)) as f32 * 0.5;
    0.3f32.mul_add(half - 1.0, 0.8)
}

/// Blur an 8-bit mask with a Gaussian kernel of the given size.
///
/// Sizes below 3 return the mask unchanged.
#[must_use = "returns the blurred mask"]
pub fn gaussian_blur_mask(mask: &GrayImage, size: u32) -> GrayImage {
    if size < 3 {
        return mask.clone();
    }

    imageproc::filter::gaussian_blur_f32(mask, sigma_for_size(size))
}
