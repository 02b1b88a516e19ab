//! Image primitives the engine is built on.
//!
//! The detector, growth loop, and compositor never call an image
//! library directly. They go through [`ImageOps`], so the engine can be
//! driven by deterministic fakes in tests. [`ImageprocOps`] is the
//! production implementation on top of `imageproc`.

use imageproc::morphology::Mask;
use imageproc::region_labelling::Connectivity;

use crate::kernel::StructuringElement;
use crate::types::{CHANNELS, ChannelMean, GrayImage, LabelMap, Rgb32FImage};

/// The primitive operations used by the engine.
///
/// Masks are 8-bit images where any non-zero pixel is "inside".
pub trait ImageOps {
    /// Per-channel mean of `image` over the non-zero pixels of `mask`.
    /// An empty mask yields all zeros.
    fn masked_mean(&self, image: &Rgb32FImage, mask: &GrayImage) -> ChannelMean;

    /// Label the 8-connected components of the non-zero pixels of `mask`,
    /// `0` for background and `1..=N` for components.
    fn connected_components(&self, mask: &GrayImage) -> LabelMap;

    /// Otsu's automatic threshold level for a grayscale image.
    fn otsu_level(&self, gray: &GrayImage) -> u8;

    /// Morphological dilation of `mask` by `element`.
    fn dilate(&self, mask: &GrayImage, element: &StructuringElement) -> GrayImage;

    /// Gaussian blur with an odd kernel `size`.
    fn gaussian_blur(&self, mask: &GrayImage, size: u32) -> GrayImage;
}

/// [`ImageOps`] backed by `imageproc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageprocOps;

impl ImageOps for ImageprocOps {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn masked_mean(&self, image: &Rgb32FImage, mask: &GrayImage) -> ChannelMean {
        let mut sums = [0f64; CHANNELS];
        let mut count = 0u64;
        for (pixel, m) in image.pixels().zip(mask.pixels()) {
            if m.0[0] == 0 {
                continue;
            }
            for (sum, &value) in sums.iter_mut().zip(pixel.0.iter()) {
                *sum += f64::from(value);
            }
            count += 1;
        }
        if count == 0 {
            return [0.0; CHANNELS];
        }
        let n = count as f64;
        sums.map(|sum| (sum / n) as f32)
    }

    fn connected_components(&self, mask: &GrayImage) -> LabelMap {
        imageproc::region_labelling::connected_components(
            mask,
            Connectivity::Eight,
            image::Luma([0u8]),
        )
    }

    fn otsu_level(&self, gray: &GrayImage) -> u8 {
        imageproc::contrast::otsu_level(gray)
    }

    fn dilate(&self, mask: &GrayImage, element: &StructuringElement) -> GrayImage {
        let (ax, ay) = element.anchor();
        let structuring = Mask::from_image(element.image(), ax, ay);
        imageproc::morphology::grayscale_dilate(mask, &structuring)
    }

    fn gaussian_blur(&self, mask: &GrayImage, size: u32) -> GrayImage {
        crate::blur::gaussian_blur_mask(mask, size)
    }
}

/// Number of non-zero pixels in a mask.
#[must_use]
pub fn mask_area(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|p| p.0[0] != 0).count() as u64
}
