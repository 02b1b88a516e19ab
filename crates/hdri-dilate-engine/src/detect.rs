//! Saturation mask construction and component labelling.
//!
//! A pixel is a candidate when any channel exceeds the intensity cutoff.
//! The per-channel candidate flags are collapsed to grayscale and
//! binarized with Otsu's method, which absorbs pixels where only a weak
//! channel clipped, before being split into 8-connected components.

use log::debug;

use crate::ops::ImageOps;
use crate::types::{CHANNELS, ChannelOrder, Dimensions, GrayImage, LabelMap, Rgb32FImage};

/// Output of [`detect`]. Immutable for the rest of the run.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Grayscale candidate map before thresholding.
    pub candidates: GrayImage,
    /// Binarized saturation mask (0 / 255).
    pub threshold_mask: GrayImage,
    /// Component labels, `0` for background.
    pub labels: LabelMap,
    /// Number of components; labels run `1..=component_count`.
    pub component_count: u32,
}

/// Build the grayscale candidate map for `image`.
///
/// Each channel contributes 255 (weighted by its luminance weight) when
/// it exceeds `cutoff`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn candidate_map(image: &Rgb32FImage, cutoff: f32, order: ChannelOrder) -> GrayImage {
    let weights = order.luma_weights();
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let pixel = image.get_pixel(x, y);
        let mut gray = 0.0f32;
        for c in 0..CHANNELS {
            if pixel.0[c] > cutoff {
                gray += weights[c] * 255.0;
            }
        }
        image::Luma([gray.round().clamp(0.0, 255.0) as u8])
    })
}

/// Detect over-bright regions in `image`.
///
/// When no pixel exceeds `cutoff` the thresholding and labelling
/// primitives are skipped and an empty detection is returned.
pub fn detect<O: ImageOps + ?Sized>(
    ops: &O,
    image: &Rgb32FImage,
    cutoff: f32,
    order: ChannelOrder,
) -> Detection {
    let Dimensions { width, height } = Dimensions::of(image);
    let candidates = candidate_map(image, cutoff, order);

    if candidates.pixels().all(|p| p.0[0] == 0) {
        debug!("no pixel exceeds intensity cutoff {cutoff}");
        return Detection {
            candidates,
            threshold_mask: GrayImage::new(width, height),
            labels: LabelMap::new(width, height),
            component_count: 0,
        };
    }

    let level = ops.otsu_level(&candidates);
    let threshold_mask = GrayImage::from_fn(width, height, |x, y| {
        image::Luma([if candidates.get_pixel(x, y).0[0] > level {
            255
        } else {
            0
        }])
    });
    let labels = ops.connected_components(&threshold_mask);
    let component_count = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0);
    debug!("otsu level {level}, {component_count} components");

    Detection {
        candidates,
        threshold_mask,
        labels,
        component_count,
    }
}

/// Binary mask (0 / 255) of the pixels carrying `label`.
#[must_use]
pub fn component_mask(labels: &LabelMap, label: u32) -> GrayImage {
    GrayImage::from_fn(labels.width(), labels.height(), |x, y| {
        image::Luma([if labels.get_pixel(x, y).0[0] == label {
            255
        } else {
            0
        }])
    })
}
