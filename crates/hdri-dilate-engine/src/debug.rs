//! Intermediate debug frames emitted while a component grows.
//!
//! Each frame holds four masks: the growing component mask, the part of
//! it outside the saturation mask, the saturation mask itself, and the
//! part of the saturation mask the component has covered. Frames are for
//! external visualization only and never influence the run.

use crate::types::GrayImage;

/// Four intermediate masks captured at one growth iteration.
#[derive(Debug, Clone)]
pub struct DebugFrame {
    /// Caption, e.g. `"memorial - CC 3 - Iteration 40"`.
    pub title: String,
    /// Source file stem the frame belongs to.
    pub source_stem: String,
    /// Component label.
    pub component: u32,
    /// Growth iteration the frame was captured at.
    pub iteration: u32,
    /// Growing mask, mask minus threshold, threshold mask, and their
    /// intersection, in that order.
    pub images: [GrayImage; 4],
}

impl DebugFrame {
    #[cfg(test)]
    pub(crate) fn blank(width: u32, height: u32) -> Self {
        Self {
            title: String::new(),
            source_stem: String::new(),
            component: 0,
            iteration: 0,
            images: std::array::from_fn(|_| GrayImage::new(width, height)),
        }
    }
}

/// Frame-emission settings for one run.
#[derive(Debug, Clone, Copy)]
pub struct DebugContext<'a> {
    /// Emit a frame every `interval` iterations.
    pub interval: u32,
    /// The run's binarized saturation mask.
    pub threshold_mask: &'a GrayImage,
    /// Source file stem, used in titles.
    pub source_stem: &'a str,
}

impl DebugContext<'_> {
    /// Whether a frame is due at `iteration`. The seed mask at iteration
    /// 0 has not grown yet and is never due.
    #[must_use]
    pub const fn is_due(&self, iteration: u32) -> bool {
        self.interval != 0 && iteration != 0 && iteration % self.interval == 0
    }

    /// Capture a frame for `mask` at the given component and iteration.
    #[must_use]
    pub fn frame(&self, component: u32, iteration: u32, mask: &GrayImage) -> DebugFrame {
        let threshold = self.threshold_mask;
        let outside = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
            image::Luma([mask
                .get_pixel(x, y)
                .0[0]
                .saturating_sub(threshold.get_pixel(x, y).0[0])])
        });
        let covered = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
            image::Luma([mask.get_pixel(x, y).0[0] & threshold.get_pixel(x, y).0[0]])
        });
        DebugFrame {
            title: format!(
                "{} - CC {component} - Iteration {iteration}",
                self.source_stem
            ),
            source_stem: self.source_stem.to_owned(),
            component,
            iteration,
            images: [mask.clone(), outside, threshold.clone(), covered],
        }
    }
}
