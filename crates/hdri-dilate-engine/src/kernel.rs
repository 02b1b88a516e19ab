//! Structuring element generation for component growth.
//!
//! The element is a square of side `dilate_size * dilate_iteration + 1`
//! anchored at `(dilate_iteration, dilate_iteration)`, so one dilation
//! grows a mask by several pixels at once. Shapes follow the usual
//! morphology conventions: the full square, a cross through the anchor,
//! or the ellipse inscribed in the square.

use crate::config::{DilateConfig, DilateShape};
use crate::types::{DilateError, GrayImage};

/// Largest element side the morphology backend accepts.
pub const MAX_ELEMENT_SIDE: u32 = 511;

/// Shape, size, and iteration count of the dilation kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DilationKernel {
    /// Element shape.
    pub shape: DilateShape,
    /// Growth per iteration.
    pub size: u32,
    /// Iterations folded into one element.
    pub iteration: u32,
}

impl DilationKernel {
    /// Create a kernel description.
    #[must_use]
    pub const fn new(shape: DilateShape, size: u32, iteration: u32) -> Self {
        Self {
            shape,
            size,
            iteration,
        }
    }

    /// The kernel described by a run configuration.
    #[must_use]
    pub const fn from_config(config: &DilateConfig) -> Self {
        Self::new(
            config.dilate_shape,
            config.dilate_size,
            config.dilate_iteration,
        )
    }

    /// Side length of the square element.
    #[must_use]
    pub const fn side(&self) -> u32 {
        self.size * self.iteration + 1
    }

    /// Rasterize the kernel into a binary element.
    ///
    /// # Errors
    ///
    /// Returns [`DilateError::InvalidConfig`] if the side exceeds
    /// [`MAX_ELEMENT_SIDE`] or the anchor does not fit in a `u8`.
    pub fn element(&self) -> Result<StructuringElement, DilateError> {
        let side = self
            .size
            .checked_mul(self.iteration)
            .and_then(|s| s.checked_add(1))
            .filter(|&s| s <= MAX_ELEMENT_SIDE)
            .ok_or_else(|| {
                DilateError::InvalidConfig(format!(
                    "structuring element side must not exceed {MAX_ELEMENT_SIDE}"
                ))
            })?;
        let anchor = u8::try_from(self.iteration).map_err(|_| {
            DilateError::InvalidConfig(format!(
                "structuring element anchor {} does not fit in 0..=255",
                self.iteration
            ))
        })?;

        let mut image = match self.shape {
            DilateShape::Rectangle => GrayImage::from_pixel(side, side, image::Luma([255])),
            DilateShape::Cross => cross(side, self.iteration),
            DilateShape::Ellipse => ellipse(side),
        };
        // The anchor must always be covered, otherwise dilation could
        // shrink a mask.
        let a = u32::from(anchor);
        image.put_pixel(a, a, image::Luma([255]));

        Ok(StructuringElement {
            image,
            anchor: (anchor, anchor),
        })
    }
}

impl Default for DilationKernel {
    fn default() -> Self {
        Self::from_config(&DilateConfig::default())
    }
}

/// A rasterized structuring element and its anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    image: GrayImage,
    anchor: (u8, u8),
}

impl StructuringElement {
    /// Element pixels: 255 inside, 0 outside.
    #[must_use]
    pub const fn image(&self) -> &GrayImage {
        &self.image
    }

    /// Anchor position `(x, y)` within the element.
    #[must_use]
    pub const fn anchor(&self) -> (u8, u8) {
        self.anchor
    }

    /// Number of pixels in the element.
    #[must_use]
    pub fn area(&self) -> usize {
        self.image.pixels().filter(|p| p.0[0] != 0).count()
    }
}

fn cross(side: u32, anchor: u32) -> GrayImage {
    GrayImage::from_fn(side, side, |x, y| {
        if x == anchor || y == anchor {
            image::Luma([255])
        } else {
            image::Luma([0])
        }
    })
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
fn ellipse(side: u32) -> GrayImage {
    let side_i = side as i64;
    let r = side_i / 2;
    let inv_r2 = if r > 0 { 1.0 / (r * r) as f64 } else { 0.0 };
    let mut image = GrayImage::new(side, side);
    for y in 0..side_i {
        let dy = y - r;
        if dy.abs() > r {
            continue;
        }
        let dx = (r as f64 * (((r * r - dy * dy) as f64) * inv_r2).sqrt()).round() as i64;
        let start = (r - dx).max(0);
        let end = (r + dx + 1).min(side_i);
        for x in start..end {
            image.put_pixel(x as u32, y as u32, image::Luma([255]));
        }
    }
    image
}
