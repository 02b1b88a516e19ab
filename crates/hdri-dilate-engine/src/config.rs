//! Run configuration.

use serde::{Deserialize, Serialize};

use crate::kernel::MAX_ELEMENT_SIDE;
use crate::types::{ChannelOrder, DilateError};

/// Shape of the structuring element used to grow a component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DilateShape {
    /// Every pixel of the square element.
    #[default]
    Rectangle,
    /// The anchor row and the anchor column.
    Cross,
    /// The ellipse inscribed in the square element.
    Ellipse,
}

/// Configuration for a single dilation run.
///
/// Read-only for the lifetime of the run. Call [`validate`](Self::validate)
/// (the supervisor does) before using a configuration that did not come
/// from [`Default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DilateConfig {
    /// A pixel is a saturation candidate when any channel exceeds this.
    pub intensity_cutoff: f32,

    /// A component keeps growing while any channel of its mean is at
    /// or above this value.
    pub threshold: f32,

    /// Structuring element growth per dilate iteration. At least 2.
    pub dilate_size: u32,

    /// Dilate iterations folded into one growth step. Determines the
    /// element anchor, so at most 255.
    pub dilate_iteration: u32,

    /// Structuring element shape.
    pub dilate_shape: DilateShape,

    /// Storage order of the loaded channels.
    pub channel_order: ChannelOrder,

    /// Soften converged masks with a Gaussian blur before compositing.
    pub use_blur: bool,

    /// Gaussian kernel size. Odd, at least 3.
    pub blur_size: u32,

    /// Emit a debug frame every `n` growth iterations.
    pub debug_interval: Option<u32>,
}

impl DilateConfig {
    /// Default saturation candidate cutoff.
    pub const DEFAULT_INTENSITY_CUTOFF: f32 = 15.0;
    /// Default convergence threshold.
    pub const DEFAULT_THRESHOLD: f32 = 1.0;
    /// Default structuring element growth.
    pub const DEFAULT_DILATE_SIZE: u32 = 2;
    /// Default dilate iterations per growth step.
    pub const DEFAULT_DILATE_ITERATION: u32 = 3;
    /// Default Gaussian kernel size.
    pub const DEFAULT_BLUR_SIZE: u32 = 3;

    /// Check every field against its documented range.
    ///
    /// # Errors
    ///
    /// Returns [`DilateError::InvalidConfig`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), DilateError> {
        if !self.intensity_cutoff.is_finite() {
            return Err(invalid(format!(
                "intensity_cutoff must be finite, got {}",
                self.intensity_cutoff
            )));
        }
        if !self.threshold.is_finite() {
            return Err(invalid(format!(
                "threshold must be finite, got {}",
                self.threshold
            )));
        }
        if self.dilate_size < 2 {
            return Err(invalid(format!(
                "dilate_size must be at least 2, got {}",
                self.dilate_size
            )));
        }
        if !(1..=u32::from(u8::MAX)).contains(&self.dilate_iteration) {
            return Err(invalid(format!(
                "dilate_iteration must be within 1..=255, got {}",
                self.dilate_iteration
            )));
        }
        let side = self
            .dilate_size
            .checked_mul(self.dilate_iteration)
            .and_then(|s| s.checked_add(1));
        match side {
            Some(side) if side <= MAX_ELEMENT_SIDE => {}
            _ => {
                return Err(invalid(format!(
                    "dilate_size * dilate_iteration + 1 must not exceed {MAX_ELEMENT_SIDE}"
                )));
            }
        }
        if self.blur_size < 3 || self.blur_size % 2 == 0 {
            return Err(invalid(format!(
                "blur_size must be odd and at least 3, got {}",
                self.blur_size
            )));
        }
        if self.debug_interval == Some(0) {
            return Err(invalid("debug_interval must be at least 1".to_owned()));
        }
        Ok(())
    }
}

fn invalid(message: String) -> DilateError {
    DilateError::InvalidConfig(message)
}

impl Default for DilateConfig {
    fn default() -> Self {
        Self {
            intensity_cutoff: Self::DEFAULT_INTENSITY_CUTOFF,
            threshold: Self::DEFAULT_THRESHOLD,
            dilate_size: Self::DEFAULT_DILATE_SIZE,
            dilate_iteration: Self::DEFAULT_DILATE_ITERATION,
            dilate_shape: DilateShape::default(),
            channel_order: ChannelOrder::default(),
            use_blur: true,
            blur_size: Self::DEFAULT_BLUR_SIZE,
            debug_interval: None,
        }
    }
}
