//! Per-component growth until the region's mean falls below threshold.
//!
//! Starting from the component's own pixels, the loop measures the mean
//! of the *source* image under the mask. While any channel of that mean
//! is at or above the threshold the mask is dilated and measured again.
//! The first mask whose mean drops below threshold on every channel is
//! the converged extent, and that mean is the value to composite.
//!
//! There is no iteration cap. A component whose mean never drops below
//! threshold (a uniformly bright image, or a mask that already covers
//! the whole frame) grows until the run is cancelled. Every
//! [`CHECKPOINT_INTERVAL`] iterations a "taking longer than usual"
//! notice is reported and the progress indicator is reset, without
//! affecting termination.

use log::{debug, warn};

use crate::debug::DebugContext;
use crate::detect::component_mask;
use crate::kernel::StructuringElement;
use crate::ops::{ImageOps, mask_area};
use crate::progress::{CancelToken, ProgressReporter};
use crate::types::{ChannelMean, GrayImage, LabelMap, Rgb32FImage};

/// Iterations between "taking longer than usual" notices.
pub const CHECKPOINT_INTERVAL: u32 = 100;

/// Stage message reported at each checkpoint.
pub const CHECKPOINT_NOTICE: &str =
    "Average Pixel Value Iteration is taking longer than usual. Please wait...";

/// Read-only inputs shared by every component of a run.
#[derive(Debug, Clone, Copy)]
pub struct GrowthContext<'a> {
    /// Growth continues while any mean channel is `>=` this.
    pub threshold: f32,
    /// Element each growth step dilates by.
    pub element: &'a StructuringElement,
    /// Polled once per iteration.
    pub cancel: &'a CancelToken,
    /// Debug frame settings, when enabled.
    pub debug: Option<DebugContext<'a>>,
}

/// A component whose mean dropped below threshold.
#[derive(Debug, Clone)]
pub struct ConvergedRegion {
    /// Final grown extent (0 / 255).
    pub mask: GrayImage,
    /// Mean of the source image under `mask`.
    pub mean: ChannelMean,
    /// Dilation steps taken.
    pub iterations: u32,
}

/// Result of growing one component.
#[derive(Debug, Clone)]
pub enum GrowthOutcome {
    /// The component converged.
    Converged(ConvergedRegion),
    /// The cancel token was raised before convergence.
    Cancelled,
}

/// Mutable loop state for one component.
#[derive(Debug)]
struct ComponentState {
    mask: GrayImage,
    iteration: u32,
    checkpoint: u32,
}

impl ComponentState {
    const fn new(mask: GrayImage) -> Self {
        Self {
            mask,
            iteration: 0,
            checkpoint: 0,
        }
    }

    /// Advance the checkpoint when the iteration count has moved a full
    /// interval past it.
    const fn passed_checkpoint(&mut self) -> bool {
        if self.iteration > self.checkpoint + CHECKPOINT_INTERVAL {
            self.checkpoint += CHECKPOINT_INTERVAL;
            true
        } else {
            false
        }
    }
}

/// Whether `mean` still calls for growth: any channel `>= threshold`.
#[must_use]
pub fn exceeds_threshold(mean: &ChannelMean, threshold: f32) -> bool {
    mean.iter().any(|&channel| channel >= threshold)
}

/// Grow component `label` of `labels` until it converges or the run is
/// cancelled.
///
/// The mean is always measured on `source`, never on the output being
/// composited, so earlier components do not influence later ones.
pub fn grow<O: ImageOps + ?Sized>(
    ops: &O,
    labels: &LabelMap,
    label: u32,
    source: &Rgb32FImage,
    ctx: &GrowthContext<'_>,
    reporter: &mut dyn ProgressReporter,
) -> GrowthOutcome {
    debug_assert_ne!(label, 0, "background is never grown");

    let mut state = ComponentState::new(component_mask(labels, label));

    loop {
        if ctx.cancel.is_cancelled() {
            debug!("component {label} cancelled at iteration {}", state.iteration);
            return GrowthOutcome::Cancelled;
        }

        let mean = ops.masked_mean(source, &state.mask);
        let exceeded = exceeds_threshold(&mean, ctx.threshold);
        debug!(
            "iteration {} - CC {label} - exceeds threshold {}? {} - mean {mean:?}",
            state.iteration,
            ctx.threshold,
            if exceeded { "Y" } else { "N" },
        );

        if let Some(dbg) = &ctx.debug
            && (dbg.is_due(state.iteration) || !exceeded)
        {
            reporter.on_debug_frame(dbg.frame(label, state.iteration, &state.mask));
        }

        if !exceeded {
            return GrowthOutcome::Converged(ConvergedRegion {
                mask: state.mask,
                mean,
                iterations: state.iteration,
            });
        }

        let grown = ops.dilate(&state.mask, ctx.element);
        debug_assert!(mask_area(&grown) >= mask_area(&state.mask));
        state.mask = grown;
        state.iteration += 1;

        if state.passed_checkpoint() {
            warn!(
                "component {label} still above threshold after {} iterations",
                state.iteration
            );
            reporter.on_stage(CHECKPOINT_NOTICE);
            reporter.on_progress(0, 0);
        }
    }
}
