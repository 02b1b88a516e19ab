//! hdri-dilate-engine: Saturated-region dilation for HDR images (sans-IO).
//!
//! Flattens clipped highlights (sun discs, lamps) in a high-dynamic-range
//! image by replacing each over-bright region with the average of a
//! neighbourhood grown just large enough for that average to fall below
//! a threshold:
//!
//! detect saturated pixels -> label connected components ->
//! grow each component until its mean drops below threshold ->
//! composite the mean back into a copy of the image.
//!
//! This crate has **no I/O dependencies**. Image decoding is delegated to
//! an [`ImageLoader`] supplied by the caller; all filesystem interaction
//! lives in `hdri-dilate-io`.

pub mod blur;
pub mod composite;
pub mod config;
pub mod debug;
pub mod detect;
pub mod diagnostics;
pub mod grow;
pub mod kernel;
pub mod ops;
pub mod progress;
pub mod supervisor;
pub mod types;

pub use config::{DilateConfig, DilateShape};
pub use debug::DebugFrame;
pub use diagnostics::{Clock, ComponentReport, RunSummary, SystemClock};
pub use ops::{ImageOps, ImageprocOps};
pub use progress::{CancelToken, ChannelReporter, NullReporter, ProgressEvent, ProgressReporter};
pub use supervisor::{
    ImageLoader, RunHandle, RunOutcome, RunRequest, RunState, RunSupervisor, SharedRunState,
};
pub use types::{
    ChannelOrder, DilateError, Dimensions, GrayImage, InputError, LoadedImage, OutputBundle,
    Rgb32FImage, RgbImage, SourceFormat,
};
