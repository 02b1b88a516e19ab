//! Lifecycle of one dilation run.
//!
//! A [`RunSupervisor`] owns its collaborators (image loader, image
//! primitives, progress reporter, clock) and drives a single run through
//! `IDLE -> RUNNING -> {COMPLETED, CANCELLED, FAILED}`:
//!
//! 1. Validate the configuration and build the structuring element.
//! 2. Load the source. Load failures go straight from `IDLE` to `FAILED`.
//! 3. Detect saturated components once.
//! 4. Grow and composite each component in ascending label order,
//!    polling the cancel token before each one.
//! 5. Assemble the [`OutputBundle`].
//!
//! The whole body runs under [`std::panic::catch_unwind`] so a failing
//! primitive surfaces as [`DilateError::Runtime`] instead of tearing
//! down the caller.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::composite::{CompositeOptions, composite, preview_mask};
use crate::config::DilateConfig;
use crate::debug::DebugContext;
use crate::detect::detect;
use crate::diagnostics::{Clock, ComponentReport, RunSummary, SystemClock, megabytes};
use crate::grow::{GrowthContext, GrowthOutcome, grow};
use crate::kernel::DilationKernel;
use crate::ops::{ImageOps, mask_area};
use crate::progress::{CancelToken, ProgressReporter};
use crate::types::{
    CHANNELS, ChannelOrder, Dimensions, DilateError, GrayImage, InputError, LoadedImage,
    OutputBundle, Rgb32FImage, RgbImage, SourceFormat,
};

/// Stage message emitted when a run stops on cancellation.
pub const ABORT_NOTICE: &str = "Aborting!";

/// Stage message emitted after [`ABORT_NOTICE`].
pub const SAFE_TO_CLOSE_NOTICE: &str = "You can safely close this window.";

/// Stage message emitted when a run completes.
pub const DONE_NOTICE: &str = "Done processing";

/// Decodes a source file into a floating-point image.
pub trait ImageLoader {
    /// Load `path`, arranging channels in `order`.
    ///
    /// # Errors
    ///
    /// Returns [`InputError`] if the file is missing, unreadable, or of an
    /// unsupported format or shape.
    fn load(&self, path: &Path, order: ChannelOrder) -> Result<LoadedImage, InputError>;
}

/// What to process and how.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Source image path.
    pub source: PathBuf,
    /// Run configuration.
    pub config: DilateConfig,
}

impl RunRequest {
    /// A request for `source` with the given configuration.
    pub fn new(source: impl Into<PathBuf>, config: DilateConfig) -> Self {
        Self {
            source: source.into(),
            config,
        }
    }

    /// File name shown in stage messages.
    fn display_name(&self) -> String {
        self.source.file_name().map_or_else(
            || self.source.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        )
    }

    /// File stem used in debug frame titles.
    fn stem(&self) -> String {
        self.source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    /// Not started, or still loading the source.
    Idle = 0,
    /// Source loaded; detection and growth in progress.
    Running = 1,
    /// Stopped by the cancel token.
    Cancelled = 2,
    /// Finished normally.
    Completed = 3,
    /// Stopped by an error.
    Failed = 4,
}

impl RunState {
    /// Whether no further transitions can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Cancelled,
            3 => Self::Completed,
            _ => Self::Failed,
        }
    }
}

/// [`RunState`] readable from any thread.
#[derive(Debug, Clone)]
pub struct SharedRunState(Arc<AtomicU8>);

impl Default for SharedRunState {
    fn default() -> Self {
        Self(Arc::new(AtomicU8::new(RunState::Idle as u8)))
    }
}

impl SharedRunState {
    /// Current state.
    #[must_use]
    pub fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: RunState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every component converged and was composited.
    Completed {
        /// The four output images.
        bundle: OutputBundle,
        /// Timing and per-component statistics.
        summary: RunSummary,
    },
    /// The cancel token was raised.
    Cancelled {
        /// Output with the components finished before cancellation.
        partial: OutputBundle,
        /// Components composited into `partial`.
        completed_components: u32,
    },
    /// The run failed.
    Failed(DilateError),
}

impl RunOutcome {
    /// The terminal state this outcome corresponds to.
    #[must_use]
    pub const fn state(&self) -> RunState {
        match self {
            Self::Completed { .. } => RunState::Completed,
            Self::Cancelled { .. } => RunState::Cancelled,
            Self::Failed(_) => RunState::Failed,
        }
    }
}

/// Mutable output buffers for one run.
struct Canvas {
    original: Rgb32FImage,
    processed: Rgb32FImage,
    preview: RgbImage,
    format: SourceFormat,
}

impl Canvas {
    fn new(loaded: LoadedImage) -> Self {
        let processed = loaded.image.clone();
        let preview = RgbImage::new(loaded.image.width(), loaded.image.height());
        Self {
            original: loaded.image,
            processed,
            preview,
            format: loaded.format,
        }
    }

    fn into_bundle(self, threshold_mask: GrayImage) -> OutputBundle {
        OutputBundle {
            threshold_mask,
            dilated_mask: preview_mask(&self.preview),
            original: self.original,
            processed: self.processed,
            format: self.format,
        }
    }
}

/// Drives one run of the dilation engine.
#[derive(Debug)]
pub struct RunSupervisor<L, O, R, C = SystemClock> {
    loader: L,
    ops: O,
    reporter: R,
    clock: C,
    state: SharedRunState,
}

impl<L, O, R> RunSupervisor<L, O, R, SystemClock>
where
    L: ImageLoader,
    O: ImageOps,
    R: ProgressReporter,
{
    /// A supervisor timed by the system clock.
    pub fn new(loader: L, ops: O, reporter: R) -> Self {
        Self {
            loader,
            ops,
            reporter,
            clock: SystemClock,
            state: SharedRunState::default(),
        }
    }
}

impl<L, O, R, C> RunSupervisor<L, O, R, C>
where
    L: ImageLoader,
    O: ImageOps,
    R: ProgressReporter,
    C: Clock,
{
    /// Replace the clock used to time runs.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> RunSupervisor<L, O, R, C2> {
        RunSupervisor {
            loader: self.loader,
            ops: self.ops,
            reporter: self.reporter,
            clock,
            state: self.state,
        }
    }

    /// Observable state of this supervisor's run.
    #[must_use]
    pub fn state(&self) -> SharedRunState {
        self.state.clone()
    }

    /// The reporter, e.g. to inspect what a test reporter recorded.
    pub const fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Execute the run on the current thread.
    ///
    /// Never panics: errors and panics raised by collaborators are
    /// returned as [`RunOutcome::Failed`].
    pub fn run(&mut self, request: &RunRequest, cancel: &CancelToken) -> RunOutcome {
        let start = self.clock.now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(request, cancel)));
        let elapsed = self.clock.elapsed(&start);

        let mut outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => RunOutcome::Failed(err),
            Err(payload) => RunOutcome::Failed(DilateError::Runtime(panic_message(&*payload))),
        };

        match &mut outcome {
            RunOutcome::Completed { summary, .. } => {
                summary.total_duration = elapsed;
                info!(
                    "{} finished in {:.3}s",
                    request.display_name(),
                    elapsed.as_secs_f64()
                );
                self.reporter.on_complete(elapsed);
            }
            RunOutcome::Cancelled {
                completed_components,
                ..
            } => {
                warn!(
                    "{} cancelled after {completed_components} components",
                    request.display_name()
                );
            }
            RunOutcome::Failed(err) => {
                error!("{} failed: {err}", request.display_name());
                self.reporter.on_error(err);
            }
        }

        self.state.set(outcome.state());
        outcome
    }

    fn stage(&mut self, message: &str) {
        info!("{message}");
        self.reporter.on_stage(message);
    }

    fn execute(
        &mut self,
        request: &RunRequest,
        cancel: &CancelToken,
    ) -> Result<RunOutcome, DilateError> {
        let config = &request.config;
        config.validate()?;
        let element = DilationKernel::from_config(config).element()?;
        debug!(
            "structuring element {:?} {}x{}, {} px",
            config.dilate_shape,
            element.image().width(),
            element.image().height(),
            element.area()
        );

        self.stage(&format!("Loading image... {}", request.display_name()));
        let loaded = self.loader.load(&request.source, config.channel_order)?;
        let dims = Dimensions::of(&loaded.image);
        if dims.pixel_count() == 0 {
            return Err(InputError::UnsupportedShape {
                width: dims.width,
                height: dims.height,
            }
            .into());
        }
        self.state.set(RunState::Running);
        self.stage("Image loaded");

        let mut canvas = Canvas::new(loaded);

        self.stage("Processing mask...");
        let detection = detect(
            &self.ops,
            &canvas.original,
            config.intensity_cutoff,
            config.channel_order,
        );
        for notice in memory_notices(dims) {
            self.stage(&notice);
        }

        let total = detection.component_count;
        self.stage(&format!("Found {total} connected components"));

        let mut components = Vec::new();
        if total > 0 {
            self.stage("Processing and dilating connected components");
            self.reporter.on_progress(0, total);

            let stem = request.stem();
            let ctx = GrowthContext {
                threshold: config.threshold,
                element: &element,
                cancel,
                debug: config.debug_interval.map(|interval| DebugContext {
                    interval,
                    threshold_mask: &detection.threshold_mask,
                    source_stem: &stem,
                }),
            };
            let options = CompositeOptions {
                use_blur: config.use_blur,
                blur_size: config.blur_size,
            };

            for label in 1..=total {
                let outcome = if cancel.is_cancelled() {
                    GrowthOutcome::Cancelled
                } else {
                    grow(
                        &self.ops,
                        &detection.labels,
                        label,
                        &canvas.original,
                        &ctx,
                        &mut self.reporter,
                    )
                };

                let region = match outcome {
                    GrowthOutcome::Converged(region) => region,
                    GrowthOutcome::Cancelled => {
                        self.stage(ABORT_NOTICE);
                        self.stage(SAFE_TO_CLOSE_NOTICE);
                        return Ok(RunOutcome::Cancelled {
                            partial: canvas.into_bundle(detection.threshold_mask),
                            completed_components: label - 1,
                        });
                    }
                };

                let written = composite(
                    &self.ops,
                    &mut canvas.processed,
                    &mut canvas.preview,
                    &region.mask,
                    region.mean,
                    options,
                );
                components.push(ComponentReport {
                    label,
                    iterations: region.iterations,
                    area: mask_area(&region.mask),
                    composited: written,
                    mean: region.mean,
                });
                self.reporter.on_progress(label, total);
            }
        }

        self.stage(DONE_NOTICE);
        Ok(RunOutcome::Completed {
            bundle: canvas.into_bundle(detection.threshold_mask),
            summary: RunSummary {
                dimensions: dims,
                component_count: total,
                components,
                total_duration: std::time::Duration::ZERO,
            },
        })
    }
}

/// Stage messages describing the buffers detection allocates for an
/// image of `dims`: the label map, the per-channel saturation mask, and
/// its grayscale collapse.
#[must_use]
pub fn memory_notices(dims: Dimensions) -> [String; 3] {
    let pixels = usize::try_from(dims.pixel_count()).unwrap_or(usize::MAX);
    let labels = pixels.saturating_mul(std::mem::size_of::<u32>());
    let saturated = pixels.saturating_mul(CHANNELS);
    [
        format!("CC Labels Memory {} MB", megabytes(labels)),
        format!("Saturated Mask Memory {} MB", megabytes(saturated)),
        format!("Saturated Mask Grayscale Memory {} MB", megabytes(pixels)),
    ]
}

impl<L, O, R, C> RunSupervisor<L, O, R, C>
where
    L: ImageLoader + Send + 'static,
    O: ImageOps + Send + 'static,
    R: ProgressReporter + 'static,
    C: Clock + Send + 'static,
{
    /// Run `request` on a dedicated worker thread.
    ///
    /// Consumes the supervisor: one run per instance.
    ///
    /// # Errors
    ///
    /// Returns [`DilateError::Runtime`] if the worker thread cannot be
    /// spawned.
    pub fn start(mut self, request: RunRequest) -> Result<RunHandle, DilateError> {
        let cancel = CancelToken::new();
        let state = self.state.clone();
        let worker_cancel = cancel.clone();
        let thread = thread::Builder::new()
            .name("hdri-dilate-run".into())
            .spawn(move || self.run(&request, &worker_cancel))
            .map_err(|err| DilateError::Runtime(format!("failed to spawn worker: {err}")))?;
        Ok(RunHandle {
            thread,
            cancel,
            state,
        })
    }
}

/// Caller-side handle to a run started with [`RunSupervisor::start`].
#[derive(Debug)]
pub struct RunHandle {
    thread: JoinHandle<RunOutcome>,
    cancel: CancelToken,
    state: SharedRunState,
}

impl RunHandle {
    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A clone of the run's cancel token.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// Whether the worker thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run to end.
    #[must_use]
    pub fn join(self) -> RunOutcome {
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(payload) => {
                self.state.set(RunState::Failed);
                RunOutcome::Failed(DilateError::Runtime(panic_message(&*payload)))
            }
        }
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::debug::DebugFrame;
    use crate::grow::CHECKPOINT_NOTICE;
    use crate::kernel::StructuringElement;
    use crate::ops::ImageprocOps;
    use crate::types::{ChannelMean, LabelMap};

    /// Serves images from memory, keyed by path.
    #[derive(Default)]
    struct MemoryLoader {
        images: HashMap<PathBuf, Rgb32FImage>,
    }

    impl MemoryLoader {
        fn with(path: &str, image: Rgb32FImage) -> Self {
            let mut images = HashMap::new();
            images.insert(PathBuf::from(path), image);
            Self { images }
        }
    }

    impl ImageLoader for MemoryLoader {
        fn load(&self, path: &Path, order: ChannelOrder) -> Result<LoadedImage, InputError> {
            let image = self
                .images
                .get(path)
                .ok_or_else(|| InputError::NotFound(path.to_owned()))?;
            let image = Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
                image::Rgb(order.arrange(image.get_pixel(x, y).0))
            });
            Ok(LoadedImage {
                image,
                format: SourceFormat::OpenExr,
            })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Progress(u32, u32),
        Stage(String),
        Frame(u32, u32),
        Complete(Duration),
        Error(String),
    }

    /// Records every callback; optionally cancels on a given progress
    /// value or on the checkpoint notice.
    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
        cancel_at_progress: Option<(u32, CancelToken)>,
        cancel_on_checkpoint: Option<CancelToken>,
    }

    impl Recorder {
        fn stages(&self) -> Vec<&str> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Event::Stage(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect()
        }
    }

    impl ProgressReporter for Recorder {
        fn on_progress(&mut self, current: u32, max: u32) {
            self.events.push(Event::Progress(current, max));
            if let Some((at, token)) = &self.cancel_at_progress
                && *at == current
                && max > 0
            {
                token.cancel();
            }
        }

        fn on_stage(&mut self, message: &str) {
            self.events.push(Event::Stage(message.to_owned()));
            if message == CHECKPOINT_NOTICE
                && let Some(token) = &self.cancel_on_checkpoint
            {
                token.cancel();
            }
        }

        fn on_debug_frame(&mut self, frame: DebugFrame) {
            self.events.push(Event::Frame(frame.component, frame.iteration));
        }

        fn on_complete(&mut self, elapsed: Duration) {
            self.events.push(Event::Complete(elapsed));
        }

        fn on_error(&mut self, error: &DilateError) {
            self.events.push(Event::Error(error.to_string()));
        }
    }

    /// Advances one second per reading.
    #[derive(Default)]
    struct TickClock(Cell<u64>);

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.0.get();
            self.0.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_secs(self.now() - since)
        }
    }

    /// Panics on the first dilation.
    struct PanickingOps;

    impl ImageOps for PanickingOps {
        fn masked_mean(&self, image: &Rgb32FImage, mask: &GrayImage) -> ChannelMean {
            ImageprocOps.masked_mean(image, mask)
        }

        fn connected_components(&self, mask: &GrayImage) -> LabelMap {
            ImageprocOps.connected_components(mask)
        }

        fn otsu_level(&self, gray: &GrayImage) -> u8 {
            ImageprocOps.otsu_level(gray)
        }

        fn dilate(&self, _mask: &GrayImage, _element: &StructuringElement) -> GrayImage {
            panic!("dilate exploded");
        }

        fn gaussian_blur(&self, mask: &GrayImage, size: u32) -> GrayImage {
            ImageprocOps.gaussian_blur(mask, size)
        }
    }

    /// 15x9 background of 0.1 with single 10.0 dots at x = 3 and x = 11.
    fn two_dots() -> Rgb32FImage {
        Rgb32FImage::from_fn(15, 9, |x, y| {
            let v = if y == 4 && (x == 3 || x == 11) {
                10.0
            } else {
                0.1
            };
            image::Rgb([v, v, v])
        })
    }

    /// 4x4 background of 0.5 with a 2x2 block of 20.0 in the centre.
    fn centre_block() -> Rgb32FImage {
        Rgb32FImage::from_fn(4, 4, |x, y| {
            let v = if (1..3).contains(&x) && (1..3).contains(&y) {
                20.0
            } else {
                0.5
            };
            image::Rgb([v, v, v])
        })
    }

    fn config() -> DilateConfig {
        DilateConfig {
            intensity_cutoff: 5.0,
            dilate_size: 2,
            dilate_iteration: 1,
            use_blur: false,
            ..DilateConfig::default()
        }
    }

    fn supervisor(
        image: Rgb32FImage,
    ) -> RunSupervisor<MemoryLoader, ImageprocOps, Recorder, TickClock> {
        RunSupervisor::new(
            MemoryLoader::with("dots.exr", image),
            ImageprocOps,
            Recorder::default(),
        )
        .with_clock(TickClock::default())
    }

    fn completed(outcome: RunOutcome) -> (OutputBundle, RunSummary) {
        match outcome {
            RunOutcome::Completed { bundle, summary } => (bundle, summary),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn no_saturation_leaves_image_untouched() {
        let image = Rgb32FImage::from_pixel(6, 4, image::Rgb([0.3, 0.4, 0.5]));
        let mut sup = supervisor(image.clone());
        let (bundle, summary) = completed(sup.run(
            &RunRequest::new("dots.exr", config()),
            &CancelToken::new(),
        ));

        assert_eq!(summary.component_count, 0);
        assert!(summary.components.is_empty());
        assert_eq!(bundle.processed, image);
        assert_eq!(bundle.original, image);
        assert_eq!(mask_area(&bundle.dilated_mask), 0);
        assert_eq!(sup.state().get(), RunState::Completed);
        assert_eq!(sup.reporter().stages().last(), Some(&DONE_NOTICE));
    }

    #[test]
    fn completes_and_flattens_each_component() {
        let mut sup = supervisor(two_dots());
        let (bundle, summary) = completed(sup.run(
            &RunRequest::new("dots.exr", config()),
            &CancelToken::new(),
        ));

        assert_eq!(summary.component_count, 2);
        assert_eq!(summary.components.len(), 2);
        for report in &summary.components {
            assert_eq!(report.iterations, 2);
            assert_eq!(report.area, 25);
            assert!(report.mean.iter().all(|&c| c < 1.0));
        }
        assert_eq!(summary.total_duration, Duration::from_secs(1));

        let flattened = bundle.processed.get_pixel(3, 4).0;
        assert!((flattened[0] - 0.496).abs() < 1e-4);
        assert_eq!(bundle.processed.get_pixel(7, 0), bundle.original.get_pixel(7, 0));
        assert_eq!(mask_area(&bundle.threshold_mask), 2);
        assert_eq!(mask_area(&bundle.dilated_mask), 50);

        let events = &sup.reporter().events;
        assert!(events.contains(&Event::Progress(0, 2)));
        assert!(events.contains(&Event::Progress(1, 2)));
        assert!(events.contains(&Event::Progress(2, 2)));
        assert_eq!(events.last(), Some(&Event::Complete(Duration::from_secs(1))));
    }

    #[test]
    fn stage_messages_follow_the_run() {
        let mut sup = supervisor(two_dots());
        let _ = sup.run(&RunRequest::new("dots.exr", config()), &CancelToken::new());
        let stages = sup.reporter().stages();
        assert_eq!(stages[0], "Loading image... dots.exr");
        assert_eq!(stages[1], "Image loaded");
        assert_eq!(stages[2], "Processing mask...");
        assert!(stages[3].starts_with("CC Labels Memory "));
        assert!(stages.contains(&"Found 2 connected components"));
        assert!(stages.contains(&"Processing and dilating connected components"));
        assert_eq!(stages.last(), Some(&DONE_NOTICE));
    }

    #[test]
    fn identical_runs_produce_identical_output() {
        let request = RunRequest::new(
            "dots.exr",
            DilateConfig {
                use_blur: true,
                ..config()
            },
        );
        let (a, _) = completed(supervisor(two_dots()).run(&request, &CancelToken::new()));
        let (b, _) = completed(supervisor(two_dots()).run(&request, &CancelToken::new()));
        assert_eq!(a.processed, b.processed);
        assert_eq!(a.dilated_mask, b.dilated_mask);
        assert_eq!(a.threshold_mask, b.threshold_mask);
    }

    #[test]
    fn cancellation_keeps_earlier_components_only() {
        let cancel = CancelToken::new();
        let mut sup = RunSupervisor::new(
            MemoryLoader::with("dots.exr", two_dots()),
            ImageprocOps,
            Recorder {
                cancel_at_progress: Some((1, cancel.clone())),
                ..Recorder::default()
            },
        );
        let outcome = sup.run(&RunRequest::new("dots.exr", config()), &cancel);

        let RunOutcome::Cancelled {
            partial,
            completed_components,
        } = outcome
        else {
            panic!("expected cancellation");
        };
        assert_eq!(completed_components, 1);
        assert!((partial.processed.get_pixel(3, 4).0[0] - 0.496).abs() < 1e-4);
        assert_eq!(partial.processed.get_pixel(11, 4).0, [10.0; 3]);
        assert_eq!(
            partial.processed.get_pixel(12, 4),
            partial.original.get_pixel(12, 4)
        );
        assert_eq!(sup.state().get(), RunState::Cancelled);

        let stages = sup.reporter().stages();
        assert_eq!(&stages[stages.len() - 2..], &[ABORT_NOTICE, SAFE_TO_CLOSE_NOTICE]);
        assert!(
            !sup.reporter()
                .events
                .iter()
                .any(|e| matches!(e, Event::Complete(_)))
        );
    }

    #[test]
    fn non_converging_component_ends_by_cancellation() {
        let cancel = CancelToken::new();
        let mut sup = RunSupervisor::new(
            MemoryLoader::with("block.exr", centre_block()),
            ImageprocOps,
            Recorder {
                cancel_on_checkpoint: Some(cancel.clone()),
                ..Recorder::default()
            },
        );
        let request = RunRequest::new(
            "block.exr",
            DilateConfig {
                intensity_cutoff: 15.0,
                threshold: 1.0,
                ..config()
            },
        );
        let outcome = sup.run(&request, &cancel);
        let RunOutcome::Cancelled {
            partial,
            completed_components,
        } = outcome
        else {
            panic!("expected cancellation");
        };
        assert_eq!(completed_components, 0);
        assert_eq!(partial.processed, centre_block());
        assert!(sup.reporter().stages().contains(&CHECKPOINT_NOTICE));
    }

    #[test]
    fn missing_source_fails_without_running() {
        let mut sup = supervisor(two_dots());
        let outcome = sup.run(
            &RunRequest::new("missing.exr", config()),
            &CancelToken::new(),
        );
        assert!(matches!(
            outcome,
            RunOutcome::Failed(DilateError::Input(InputError::NotFound(_)))
        ));
        assert_eq!(sup.state().get(), RunState::Failed);

        let stages = sup.reporter().stages();
        assert_eq!(stages, vec!["Loading image... missing.exr"]);
        assert!(matches!(
            sup.reporter().events.last(),
            Some(Event::Error(msg)) if msg.contains("missing.exr")
        ));
    }

    #[test]
    fn empty_image_is_rejected() {
        let mut sup = supervisor(Rgb32FImage::new(0, 0));
        let outcome = sup.run(&RunRequest::new("dots.exr", config()), &CancelToken::new());
        assert!(matches!(
            outcome,
            RunOutcome::Failed(DilateError::Input(InputError::UnsupportedShape { .. }))
        ));
    }

    #[test]
    fn invalid_config_fails_before_loading() {
        let mut sup = supervisor(two_dots());
        let request = RunRequest::new(
            "dots.exr",
            DilateConfig {
                blur_size: 4,
                ..config()
            },
        );
        let outcome = sup.run(&request, &CancelToken::new());
        assert!(matches!(
            outcome,
            RunOutcome::Failed(DilateError::InvalidConfig(_))
        ));
        assert!(sup.reporter().stages().is_empty());
    }

    #[test]
    fn primitive_panic_becomes_runtime_error() {
        let mut sup = RunSupervisor::new(
            MemoryLoader::with("dots.exr", two_dots()),
            PanickingOps,
            Recorder::default(),
        );
        let outcome = sup.run(&RunRequest::new("dots.exr", config()), &CancelToken::new());
        let RunOutcome::Failed(DilateError::Runtime(message)) = outcome else {
            panic!("expected runtime failure");
        };
        assert!(message.contains("dilate exploded"));
        assert_eq!(sup.state().get(), RunState::Failed);
    }

    #[test]
    fn debug_frames_are_reported_when_enabled() {
        let mut sup = supervisor(two_dots());
        let request = RunRequest::new(
            "dots.exr",
            DilateConfig {
                debug_interval: Some(1),
                ..config()
            },
        );
        let _ = sup.run(&request, &CancelToken::new());
        let frames: Vec<_> = sup
            .reporter()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Frame(c, i) => Some((*c, *i)),
                _ => None,
            })
            .collect();
        assert_eq!(frames, vec![(1, 1), (1, 2), (2, 1), (2, 2)]);
    }

    #[test]
    fn background_run_joins_with_outcome() {
        let sup = RunSupervisor::new(
            MemoryLoader::with("dots.exr", two_dots()),
            ImageprocOps,
            crate::progress::NullReporter,
        );
        let handle = sup
            .start(RunRequest::new("dots.exr", config()))
            .unwrap();
        let outcome = handle.join();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
    }

    #[test]
    fn background_run_can_be_cancelled() {
        struct Shared(Arc<Mutex<Vec<String>>>);

        impl ProgressReporter for Shared {
            fn on_progress(&mut self, _current: u32, _max: u32) {}

            fn on_stage(&mut self, message: &str) {
                self.0.lock().unwrap().push(message.to_owned());
            }

            fn on_complete(&mut self, _elapsed: Duration) {}

            fn on_error(&mut self, _error: &DilateError) {}
        }

        let events = Arc::new(Mutex::new(Vec::new()));
        let sup = RunSupervisor::new(
            MemoryLoader::with("block.exr", centre_block()),
            ImageprocOps,
            Shared(events.clone()),
        );
        let request = RunRequest::new(
            "block.exr",
            DilateConfig {
                intensity_cutoff: 15.0,
                ..config()
            },
        );
        let handle = sup.start(request).unwrap();
        handle.cancel();
        let outcome = handle.join();
        assert!(matches!(outcome, RunOutcome::Cancelled { .. }));
        assert!(
            events
                .lock()
                .unwrap()
                .iter()
                .any(|s| s == SAFE_TO_CLOSE_NOTICE)
        );
    }

    #[test]
    fn background_run_is_observable_while_running() {
        let sup = RunSupervisor::new(
            MemoryLoader::with("block.exr", centre_block()),
            ImageprocOps,
            crate::progress::NullReporter,
        );
        let shared = sup.state();
        let request = RunRequest::new(
            "block.exr",
            DilateConfig {
                intensity_cutoff: 15.0,
                ..config()
            },
        );
        let handle = sup.start(request).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.state() != RunState::Running {
            assert!(
                std::time::Instant::now() < deadline,
                "run never left {:?}",
                handle.state()
            );
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!handle.is_finished());
        assert_eq!(shared.get(), RunState::Running);

        let token = handle.cancel_token();
        token.cancel();
        let outcome = handle.join();
        assert!(matches!(outcome, RunOutcome::Cancelled { .. }));
        assert!(token.is_cancelled());
        assert_eq!(shared.get(), RunState::Cancelled);
    }

    #[test]
    fn memory_notices_size_each_detection_buffer() {
        let notices = memory_notices(Dimensions {
            width: 1024,
            height: 1024,
        });
        assert_eq!(
            notices,
            [
                "CC Labels Memory 4 MB",
                "Saturated Mask Memory 3 MB",
                "Saturated Mask Grayscale Memory 1 MB",
            ]
        );
    }

    #[test]
    fn memory_notices_are_staged_after_detection() {
        let mut sup = supervisor(two_dots());
        let _ = sup.run(&RunRequest::new("dots.exr", config()), &CancelToken::new());
        let stages = sup.reporter().stages();
        let processing = stages.iter().position(|s| *s == "Processing mask...").unwrap();
        assert!(stages[processing + 1].starts_with("CC Labels Memory "));
        assert!(stages[processing + 2].starts_with("Saturated Mask Memory "));
        assert!(stages[processing + 3].starts_with("Saturated Mask Grayscale Memory "));
    }

    #[test]
    fn run_state_round_trips_through_atomic() {
        let state = SharedRunState::default();
        assert_eq!(state.get(), RunState::Idle);
        for s in [
            RunState::Running,
            RunState::Cancelled,
            RunState::Completed,
            RunState::Failed,
        ] {
            state.set(s);
            assert_eq!(state.get(), s);
            assert!(s == RunState::Running || s.is_terminal());
        }
    }
}
