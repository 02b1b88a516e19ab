//! hdri-dilate: flatten saturated regions of an HDR image from the command line.
//!
//! Loads an OpenEXR or Radiance image, finds clipped highlights, grows
//! each one until its average falls below the threshold, replaces it with
//! that average, and writes the result next to the source (or to
//! `--output`). Optionally writes the threshold and dilated masks, a
//! four-way preview sheet, and per-iteration debug sheets.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin hdri-dilate -- [OPTIONS] <IMAGE_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use hdri_dilate_engine::{
    ChannelOrder, ChannelReporter, DilateConfig, DilateShape, ImageprocOps, OutputBundle,
    ProgressEvent, RunOutcome, RunRequest, RunSummary, RunSupervisor,
};
use hdri_dilate_io::{FileLoader, default_output_path, save_frame, save_hdr, save_mask, save_preview};
use log::{debug, error, info, warn};

/// How often the main thread wakes to check the timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Debug frame interval used when `--debug-dir` is given without
/// `--debug-interval`.
const DEFAULT_DEBUG_INTERVAL: u32 = 10;

/// Log file size that triggers rotation.
const LOG_ROTATE_BYTES: u64 = 1024 * 1024;

/// Rotated log files kept on disk.
const LOG_KEEP_FILES: usize = 4;

/// Exit code for a run stopped by `--timeout-secs`.
const EXIT_CANCELLED: u8 = 2;

/// Flatten saturated regions of an HDR image.
///
/// Each over-bright region (any channel above the intensity cutoff) is
/// grown until the average of the original image under it drops below
/// the threshold, then replaced by that average.
#[derive(Parser)]
#[command(name = "hdri-dilate", version)]
struct Cli {
    /// Path to the input image (.exr, otherwise read as Radiance .hdr).
    image_path: PathBuf,

    /// Output path. Defaults to `{stem}_dilated.{ext}` next to the input.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// A channel above this value marks a pixel as saturated.
    #[arg(long, default_value_t = DilateConfig::DEFAULT_INTENSITY_CUTOFF)]
    intensity_cutoff: f32,

    /// Regions grow while any channel of their mean is at or above this.
    #[arg(long, default_value_t = DilateConfig::DEFAULT_THRESHOLD)]
    threshold: f32,

    /// Structuring element growth per unit of `--dilate-iteration` (>= 2).
    #[arg(long, default_value_t = DilateConfig::DEFAULT_DILATE_SIZE)]
    dilate_size: u32,

    /// Structuring element reach, in units of `--dilate-size` (1-255).
    #[arg(long, default_value_t = DilateConfig::DEFAULT_DILATE_ITERATION)]
    dilate_iteration: u32,

    /// Structuring element shape.
    #[arg(long, value_enum, default_value_t = Shape::Rectangle)]
    dilate_shape: Shape,

    /// Composite hard-edged masks instead of blurring them first.
    #[arg(long)]
    no_blur: bool,

    /// Gaussian blur kernel size (odd, >= 3).
    #[arg(long, default_value_t = DilateConfig::DEFAULT_BLUR_SIZE)]
    blur_size: u32,

    /// Treat pixel data as BGR instead of RGB.
    #[arg(long)]
    bgr: bool,

    /// Full dilate config as a JSON string.
    ///
    /// When provided, all other dilate parameter flags are ignored.
    /// The JSON must be a valid `DilateConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Write the threshold and dilated masks (PNG) into this directory.
    #[arg(long)]
    mask_dir: Option<PathBuf>,

    /// Write a four-way preview sheet (PNG) to this path.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Write per-iteration debug sheets under `DIR/{stem}/`.
    #[arg(long, value_name = "DIR")]
    debug_dir: Option<PathBuf>,

    /// Growth iterations between debug sheets.
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    debug_interval: Option<u32>,

    /// Cancel the run after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Print the run summary as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Log level (error, warn, info, debug, trace) or a full log spec.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write rotating log files into this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// Structuring element shape selection.
#[derive(Clone, Copy, ValueEnum)]
enum Shape {
    /// Full square.
    Rectangle,
    /// Anchor row and column only.
    Cross,
    /// Ellipse inscribed in the square.
    Ellipse,
}

impl From<Shape> for DilateShape {
    fn from(shape: Shape) -> Self {
        match shape {
            Shape::Rectangle => Self::Rectangle,
            Shape::Cross => Self::Cross,
            Shape::Ellipse => Self::Ellipse,
        }
    }
}

/// Build a [`DilateConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<DilateConfig, String> {
    let mut config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        DilateConfig {
            intensity_cutoff: cli.intensity_cutoff,
            threshold: cli.threshold,
            dilate_size: cli.dilate_size,
            dilate_iteration: cli.dilate_iteration,
            dilate_shape: cli.dilate_shape.into(),
            channel_order: if cli.bgr {
                ChannelOrder::Bgr
            } else {
                ChannelOrder::Rgb
            },
            use_blur: !cli.no_blur,
            blur_size: cli.blur_size,
            debug_interval: cli.debug_interval,
        }
    };

    if cli.debug_dir.is_some() && config.debug_interval.is_none() {
        config.debug_interval = Some(DEFAULT_DEBUG_INTERVAL);
    }
    if cli.debug_dir.is_none() {
        config.debug_interval = None;
    }
    Ok(config)
}

/// Start the logger: stderr always, plus rotating files under `log_dir`.
fn setup_logging(level: &str, log_dir: Option<&Path>) -> Result<LoggerHandle, String> {
    let logger = Logger::try_with_str(level)
        .map_err(|e| format!("Invalid --log-level {level:?}: {e}"))?
        .format(flexi_logger::detailed_format);

    let logger = match log_dir {
        Some(dir) => logger
            .log_to_file(FileSpec::default().directory(dir).basename("hdri-dilate"))
            .duplicate_to_stderr(Duplicate::All)
            .rotate(
                Criterion::Size(LOG_ROTATE_BYTES),
                Naming::Timestamps,
                Cleanup::KeepLogFiles(LOG_KEEP_FILES),
            ),
        None => logger.log_to_stderr(),
    };

    logger
        .start()
        .map_err(|e| format!("Logger initialization failed: {e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _logger = match setup_logging(&cli.log_level, cli.log_dir.as_deref()) {
        Ok(handle) => handle,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            error!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    debug!("config: {config:?}");

    let order = config.channel_order;
    let (tx, rx) = mpsc::channel();
    let reporter = ChannelReporter::new(tx).with_debug_frames(cli.debug_dir.is_some());
    let supervisor = RunSupervisor::new(FileLoader, ImageprocOps, reporter);
    let handle = match supervisor.start(RunRequest::new(&cli.image_path, config)) {
        Ok(handle) => handle,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let deadline = cli
        .timeout_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut cancelled = false;
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => handle_event(event, cli.debug_dir.as_deref()),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if !cancelled && deadline.is_some_and(|d| Instant::now() >= d) {
            warn!("timeout reached, cancelling run");
            handle.cancel();
            cancelled = true;
        }
    }

    match handle.join() {
        RunOutcome::Completed { bundle, summary } => {
            if let Err(msg) = write_outputs(&cli, &bundle, order) {
                error!("{msg}");
                return ExitCode::FAILURE;
            }
            print_summary(&summary, cli.json)
        }
        RunOutcome::Cancelled {
            completed_components,
            ..
        } => {
            warn!("run cancelled after {completed_components} components, nothing written");
            ExitCode::from(EXIT_CANCELLED)
        }
        RunOutcome::Failed(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// React to one event from the worker. Stage messages are already
/// logged by the engine.
fn handle_event(event: ProgressEvent, debug_dir: Option<&Path>) {
    match event {
        ProgressEvent::Progress { current, max } if max > 0 => {
            info!("processed {current}/{max} components");
        }
        ProgressEvent::Progress { .. } | ProgressEvent::Stage(_) => {}
        ProgressEvent::DebugFrame(frame) => {
            if let Some(dir) = debug_dir
                && let Err(e) = save_frame(dir, &frame)
            {
                warn!("failed to write debug frame {:?}: {e}", frame.title);
            }
        }
        ProgressEvent::Complete(elapsed) => {
            info!("completed in {:.3}s", elapsed.as_secs_f64());
        }
        ProgressEvent::Error(msg) => debug!("worker reported: {msg}"),
    }
}

/// Write the processed image and any requested masks and previews.
fn write_outputs(cli: &Cli, bundle: &OutputBundle, order: ChannelOrder) -> Result<(), String> {
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.image_path, bundle.format));
    save_hdr(&output, &bundle.processed, order)
        .map_err(|e| format!("Error writing {}: {e}", output.display()))?;
    info!("processed image written to {}", output.display());

    if let Some(ref dir) = cli.mask_dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("Error creating {}: {e}", dir.display()))?;
        let stem = cli
            .image_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image");
        for (suffix, mask) in [
            ("threshold", &bundle.threshold_mask),
            ("dilated", &bundle.dilated_mask),
        ] {
            let path = dir.join(format!("{stem}_{suffix}.png"));
            save_mask(&path, mask).map_err(|e| format!("Error writing {}: {e}", path.display()))?;
        }
        info!("masks written to {}", dir.display());
    }

    if let Some(ref path) = cli.preview {
        info!("Generating 4-Way Debug Preview sheet...");
        save_preview(path, bundle, order)
            .map_err(|e| format!("Error writing {}: {e}", path.display()))?;
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, json: bool) -> ExitCode {
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!("Error serializing summary: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", summary.report());
    }
    ExitCode::SUCCESS
}
