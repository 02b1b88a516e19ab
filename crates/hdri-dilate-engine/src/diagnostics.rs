//! What a dilation run reports once it ends.
//!
//! [`RunSummary`] collects one [`ComponentReport`] per grown component
//! together with the image size and the wall time of the run. The
//! supervisor reads time through [`Clock`], so tests can step time by
//! hand; [`SystemClock`] reads it from `web-time`.
//!
//! `total_duration` goes to JSON as plain seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ChannelMean, Dimensions};

/// `#[serde(with)]` adapter writing a run duration as seconds.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(value).map_err(|_| {
            serde::de::Error::custom(format!("run duration of {value}s is out of range"))
        })
    }
}

/// Source of timestamps for measuring a run.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by `web_time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    type Instant = web_time::Instant;

    fn now(&self) -> web_time::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &web_time::Instant) -> Duration {
        since.elapsed()
    }
}

/// Statistics for one converged component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentReport {
    /// Component label.
    pub label: u32,
    /// Dilation steps until convergence.
    pub iterations: u32,
    /// Pixels in the converged mask, before blur.
    pub area: u64,
    /// Pixels written by the compositor.
    pub composited: u64,
    /// Value written into the output.
    pub mean: ChannelMean,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Source image dimensions.
    pub dimensions: Dimensions,
    /// Number of connected components found.
    pub component_count: u32,
    /// One entry per processed component, in label order.
    pub components: Vec<ComponentReport>,
    /// Wall-clock duration of the run (seconds).
    #[serde(with = "seconds")]
    pub total_duration: Duration,
}

impl RunSummary {
    /// Sum of growth iterations over all components.
    #[must_use]
    pub fn total_iterations(&self) -> u64 {
        self.components
            .iter()
            .map(|c| u64::from(c.iterations))
            .sum()
    }

    /// Multi-line human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        use std::fmt::Write;

        let mut out = format!(
            "Image {}x{}: {} components, {} iterations, {:.3}s\n",
            self.dimensions.width,
            self.dimensions.height,
            self.component_count,
            self.total_iterations(),
            self.total_duration.as_secs_f64(),
        );
        for c in &self.components {
            let _ = writeln!(
                out,
                "  CC {:>4}: {:>5} iterations, area {:>8}, mean [{:.4}, {:.4}, {:.4}]",
                c.label, c.iterations, c.area, c.mean[0], c.mean[1], c.mean[2],
            );
        }
        out
    }
}

/// Size of a buffer in megabytes, rounded to two decimals.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn megabytes(bytes: usize) -> f64 {
    (bytes as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0
}
