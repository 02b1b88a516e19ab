//! Progress reporting and cooperative cancellation.
//!
//! A run talks to its caller only through a [`ProgressReporter`] handed
//! to the supervisor at construction, plus a shared [`CancelToken`] the
//! caller may raise at any time. The engine polls the token once per
//! component and once per growth iteration; it never interrupts a
//! primitive mid-call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::time::Duration;

use crate::debug::DebugFrame;
use crate::types::DilateError;

/// Observer for a running dilation.
///
/// All methods are called from the worker thread, in order.
pub trait ProgressReporter: Send {
    /// Progress counter update. `(0, 0)` resets the indicator to an
    /// indeterminate state.
    fn on_progress(&mut self, current: u32, max: u32);

    /// Human-readable stage message.
    fn on_stage(&mut self, message: &str);

    /// An intermediate debug frame. Ignored unless overridden.
    fn on_debug_frame(&mut self, frame: DebugFrame) {
        let _ = frame;
    }

    /// The run completed normally after `elapsed`.
    fn on_complete(&mut self, elapsed: Duration);

    /// The run failed.
    fn on_error(&mut self, error: &DilateError);
}

/// A reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn on_progress(&mut self, _current: u32, _max: u32) {}

    fn on_stage(&mut self, _message: &str) {}

    fn on_complete(&mut self, _elapsed: Duration) {}

    fn on_error(&mut self, _error: &DilateError) {}
}

/// Owned form of every [`ProgressReporter`] callback.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// See [`ProgressReporter::on_progress`].
    Progress {
        /// Components processed so far.
        current: u32,
        /// Total components, or 0 when indeterminate.
        max: u32,
    },
    /// See [`ProgressReporter::on_stage`].
    Stage(String),
    /// See [`ProgressReporter::on_debug_frame`].
    DebugFrame(Box<DebugFrame>),
    /// See [`ProgressReporter::on_complete`].
    Complete(Duration),
    /// See [`ProgressReporter::on_error`], with the error rendered as text.
    Error(String),
}

/// Forwards every callback as a [`ProgressEvent`] over a channel.
///
/// Lets the caller thread poll for updates without blocking the worker.
/// Events sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: Sender<ProgressEvent>,
    debug_frames: bool,
}

impl ChannelReporter {
    /// Forward events to `sender`. Debug frames are dropped unless
    /// [`with_debug_frames`](Self::with_debug_frames) is set, since they
    /// carry four full-size masks each.
    #[must_use]
    pub const fn new(sender: Sender<ProgressEvent>) -> Self {
        Self {
            sender,
            debug_frames: false,
        }
    }

    /// Also forward debug frames.
    #[must_use]
    pub const fn with_debug_frames(mut self, enabled: bool) -> Self {
        self.debug_frames = enabled;
        self
    }

    fn send(&self, event: ProgressEvent) {
        // A disconnected receiver means nobody is listening anymore.
        let _ = self.sender.send(event);
    }
}

impl ProgressReporter for ChannelReporter {
    fn on_progress(&mut self, current: u32, max: u32) {
        self.send(ProgressEvent::Progress { current, max });
    }

    fn on_stage(&mut self, message: &str) {
        self.send(ProgressEvent::Stage(message.to_owned()));
    }

    fn on_debug_frame(&mut self, frame: DebugFrame) {
        if self.debug_frames {
            self.send(ProgressEvent::DebugFrame(Box::new(frame)));
        }
    }

    fn on_complete(&mut self, elapsed: Duration) {
        self.send(ProgressEvent::Complete(elapsed));
    }

    fn on_error(&mut self, error: &DilateError) {
        self.send(ProgressEvent::Error(error.to_string()));
    }
}

/// Shared cancellation flag.
///
/// Clones observe the same flag. Once raised it stays raised.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, unraised token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
