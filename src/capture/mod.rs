//! Capture backend trait and the frame/session types it produces.
//!
//! A [`CaptureBackend`] owns at most one live capture session (a window or a
//! monitor) and hands out [`Frame`]s on demand. The only production
//! implementation is [`windows_backend::WindowsCaptureBackend`]; tests and
//! the pipeline's own unit tests run against [`mock::MockCaptureBackend`]
//! instead, so that neither compiles any Win32 code.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::AgentError;

pub mod dpi;
pub mod mock;
pub mod window_target;

#[cfg(target_os = "windows")]
pub mod windows_backend;

pub use mock::MockCaptureBackend;
#[cfg(target_os = "windows")]
pub use windows_backend::WindowsCaptureBackend;
pub use window_target::{CaptureMode, WindowTarget};

/// A single captured frame, still owned in BGR byte order as delivered by
/// the capture library.
///
/// `stride` is the number of bytes between the start of one row and the
/// next; it may exceed `width * 3` when the underlying surface is padded,
/// and every consumer must index through it rather than assuming a flat
/// `width * height * 3` layout.
#[derive(Debug, Clone)]
pub struct Frame {
    pub bgr_pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub content_size: (u32, u32),
    pub monotonic_timestamp: Duration,
}

impl Frame {
    /// Number of bytes making up one BGR pixel.
    pub const BYTES_PER_PIXEL: usize = 3;

    /// Borrows one row of pixel bytes, honoring `stride`.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        let end = start + self.width as usize * Self::BYTES_PER_PIXEL;
        &self.bgr_pixels[start..end]
    }

    /// Reads the BGR triple at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let row = self.row(y);
        let offset = x as usize * Self::BYTES_PER_PIXEL;
        [row[offset], row[offset + 1], row[offset + 2]]
    }
}

/// Snapshot of a session's running counters, for diagnostics and `Status`
/// messages.
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    pub frame_count: u64,
    pub elapsed: Duration,
    pub target_fps: u32,
    pub actual_fps: f32,
    pub content_size: (u32, u32),
    pub session_healthy: bool,
}

/// Capture tuning parameters that can be changed on a live backend via
/// [`CaptureBackend::configure`].
#[derive(Debug, Clone, Copy)]
pub struct CaptureTuning {
    pub fps: u32,
    pub include_cursor: bool,
    pub border_required: bool,
    pub restore_minimized_noactivate: bool,
    /// Longest a single `capture_frame` call may wait for a frame before
    /// giving up and counting it as a health-check failure.
    pub capture_timeout_ms: u64,
}

impl Default for CaptureTuning {
    fn default() -> Self {
        CaptureTuning {
            fps: 30,
            include_cursor: false,
            border_required: false,
            restore_minimized_noactivate: true,
            capture_timeout_ms: 2000,
        }
    }
}

/// Provides BGR frames of a window or monitor at a bounded rate.
///
/// Implementations must never fall back to a capture mechanism that
/// requires the target to be foregrounded or on top (no `PrintWindow`-style
/// "grab it even if covered" path) — initialization failures are reported
/// as [`AgentError::CaptureUnavailable`] instead.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Resolves `target` to a window handle and creates (but does not
    /// start) a capture session for it.
    async fn open_window(&mut self, target: &WindowTarget) -> Result<(), AgentError>;

    /// Resolves a monitor by 0-based index and creates a capture session
    /// for it.
    async fn open_monitor(&mut self, index: u32) -> Result<(), AgentError>;

    /// Applies new capture tuning. If a session is already open it is
    /// closed and reopened against the same target with the new tuning.
    async fn configure(&mut self, tuning: CaptureTuning) -> Result<(), AgentError>;

    /// Returns the most recently captured frame, or `None` on a transient
    /// failure the caller may retry on the next tick.
    ///
    /// `restore_after_capture` re-minimizes a window that was restored from
    /// an iconic state purely to be captured.
    async fn capture_frame(&mut self, restore_after_capture: bool) -> Option<Frame>;

    /// Running counters for the current session.
    fn get_stats(&self) -> CaptureStats;

    /// Number of connected monitors, for multi-screen polling's cursor to
    /// cycle over.
    fn monitor_count(&self) -> u32;

    /// Idempotently tears down the session, re-minimizing the target window
    /// if it was minimized when opened and tuning requested it.
    async fn close(&mut self);
}
