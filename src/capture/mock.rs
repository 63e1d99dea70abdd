//! Deterministic capture backend for pipeline and scheduler tests.
//!
//! Adapted from the same builder-style injection pattern as the screenshot
//! backend's mock: `with_delay`/`with_error` let a test script exactly the
//! failure or latency it wants to see, and frames are synthesized rather
//! than captured so tests never touch a real window or monitor.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CaptureBackend, CaptureStats, CaptureTuning, Frame, WindowTarget};
use crate::error::AgentError;

/// A capture backend that serves synthetic frames instead of talking to
/// Windows Graphics Capture.
pub struct MockCaptureBackend {
    delay: Option<Duration>,
    error_injection: Option<AgentError>,
    content_size: (u32, u32),
    opened: bool,
    frame_count: u64,
    started_at: Option<Instant>,
    /// Frames to serve in order; once exhausted, the last frame repeats.
    scripted_frames: Vec<Frame>,
    monitor_count: u32,
}

impl MockCaptureBackend {
    /// A backend that serves a single blank frame of `content_size`.
    pub fn new(content_size: (u32, u32)) -> Self {
        MockCaptureBackend {
            delay: None,
            error_injection: None,
            content_size,
            opened: false,
            frame_count: 0,
            started_at: None,
            scripted_frames: vec![blank_frame(content_size, Duration::ZERO)],
            monitor_count: 1,
        }
    }

    /// Sets the value [`CaptureBackend::monitor_count`] reports, for tests
    /// exercising multi-screen polling.
    pub fn with_monitor_count(mut self, count: u32) -> Self {
        self.monitor_count = count;
        self
    }

    /// Injects a fixed per-call delay before every `capture_frame` returns.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes every `capture_frame` call fail with `error`.
    pub fn with_error(mut self, error: AgentError) -> Self {
        self.error_injection = Some(error);
        self
    }

    /// Replaces the frame sequence served across successive
    /// `capture_frame` calls, e.g. to paint a template's pixels onto frame
    /// #3 for a hit-detection scenario.
    pub fn with_scripted_frames(mut self, frames: Vec<Frame>) -> Self {
        self.scripted_frames = frames;
        self
    }

    fn next_scripted_frame(&self) -> Frame {
        let idx = (self.frame_count as usize).min(self.scripted_frames.len() - 1);
        self.scripted_frames[idx].clone()
    }

    async fn apply_delay(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Builds a solid-color BGR frame, defaulting to mid-gray, with no stride
/// padding.
pub fn blank_frame(content_size: (u32, u32), timestamp: Duration) -> Frame {
    let (width, height) = content_size;
    let stride = width as usize * Frame::BYTES_PER_PIXEL;
    let bgr_pixels = vec![128u8; stride * height as usize];
    Frame {
        bgr_pixels,
        width,
        height,
        stride,
        content_size,
        monotonic_timestamp: timestamp,
    }
}

/// Builds a frame identical to [`blank_frame`] except for a template's
/// pixels painted at `(offset_x, offset_y)`, for constructing deterministic
/// hit scenarios in pipeline tests.
pub fn frame_with_template_painted(
    content_size: (u32, u32),
    timestamp: Duration,
    template: &Frame,
    offset_x: u32,
    offset_y: u32,
) -> Frame {
    let mut frame = blank_frame(content_size, timestamp);
    for ty in 0..template.height {
        if offset_y + ty >= frame.height {
            break;
        }
        for tx in 0..template.width {
            if offset_x + tx >= frame.width {
                break;
            }
            let px = template.pixel(tx, ty);
            let row_start = (offset_y + ty) as usize * frame.stride;
            let col = (offset_x + tx) as usize * Frame::BYTES_PER_PIXEL;
            frame.bgr_pixels[row_start + col..row_start + col + 3].copy_from_slice(&px);
        }
    }
    frame
}

#[async_trait]
impl CaptureBackend for MockCaptureBackend {
    async fn open_window(&mut self, _target: &WindowTarget) -> Result<(), AgentError> {
        self.apply_delay().await;
        if let Some(err) = &self.error_injection {
            return Err(clone_error(err));
        }
        self.opened = true;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    async fn open_monitor(&mut self, _index: u32) -> Result<(), AgentError> {
        self.apply_delay().await;
        if let Some(err) = &self.error_injection {
            return Err(clone_error(err));
        }
        self.opened = true;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    async fn configure(&mut self, _tuning: CaptureTuning) -> Result<(), AgentError> {
        Ok(())
    }

    async fn capture_frame(&mut self, _restore_after_capture: bool) -> Option<Frame> {
        self.apply_delay().await;
        if self.error_injection.is_some() || !self.opened {
            return None;
        }
        let frame = self.next_scripted_frame();
        self.frame_count += 1;
        Some(frame)
    }

    fn get_stats(&self) -> CaptureStats {
        let elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        let actual_fps = if elapsed.as_secs_f32() > 0.0 {
            self.frame_count as f32 / elapsed.as_secs_f32()
        } else {
            0.0
        };
        CaptureStats {
            frame_count: self.frame_count,
            elapsed,
            target_fps: 30,
            actual_fps,
            content_size: self.content_size,
            session_healthy: self.opened && self.error_injection.is_none(),
        }
    }

    fn monitor_count(&self) -> u32 {
        self.monitor_count
    }

    async fn close(&mut self) {
        self.opened = false;
    }
}

fn clone_error(err: &AgentError) -> AgentError {
    match err {
        AgentError::Configuration { reason } => AgentError::Configuration {
            reason: reason.clone(),
        },
        AgentError::CaptureUnavailable { reason } => AgentError::CaptureUnavailable {
            reason: reason.clone(),
        },
        AgentError::CaptureTransient { reason } => AgentError::CaptureTransient {
            reason: reason.clone(),
        },
        AgentError::TargetGone { reason } => AgentError::TargetGone {
            reason: reason.clone(),
        },
        AgentError::MatcherSkip { reason } => AgentError::MatcherSkip {
            reason: reason.clone(),
        },
        AgentError::ClickDispatchFailure { reason } => AgentError::ClickDispatchFailure {
            reason: reason.clone(),
        },
        AgentError::WorkerCrash => AgentError::WorkerCrash,
        AgentError::Invariant(msg) => AgentError::Invariant(msg.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_frame_fails_before_open() {
        let mut backend = MockCaptureBackend::new((800, 600));
        assert!(backend.capture_frame(false).await.is_none());
    }

    #[tokio::test]
    async fn open_then_capture_yields_configured_content_size() {
        let mut backend = MockCaptureBackend::new((800, 600));
        backend
            .open_monitor(0)
            .await
            .expect("open_monitor should succeed with no injected error");
        let frame = backend.capture_frame(false).await.unwrap();
        assert_eq!(frame.content_size, (800, 600));
        assert_eq!(frame.stride, 800 * Frame::BYTES_PER_PIXEL);
    }

    #[tokio::test]
    async fn injected_error_fails_open_and_capture() {
        let mut backend = MockCaptureBackend::new((800, 600)).with_error(AgentError::TargetGone {
            reason: "window closed".into(),
        });
        assert!(backend.open_monitor(0).await.is_err());
        assert!(backend.capture_frame(false).await.is_none());
    }

    #[tokio::test]
    async fn delay_elapses_before_capture_returns() {
        let mut backend = MockCaptureBackend::new((64, 64)).with_delay(Duration::from_millis(20));
        backend.open_monitor(0).await.unwrap();
        let start = Instant::now();
        backend.capture_frame(false).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn scripted_frames_advance_then_repeat_last() {
        let frames = vec![
            blank_frame((4, 4), Duration::from_millis(0)),
            blank_frame((4, 4), Duration::from_millis(10)),
        ];
        let mut backend = MockCaptureBackend::new((4, 4)).with_scripted_frames(frames);
        backend.open_monitor(0).await.unwrap();
        let f1 = backend.capture_frame(false).await.unwrap();
        let f2 = backend.capture_frame(false).await.unwrap();
        let f3 = backend.capture_frame(false).await.unwrap();
        assert_eq!(f1.monotonic_timestamp, Duration::from_millis(0));
        assert_eq!(f2.monotonic_timestamp, Duration::from_millis(10));
        assert_eq!(f3.monotonic_timestamp, Duration::from_millis(10));
    }

    #[test]
    fn frame_with_template_painted_places_pixels_at_offset() {
        let template = Frame {
            bgr_pixels: vec![10, 20, 30, 10, 20, 30],
            width: 2,
            height: 1,
            stride: 6,
            content_size: (2, 1),
            monotonic_timestamp: Duration::ZERO,
        };
        let frame = frame_with_template_painted((10, 10), Duration::ZERO, &template, 3, 4);
        assert_eq!(frame.pixel(3, 4), [10, 20, 30]);
        assert_eq!(frame.pixel(4, 4), [10, 20, 30]);
        assert_eq!(frame.pixel(0, 0), [128, 128, 128]);
    }

    #[tokio::test]
    async fn close_marks_session_unhealthy() {
        let mut backend = MockCaptureBackend::new((4, 4));
        backend.open_monitor(0).await.unwrap();
        backend.close().await;
        assert!(!backend.get_stats().session_healthy);
    }
}
