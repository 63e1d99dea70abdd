//! Scan/Click Pipeline: the per-tick algorithm that ties capture, matching,
//! hit-streak gating, and click dispatch together.

pub mod click;
pub mod foreground;
pub mod scheduler;

use std::time::Instant;

use crate::{
    capture::{CaptureBackend, CaptureTuning, Frame},
    config::{CaptureTarget, Roi, ScanConfig},
    error::AgentError,
    matcher::{MatchInput, TemplateSet},
};

use click::ClickDispatcher;

/// What happened on one tick, for the worker loop to turn into `Status`/
/// `Hit`/`Log` wire messages.
#[derive(Debug)]
pub enum TickOutcome {
    /// No frame was available this tick; the caller should just wait for
    /// the scheduler's next delay.
    NoFrame,
    /// A frame was matched but did not clear the click gate.
    Miss { score: f32 },
    /// A frame matched and a click either succeeded or failed to dispatch.
    Hit {
        score: f32,
        screen_point: (i32, i32),
        dispatch_error: Option<AgentError>,
    },
}

/// Per-worker mutable state the pipeline advances one tick at a time.
struct PipelineState {
    consecutive_hits: u32,
    next_click_allowed_at: Option<Instant>,
    scan_count: u64,
    /// Monitor index the multi-screen polling cursor is currently bound to.
    polling_monitor_index: u32,
    last_polling_switch_at: Option<Instant>,
}

impl PipelineState {
    fn new(initial_monitor_index: u32) -> Self {
        PipelineState {
            consecutive_hits: 0,
            next_click_allowed_at: None,
            scan_count: 0,
            polling_monitor_index: initial_monitor_index,
            last_polling_switch_at: Some(Instant::now()),
        }
    }
}

/// Orchestrates one worker's capture → match → click loop.
pub struct ScanPipeline {
    config: ScanConfig,
    templates: TemplateSet,
    state: PipelineState,
}

impl ScanPipeline {
    pub fn new(config: ScanConfig) -> Self {
        let initial_monitor_index = config.target.monitor_index.unwrap_or(0);
        ScanPipeline {
            config,
            templates: TemplateSet::default(),
            state: PipelineState::new(initial_monitor_index),
        }
    }

    pub fn scan_count(&self) -> u64 {
        self.state.scan_count
    }

    pub fn replace_config(&mut self, config: ScanConfig) {
        self.config = config;
    }

    /// Runs one tick: acquire a frame, crop to ROI, match templates, gate
    /// and dispatch a click if warranted. `capture` and `dispatcher` are
    /// injected so tests can run this against [`crate::capture::MockCaptureBackend`]
    /// and [`click::RecordingClickDispatcher`].
    pub async fn tick(
        &mut self,
        capture: &mut dyn CaptureBackend,
        dispatcher: &mut dyn ClickDispatcher,
        target_hwnd: Option<isize>,
    ) -> Result<TickOutcome, AgentError> {
        self.templates.reload_if_changed(
            &self.config.template_paths,
            self.config.grayscale,
            self.config.multi_scale,
            &self.config.scales,
        )?;

        if target_hwnd.is_none() && self.config.enable_multi_screen_polling {
            self.advance_polling_monitor(capture).await?;
        }

        let Some(frame) = capture.capture_frame(self.config.restore_after_capture).await else {
            return Ok(TickOutcome::NoFrame);
        };
        self.state.scan_count += 1;

        let (roi_left, roi_top, roi_pixels, roi_width, roi_height, roi_stride) = crop_to_roi(&frame, &self.config.roi);

        let input = MatchInput {
            pixels: &roi_pixels,
            width: roi_width,
            height: roi_height,
            channels: if self.config.grayscale { 1 } else { 3 },
        };
        let _ = roi_stride;
        let result = self.templates.best_match(&input);

        if result.score >= self.config.threshold {
            self.state.consecutive_hits += 1;
        } else {
            self.state.consecutive_hits = 0;
            return Ok(TickOutcome::Miss { score: result.score });
        }

        let now = Instant::now();
        let gated = self.state.consecutive_hits >= self.config.min_detections
            && self.state.next_click_allowed_at.map(|t| now >= t).unwrap_or(true);

        if !gated {
            return Ok(TickOutcome::Miss { score: result.score });
        }

        let (mx, my) = result.top_left;
        let (tw, th) = result.size;
        let content_point = (
            roi_left as i32 + mx as i32 + tw as i32 / 2 + self.config.click_offset.0,
            roi_top as i32 + my as i32 + th as i32 / 2 + self.config.click_offset.1,
        );

        let dispatch_result = self.dispatch_click(dispatcher, content_point, frame.content_size, target_hwnd);

        match dispatch_result {
            Ok(screen_point) => {
                let cooldown = std::time::Duration::from_secs_f32(self.config.cooldown_s);
                self.state.next_click_allowed_at = Some(now + cooldown);
                self.state.consecutive_hits = 0;
                Ok(TickOutcome::Hit {
                    score: result.score,
                    screen_point,
                    dispatch_error: None,
                })
            }
            Err(e) => {
                self.state.consecutive_hits = 0;
                Ok(TickOutcome::Hit {
                    score: result.score,
                    screen_point: content_point,
                    dispatch_error: Some(e),
                })
            }
        }
    }

    /// Cycles the capture backend across connected monitors once
    /// `screen_polling_interval_ms` has elapsed, rebinding it to the next
    /// monitor in sequence. A no-op when only one monitor is connected.
    async fn advance_polling_monitor(&mut self, capture: &mut dyn CaptureBackend) -> Result<(), AgentError> {
        let monitor_count = capture.monitor_count();
        if monitor_count <= 1 {
            return Ok(());
        }

        let now = Instant::now();
        let elapsed_ms = self
            .state
            .last_polling_switch_at
            .map(|t| now.duration_since(t).as_millis() as u64)
            .unwrap_or(u64::MAX);
        if elapsed_ms < self.config.screen_polling_interval_ms {
            return Ok(());
        }

        self.state.polling_monitor_index = (self.state.polling_monitor_index + 1) % monitor_count;
        self.state.last_polling_switch_at = Some(now);

        capture.close().await;
        capture.open_monitor(self.state.polling_monitor_index).await?;
        capture
            .configure(CaptureTuning {
                fps: self.config.fps_max,
                include_cursor: self.config.include_cursor,
                border_required: self.config.border_required,
                restore_minimized_noactivate: self.config.restore_minimized_noactivate,
                capture_timeout_ms: self.config.capture_timeout_ms,
            })
            .await?;
        Ok(())
    }

    fn dispatch_click(
        &self,
        dispatcher: &mut dyn ClickDispatcher,
        content_point: (i32, i32),
        content_size: (u32, u32),
        target_hwnd: Option<isize>,
    ) -> Result<(i32, i32), AgentError> {
        match target_hwnd {
            Some(hwnd) => {
                dispatcher.click_in_window(hwnd, content_point, content_size, self.config.click_method)
            }
            None => {
                let resolved = dispatcher.click_on_screen(
                    content_point,
                    self.config.enhanced_window_finding,
                    self.config.verify_window_before_click,
                    self.config.click_method,
                )?;
                Ok(resolved.client_point)
            }
        }
    }
}

/// Crops a frame to its ROI, returning `(roi_left, roi_top, bytes, width, height, stride)`.
/// `w == 0 || h == 0` in the ROI means the whole frame; an ROI extending
/// past the frame is clipped rather than overflowing.
fn crop_to_roi(frame: &Frame, roi: &Roi) -> (u32, u32, Vec<u8>, u32, u32, usize) {
    if roi.is_full() {
        return (0, 0, frame.bgr_pixels.clone(), frame.width, frame.height, frame.stride);
    }

    let left = roi.x.min(frame.width);
    let top = roi.y.min(frame.height);
    let width = roi.width.min(frame.width.saturating_sub(left));
    let height = roi.height.min(frame.height.saturating_sub(top));

    let dst_stride = width as usize * Frame::BYTES_PER_PIXEL;
    let mut pixels = vec![0u8; dst_stride * height as usize];
    for y in 0..height {
        let src_row = frame.row(top + y);
        let src_start = left as usize * Frame::BYTES_PER_PIXEL;
        let src_end = src_start + dst_stride;
        let dst_start = y as usize * dst_stride;
        pixels[dst_start..dst_start + dst_stride].copy_from_slice(&src_row[src_start..src_end]);
    }

    (left, top, pixels, width, height, dst_stride)
}

/// Whether a target describes a window or a monitor, used to pick the
/// click-dispatch path.
pub fn capture_mode_of(target: &CaptureTarget) -> crate::capture::CaptureMode {
    if target.monitor_index.is_some() {
        crate::capture::CaptureMode::Monitor
    } else {
        crate::capture::CaptureMode::Window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::mock::{blank_frame, MockCaptureBackend};
    use crate::pipeline::click::RecordingClickDispatcher;
    use std::time::Duration;

    fn config_with_no_templates() -> ScanConfig {
        let mut cfg = ScanConfig::default();
        cfg.target.monitor_index = Some(0);
        cfg.template_paths = Vec::new();
        cfg.threshold = 0.5;
        cfg.grayscale = false;
        cfg.min_detections = 1;
        cfg.cooldown_s = 5.0;
        cfg
    }

    #[test]
    fn crop_to_roi_clips_an_roi_extending_past_frame_bounds() {
        let frame = blank_frame((10, 10), Duration::ZERO);
        let roi = Roi {
            x: 8,
            y: 8,
            width: 20,
            height: 20,
        };
        let (left, top, _pixels, width, height, _stride) = crop_to_roi(&frame, &roi);
        assert_eq!((left, top, width, height), (8, 8, 2, 2));
    }

    #[test]
    fn crop_to_roi_full_sentinel_returns_whole_frame() {
        let frame = blank_frame((10, 10), Duration::ZERO);
        let (left, top, _pixels, width, height, _stride) = crop_to_roi(&frame, &Roi::FULL);
        assert_eq!((left, top, width, height), (0, 0, 10, 10));
    }

    #[tokio::test]
    async fn miss_resets_consecutive_hits_to_zero() {
        // An empty template set always scores 0.0 and never clears the
        // threshold: isolates the miss-path bookkeeping from template
        // loading.
        let cfg = config_with_no_templates();
        let mut pipeline = ScanPipeline::new(cfg);
        let mut capture = MockCaptureBackend::new((20, 20));
        capture.open_monitor(0).await.unwrap();
        let mut dispatcher = RecordingClickDispatcher::default();

        let outcome = pipeline.tick(&mut capture, &mut dispatcher, None).await;
        assert!(matches!(outcome, Ok(TickOutcome::Miss { score }) if score == 0.0));
        assert_eq!(pipeline.state.consecutive_hits, 0);
    }

    #[tokio::test]
    async fn multi_screen_polling_rebinds_to_the_next_monitor_after_the_dwell_interval() {
        let mut cfg = config_with_no_templates();
        cfg.enable_multi_screen_polling = true;
        cfg.screen_polling_interval_ms = 10;
        let mut pipeline = ScanPipeline::new(cfg);
        let mut capture = MockCaptureBackend::new((20, 20)).with_monitor_count(3);
        capture.open_monitor(0).await.unwrap();
        let mut dispatcher = RecordingClickDispatcher::default();

        pipeline.tick(&mut capture, &mut dispatcher, None).await.unwrap();
        assert_eq!(pipeline.state.polling_monitor_index, 0);

        tokio::time::sleep(Duration::from_millis(15)).await;
        pipeline.tick(&mut capture, &mut dispatcher, None).await.unwrap();
        assert_eq!(pipeline.state.polling_monitor_index, 1);
        assert_eq!(pipeline.scan_count(), 2);
    }

    #[tokio::test]
    async fn multi_screen_polling_is_a_no_op_with_a_single_monitor() {
        let mut cfg = config_with_no_templates();
        cfg.enable_multi_screen_polling = true;
        cfg.screen_polling_interval_ms = 1;
        let mut pipeline = ScanPipeline::new(cfg);
        let mut capture = MockCaptureBackend::new((20, 20)).with_monitor_count(1);
        capture.open_monitor(0).await.unwrap();
        let mut dispatcher = RecordingClickDispatcher::default();

        tokio::time::sleep(Duration::from_millis(5)).await;
        pipeline.tick(&mut capture, &mut dispatcher, None).await.unwrap();
        assert_eq!(pipeline.state.polling_monitor_index, 0);
    }

    #[test]
    fn capture_mode_of_prefers_monitor_when_index_set() {
        let target = CaptureTarget {
            monitor_index: Some(0),
            ..Default::default()
        };
        assert_eq!(capture_mode_of(&target), crate::capture::CaptureMode::Monitor);
    }
}
