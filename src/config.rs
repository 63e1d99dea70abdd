//! Scan configuration: the knobs that shape one worker's capture target,
//! matching thresholds, click behaviour, and adaptive scheduling.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Region of interest within the captured frame, in content pixels.
/// `width == 0 || height == 0` means "the whole frame".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    /// An ROI covering the entire frame.
    pub const FULL: Roi = Roi {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };

    /// True if this ROI is the sentinel meaning "whole frame".
    pub fn is_full(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for Roi {
    fn default() -> Self {
        Roi::FULL
    }
}

/// How aggressively the scheduler polls: continuous regardless of which
/// window is focused, or only while a whitelisted process is foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Polling,
    Event,
}

impl Default for ScanMode {
    fn default() -> Self {
        ScanMode::Event
    }
}

/// How a click is delivered to the target window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickMethod {
    /// `WM_LBUTTONDOWN`/`WM_LBUTTONUP` via `SendMessageTimeout`.
    Message,
    /// Same messages via `PostMessage`, no round-trip acknowledgement.
    Post,
}

impl Default for ClickMethod {
    fn default() -> Self {
        ClickMethod::Message
    }
}

/// Identifies what a worker should capture: a specific monitor, or a window
/// resolved by handle, title substring, or owning process name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureTarget {
    /// Zero-based monitor index. Mutually exclusive with the window fields.
    pub monitor_index: Option<u32>,
    /// Raw HWND value, as returned by a previous window enumeration.
    pub target_hwnd: Option<isize>,
    /// Case-insensitive substring match against the window title.
    pub target_window_title: Option<String>,
    /// Exact, case-insensitive match against the owning process's
    /// executable name (e.g. `"Code.exe"`).
    pub target_process: Option<String>,
    /// If true, `target_window_title` matches as a substring; if false, the
    /// title must match exactly (still case-insensitive).
    pub title_partial_match: bool,
    /// If true, `target_process` matches as a substring; if false, the
    /// executable name must match exactly.
    pub process_partial_match: bool,
}

impl Default for CaptureTarget {
    fn default() -> Self {
        CaptureTarget {
            monitor_index: None,
            target_hwnd: None,
            target_window_title: None,
            target_process: None,
            title_partial_match: true,
            process_partial_match: true,
        }
    }
}

impl CaptureTarget {
    fn is_monitor(&self) -> bool {
        self.monitor_index.is_some()
    }

    fn is_window(&self) -> bool {
        self.target_hwnd.is_some()
            || self.target_window_title.is_some()
            || self.target_process.is_some()
    }
}

/// Full configuration for one scanner worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub target: CaptureTarget,
    pub roi: Roi,

    /// Paths to template images, checked in order; all must score above
    /// `threshold` for the configured `min_detections` to matter when more
    /// than one template is supplied.
    pub template_paths: Vec<PathBuf>,

    pub interval_ms: u64,
    pub threshold: f32,
    pub cooldown_s: f32,
    pub grayscale: bool,
    pub multi_scale: bool,
    pub scales: Vec<f32>,
    pub min_detections: u32,
    pub click_offset: (i32, i32),

    pub scan_mode: ScanMode,
    pub active_scan_interval_ms: u64,
    pub idle_scan_interval_ms: u64,
    pub miss_backoff_ms_max: u64,
    pub hit_cooldown_ms: u64,
    pub process_whitelist: Vec<String>,

    pub enhanced_window_finding: bool,
    pub verify_window_before_click: bool,
    pub click_method: ClickMethod,

    pub fps_max: u32,
    pub capture_timeout_ms: u64,

    /// Include the OS cursor in captured frames.
    pub include_cursor: bool,
    /// Request the yellow WGC capture border around the captured surface.
    pub border_required: bool,
    /// Restore a minimized target window (without activating it) before
    /// sampling a frame.
    pub restore_minimized_noactivate: bool,
    /// Re-minimize the target window after capture if it was minimized and
    /// restored for this sample.
    pub restore_after_capture: bool,

    /// In `monitor` mode, cycle across all connected monitors instead of
    /// staying pinned to `target.monitor_index`.
    pub enable_multi_screen_polling: bool,
    /// How long to dwell on each monitor before advancing the polling
    /// cursor, when `enable_multi_screen_polling` is set.
    pub screen_polling_interval_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            target: CaptureTarget::default(),
            roi: Roi::default(),
            template_paths: Vec::new(),
            interval_ms: 800,
            threshold: 0.88,
            cooldown_s: 5.0,
            grayscale: true,
            multi_scale: false,
            scales: vec![1.0, 1.25, 0.8],
            min_detections: 1,
            click_offset: (0, 0),
            scan_mode: ScanMode::Event,
            active_scan_interval_ms: 120,
            idle_scan_interval_ms: 2000,
            miss_backoff_ms_max: 5000,
            hit_cooldown_ms: 4000,
            process_whitelist: vec![
                "Code.exe".to_string(),
                "Windsurf.exe".to_string(),
                "Trae.exe".to_string(),
            ],
            enhanced_window_finding: true,
            verify_window_before_click: true,
            click_method: ClickMethod::Message,
            fps_max: 30,
            capture_timeout_ms: 2000,
            include_cursor: false,
            border_required: false,
            restore_minimized_noactivate: true,
            restore_after_capture: false,
            enable_multi_screen_polling: false,
            screen_polling_interval_ms: 1000,
        }
    }
}

impl ScanConfig {
    /// Validates field ranges and target exclusivity. Call before handing a
    /// config to a worker; an invalid config is rejected up front rather
    /// than discovered mid-scan.
    pub fn validate(&self) -> Result<(), AgentError> {
        let bad = |reason: &str| AgentError::Configuration {
            reason: reason.to_string(),
        };

        if self.target.is_monitor() == self.target.is_window() {
            return Err(bad(
                "exactly one of monitor_index or a window-targeting field must be set",
            ));
        }
        if self.interval_ms == 0 {
            return Err(bad("interval_ms must be at least 1"));
        }
        if !(1..=60).contains(&self.fps_max) {
            return Err(bad("fps_max must be between 1 and 60"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(bad("threshold must be between 0.0 and 1.0"));
        }
        if self.min_detections == 0 {
            return Err(bad("min_detections must be at least 1"));
        }
        if self.template_paths.is_empty() {
            return Err(bad("template_paths must not be empty"));
        }
        if self.multi_scale {
            if self.scales.is_empty() {
                return Err(bad("scales must not be empty when multi_scale is enabled"));
            }
            if self.scales.iter().any(|s| *s <= 0.0) {
                return Err(bad("every scale factor must be greater than 0"));
            }
        }
        if self.active_scan_interval_ms == 0 || self.idle_scan_interval_ms == 0 {
            return Err(bad(
                "active_scan_interval_ms and idle_scan_interval_ms must be at least 1",
            ));
        }
        if self.miss_backoff_ms_max < self.active_scan_interval_ms {
            return Err(bad(
                "miss_backoff_ms_max must be at least active_scan_interval_ms",
            ));
        }
        if self.enable_multi_screen_polling && self.screen_polling_interval_ms == 0 {
            return Err(bad(
                "screen_polling_interval_ms must be at least 1 when multi-screen polling is enabled",
            ));
        }

        Ok(())
    }

    /// Sorted ascending copy of `scales`, used as the basis for the
    /// template-set cache key so equivalent configs hash identically
    /// regardless of the order scales were listed in.
    pub fn sorted_scales(&self) -> Vec<f32> {
        let mut scales = self.scales.clone();
        scales.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        scales
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ScanConfig {
        let mut cfg = ScanConfig::default();
        cfg.target.monitor_index = Some(0);
        cfg.template_paths = vec![PathBuf::from("templates/approve.png")];
        cfg
    }

    #[test]
    fn default_config_with_a_target_and_template_is_valid() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn rejects_no_target_and_conflicting_targets() {
        let mut cfg = valid_config();
        cfg.target.monitor_index = None;
        assert!(cfg.validate().is_err());

        cfg.target.monitor_index = Some(0);
        cfg.target.target_process = Some("Code.exe".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold_and_fps() {
        let mut cfg = valid_config();
        cfg.threshold = 1.5;
        assert!(cfg.validate().is_err());

        cfg.threshold = 0.9;
        cfg.fps_max = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_templates_and_empty_scales_when_multi_scale() {
        let mut cfg = valid_config();
        cfg.template_paths.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = valid_config();
        cfg.multi_scale = true;
        cfg.scales = Vec::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_screen_polling_interval_only_when_enabled() {
        let mut cfg = valid_config();
        cfg.screen_polling_interval_ms = 0;
        cfg.validate().unwrap();

        cfg.enable_multi_screen_polling = true;
        assert!(cfg.validate().is_err());

        cfg.screen_polling_interval_ms = 1000;
        cfg.validate().unwrap();
    }

    #[test]
    fn capture_target_defaults_to_partial_matching() {
        let target = CaptureTarget::default();
        assert!(target.title_partial_match);
        assert!(target.process_partial_match);
    }

    #[test]
    fn sorted_scales_is_ascending_regardless_of_input_order() {
        let mut cfg = valid_config();
        cfg.scales = vec![1.25, 0.8, 1.0];
        assert_eq!(cfg.sorted_scales(), vec![0.8, 1.0, 1.25]);
    }

    #[test]
    fn roundtrips_through_json() {
        let cfg = valid_config();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ScanConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.interval_ms, cfg.interval_ms);
        assert_eq!(back.process_whitelist, cfg.process_whitelist);
    }

    #[test]
    fn ignores_unknown_fields_when_loading_json() {
        let json = r#"{"interval_ms": 500, "made_up_field": 42}"#;
        let cfg: ScanConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.interval_ms, 500);
    }
}
