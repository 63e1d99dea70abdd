//! Per-monitor DPI awareness, set once at process startup before any
//! capture or windowing API is touched.

/// Sets per-monitor-v2 DPI awareness, falling back to the older
/// per-monitor awareness API on Windows releases that predate v2.
///
/// Idempotent: calling this more than once is harmless, matching the
/// underlying `SetProcessDpiAwarenessContext` semantics.
#[cfg(target_os = "windows")]
pub fn set_process_dpi_awareness() {
    use windows_sys::Win32::UI::HiDpi::{
        SetProcessDpiAwareness, SetProcessDpiAwarenessContext,
        DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2, PER_MONITOR_AWARE,
    };

    unsafe {
        if SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) != 0 {
            return;
        }
        tracing::debug!(
            "per-monitor-v2 DPI awareness unavailable, falling back to per-monitor awareness"
        );
        let _ = SetProcessDpiAwareness(PER_MONITOR_AWARE);
    }
}

#[cfg(not(target_os = "windows"))]
pub fn set_process_dpi_awareness() {
    tracing::trace!("DPI awareness is a no-op off Windows");
}
