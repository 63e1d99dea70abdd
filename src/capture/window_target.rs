//! Window target resolution: turning a handle, title substring, or owning
//! process name into a concrete HWND, and enumerating windows to do so.

use crate::error::AgentError;

/// Metadata about one top-level window, as returned by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub hwnd: isize,
    pub title: String,
    pub class: String,
    pub process_name: String,
    pub pid: u32,
}

/// Which kind of surface a worker captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Window,
    Monitor,
}

/// A window-targeting request, matching the exclusivity rule in the
/// configuration: exactly one of these should be set by the caller.
#[derive(Debug, Clone, Default)]
pub struct WindowTarget {
    pub hwnd: Option<isize>,
    pub title: Option<String>,
    pub title_partial_match: bool,
    pub process: Option<String>,
    pub process_partial_match: bool,
}

impl WindowTarget {
    pub fn by_hwnd(hwnd: isize) -> Self {
        WindowTarget {
            hwnd: Some(hwnd),
            ..Default::default()
        }
    }

    pub fn by_title(title: impl Into<String>, partial_match: bool) -> Self {
        WindowTarget {
            title: Some(title.into()),
            title_partial_match: partial_match,
            ..Default::default()
        }
    }

    pub fn by_process(process: impl Into<String>, partial_match: bool) -> Self {
        WindowTarget {
            process: Some(process.into()),
            process_partial_match: partial_match,
            ..Default::default()
        }
    }

    /// Picks the first window from `windows` that satisfies this target,
    /// trying HWND, then title, then process, in that priority order.
    pub fn resolve(&self, windows: &[WindowInfo]) -> Result<WindowInfo, AgentError> {
        if let Some(hwnd) = self.hwnd {
            return windows
                .iter()
                .find(|w| w.hwnd == hwnd)
                .cloned()
                .ok_or_else(|| AgentError::TargetGone {
                    reason: format!("no window with handle {hwnd}"),
                });
        }

        if let Some(title) = &self.title {
            let needle = normalize(title);
            return windows
                .iter()
                .find(|w| {
                    let haystack = normalize(&w.title);
                    if self.title_partial_match {
                        haystack.contains(&needle)
                    } else {
                        haystack == needle
                    }
                })
                .cloned()
                .ok_or_else(|| AgentError::Configuration {
                    reason: format!("no window with title matching {title:?}"),
                });
        }

        if let Some(process) = &self.process {
            let needle = normalize(process);
            return windows
                .iter()
                .find(|w| {
                    let haystack = normalize(&w.process_name);
                    if self.process_partial_match {
                        haystack.contains(&needle)
                    } else {
                        haystack == needle
                    }
                })
                .cloned()
                .ok_or_else(|| AgentError::Configuration {
                    reason: format!("no window owned by process matching {process:?}"),
                });
        }

        Err(AgentError::Configuration {
            reason: "window target has no hwnd, title, or process set".into(),
        })
    }
}

/// Lowercases and collapses whitespace runs, matching the original
/// implementation's title-comparison normalization.
fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(target_os = "windows")]
pub use self::win32::enumerate_windows;

#[cfg(target_os = "windows")]
mod win32 {
    use std::{ffi::OsString, os::windows::ffi::OsStringExt, ptr};

    use windows_sys::Win32::{
        Foundation::{CloseHandle, HWND},
        System::{
            ProcessStatus::GetModuleBaseNameW,
            Threading::{OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ},
        },
        UI::WindowsAndMessaging::{
            EnumWindows, GetClassNameW, GetWindowTextLengthW, GetWindowTextW,
            GetWindowThreadProcessId, IsWindowVisible,
        },
    };

    use super::WindowInfo;

    const MAX_TITLE_LEN: i32 = 32768;

    /// Enumerates visible, titled top-level windows.
    pub fn enumerate_windows() -> Vec<WindowInfo> {
        let mut handles: Vec<HWND> = Vec::new();

        unsafe extern "system" fn enum_callback(hwnd: HWND, lparam: isize) -> i32 {
            let handles = unsafe { &mut *(lparam as *mut Vec<HWND>) };
            if unsafe { IsWindowVisible(hwnd) } == 0 {
                return 1;
            }
            if unsafe { GetWindowTextLengthW(hwnd) } == 0 {
                return 1;
            }
            handles.push(hwnd);
            1
        }

        unsafe {
            EnumWindows(Some(enum_callback), &mut handles as *mut Vec<HWND> as isize);
        }

        handles.into_iter().map(fetch_window_info).collect()
    }

    fn fetch_window_info(hwnd: HWND) -> WindowInfo {
        let title = get_window_title(hwnd);
        let class = get_window_class(hwnd);
        let (pid, process_name) = get_window_process_info(hwnd);
        WindowInfo {
            hwnd: hwnd as isize,
            title,
            class,
            process_name,
            pid,
        }
    }

    /// `GetWindowTextLengthW` returns the length *without* the null
    /// terminator; the buffer must be sized `len + 1` or `GetWindowTextW`
    /// overruns it.
    fn get_window_title(hwnd: HWND) -> String {
        unsafe {
            let len = GetWindowTextLengthW(hwnd).min(MAX_TITLE_LEN);
            if len == 0 {
                return String::new();
            }
            let mut buffer: Vec<u16> = vec![0; (len + 1) as usize];
            let copied = GetWindowTextW(hwnd, buffer.as_mut_ptr(), buffer.len() as i32);
            if copied == 0 {
                return String::new();
            }
            buffer.truncate(copied as usize);
            OsString::from_wide(&buffer).to_string_lossy().into_owned()
        }
    }

    fn get_window_class(hwnd: HWND) -> String {
        unsafe {
            let mut buffer: Vec<u16> = vec![0; 256];
            let len = GetClassNameW(hwnd, buffer.as_mut_ptr(), buffer.len() as i32);
            if len == 0 {
                return String::new();
            }
            buffer.truncate(len as usize);
            OsString::from_wide(&buffer).to_string_lossy().into_owned()
        }
    }

    fn get_window_process_info(hwnd: HWND) -> (u32, String) {
        unsafe {
            let mut pid: u32 = 0;
            GetWindowThreadProcessId(hwnd, &mut pid);
            if pid == 0 {
                return (0, String::new());
            }
            let process_handle =
                OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, 0, pid);
            if process_handle.is_null() {
                return (pid, String::new());
            }
            let mut exe_buffer: Vec<u16> = vec![0; 260];
            let len = GetModuleBaseNameW(
                process_handle,
                ptr::null_mut(),
                exe_buffer.as_mut_ptr(),
                exe_buffer.len() as u32,
            );
            CloseHandle(process_handle);
            if len == 0 {
                return (pid, String::new());
            }
            exe_buffer.truncate(len as usize);
            (
                pid,
                OsString::from_wide(&exe_buffer).to_string_lossy().into_owned(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_windows() -> Vec<WindowInfo> {
        vec![
            WindowInfo {
                hwnd: 42,
                title: "Visual Studio Code - approve-agent".into(),
                class: "Chrome_WidgetWin_1".into(),
                process_name: "Code.exe".into(),
                pid: 1000,
            },
            WindowInfo {
                hwnd: 99,
                title: "Mozilla Firefox".into(),
                class: "MozillaWindowClass".into(),
                process_name: "firefox.exe".into(),
                pid: 2000,
            },
        ]
    }

    #[test]
    fn resolves_by_exact_hwnd() {
        let target = WindowTarget::by_hwnd(99);
        let resolved = target.resolve(&sample_windows()).unwrap();
        assert_eq!(resolved.process_name, "firefox.exe");
    }

    #[test]
    fn resolves_by_partial_title_case_insensitively() {
        let target = WindowTarget::by_title("visual studio code", true);
        let resolved = target.resolve(&sample_windows()).unwrap();
        assert_eq!(resolved.hwnd, 42);
    }

    #[test]
    fn rejects_partial_title_when_exact_match_required() {
        let target = WindowTarget::by_title("visual studio code", false);
        assert!(target.resolve(&sample_windows()).is_err());
    }

    #[test]
    fn resolves_by_exact_process_name_case_insensitively() {
        let target = WindowTarget::by_process("code.exe", false);
        let resolved = target.resolve(&sample_windows()).unwrap();
        assert_eq!(resolved.hwnd, 42);
    }

    #[test]
    fn missing_hwnd_is_target_gone_not_configuration_error() {
        let target = WindowTarget::by_hwnd(7);
        match target.resolve(&sample_windows()) {
            Err(AgentError::TargetGone { .. }) => {}
            other => panic!("expected TargetGone, got {other:?}"),
        }
    }

    #[test]
    fn empty_target_is_a_configuration_error() {
        let target = WindowTarget::default();
        assert!(matches!(
            target.resolve(&sample_windows()),
            Err(AgentError::Configuration { .. })
        ));
    }
}
