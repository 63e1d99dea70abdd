//! Non-intrusive click dispatch: `WM_LBUTTONDOWN`/`WM_LBUTTONUP` posted
//! directly to a target window, never a synthesized global input event and
//! never a call that could steal focus.

use crate::{config::ClickMethod, error::AgentError};

/// Scales a content-pixel point into window-client-pixel space, correcting
/// for DPI scaling and non-1:1 content rendering.
pub fn scale_content_to_client(
    content_point: (i32, i32),
    content_size: (u32, u32),
    client_size: (u32, u32),
) -> (i32, i32) {
    let (cx, cy) = content_point;
    let (content_w, content_h) = content_size;
    let (client_w, client_h) = client_size;
    if content_w == 0 || content_h == 0 {
        return content_point;
    }
    (
        (cx as i64 * client_w as i64 / content_w as i64) as i32,
        (cy as i64 * client_h as i64 / content_h as i64) as i32,
    )
}

/// Packs `(x, y)` into the `LPARAM` layout `WM_LBUTTON*` messages expect:
/// low word x, high word y.
pub fn make_lparam(x: i32, y: i32) -> isize {
    ((y as isize & 0xFFFF) << 16) | (x as isize & 0xFFFF)
}

/// Where a click should be dispatched in monitor mode, after resolving the
/// deepest enabled, visible child window under the screen point.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedClickTarget {
    pub hwnd: isize,
    pub client_point: (i32, i32),
}

/// Abstracts click dispatch so the pipeline can be driven by a real Win32
/// dispatcher in production and a recording stub in tests.
pub trait ClickDispatcher: Send {
    /// Window mode: `content_point` is in capture-content pixels. Returns
    /// the screen-space point actually clicked (client point translated via
    /// `ClientToScreen`), for `Hit` reporting.
    fn click_in_window(
        &mut self,
        hwnd: isize,
        content_point: (i32, i32),
        content_size: (u32, u32),
        method: ClickMethod,
    ) -> Result<(i32, i32), AgentError>;

    /// Monitor mode: `screen_point` is in screen pixels. Returns the
    /// resolved target's client-space point for `Hit` reporting.
    fn click_on_screen(
        &mut self,
        screen_point: (i32, i32),
        enhanced_window_finding: bool,
        verify_window_before_click: bool,
        method: ClickMethod,
    ) -> Result<ResolvedClickTarget, AgentError>;
}

/// Records every dispatched click instead of touching any real window;
/// used by pipeline tests that run on any host.
#[derive(Default)]
pub struct RecordingClickDispatcher {
    pub window_clicks: Vec<(i32, i32)>,
    pub screen_clicks: Vec<(i32, i32)>,
    pub fail_next: Option<AgentError>,
}

impl ClickDispatcher for RecordingClickDispatcher {
    fn click_in_window(
        &mut self,
        _hwnd: isize,
        content_point: (i32, i32),
        content_size: (u32, u32),
        _method: ClickMethod,
    ) -> Result<(i32, i32), AgentError> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        let client_point = scale_content_to_client(content_point, content_size, content_size);
        self.window_clicks.push(client_point);
        Ok(client_point)
    }

    fn click_on_screen(
        &mut self,
        screen_point: (i32, i32),
        _enhanced_window_finding: bool,
        _verify_window_before_click: bool,
        _method: ClickMethod,
    ) -> Result<ResolvedClickTarget, AgentError> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        self.screen_clicks.push(screen_point);
        Ok(ResolvedClickTarget {
            hwnd: 0,
            client_point: screen_point,
        })
    }
}

/// Production dispatcher backed by the real Win32 click-posting functions.
#[cfg(target_os = "windows")]
#[derive(Default)]
pub struct Win32ClickDispatcher;

#[cfg(target_os = "windows")]
impl ClickDispatcher for Win32ClickDispatcher {
    fn click_in_window(
        &mut self,
        hwnd: isize,
        content_point: (i32, i32),
        content_size: (u32, u32),
        method: ClickMethod,
    ) -> Result<(i32, i32), AgentError> {
        win32::dispatch_click_in_window(hwnd, content_point, content_size, method)
    }

    fn click_on_screen(
        &mut self,
        screen_point: (i32, i32),
        enhanced_window_finding: bool,
        verify_window_before_click: bool,
        method: ClickMethod,
    ) -> Result<ResolvedClickTarget, AgentError> {
        win32::dispatch_click_on_screen(
            screen_point,
            enhanced_window_finding,
            verify_window_before_click,
            method,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_content_point_down_to_client_space() {
        let client = scale_content_to_client((400, 600), (1600, 1200), (800, 600));
        assert_eq!(client, (200, 300));
    }

    #[test]
    fn identity_when_content_and_client_sizes_match() {
        let client = scale_content_to_client((120, 210), (800, 600), (800, 600));
        assert_eq!(client, (120, 210));
    }

    #[test]
    fn lparam_packs_x_in_low_word_y_in_high_word() {
        let packed = make_lparam(120, 210);
        let x = packed & 0xFFFF;
        let y = (packed >> 16) & 0xFFFF;
        assert_eq!(x, 120);
        assert_eq!(y, 210);
    }
}

#[cfg(target_os = "windows")]
pub use win32::dispatch_click_in_window;
#[cfg(target_os = "windows")]
pub use win32::dispatch_click_on_screen;

#[cfg(target_os = "windows")]
mod win32 {
    use windows_sys::Win32::{
        Foundation::{HWND, LPARAM, LRESULT, POINT, WPARAM},
        UI::WindowsAndMessaging::{
            ChildWindowFromPointEx, ClientToScreen, GetClientRect, IsWindow, IsWindowEnabled,
            IsWindowVisible, PostMessageW, ScreenToClient, SendMessageTimeoutW, WindowFromPoint,
            CWP_SKIPDISABLED, CWP_SKIPINVISIBLE, CWP_SKIPTRANSPARENT, SMTO_ABORTIFHUNG,
            WM_LBUTTONDOWN, WM_LBUTTONUP,
        },
    };

    use super::{make_lparam, scale_content_to_client, ResolvedClickTarget};
    use crate::{config::ClickMethod, error::AgentError};

    const SEND_TIMEOUT_MS: u32 = 200;
    const MAX_CHILD_RECURSION: u32 = 10;

    fn client_rect_size(hwnd: HWND) -> Option<(u32, u32)> {
        unsafe {
            let mut rect = std::mem::zeroed();
            if GetClientRect(hwnd, &mut rect) == 0 {
                return None;
            }
            Some(((rect.right - rect.left) as u32, (rect.bottom - rect.top) as u32))
        }
    }

    fn send_button_messages(hwnd: HWND, lparam: isize, method: ClickMethod) -> Result<(), AgentError> {
        match method {
            ClickMethod::Message => {
                let down = send_timeout(hwnd, WM_LBUTTONDOWN, 1, lparam);
                let up = send_timeout(hwnd, WM_LBUTTONUP, 0, lparam);
                if down && up {
                    Ok(())
                } else {
                    Err(AgentError::ClickDispatchFailure {
                        reason: "SendMessageTimeout returned zero".into(),
                    })
                }
            }
            ClickMethod::Post => {
                let down = unsafe { PostMessageW(hwnd, WM_LBUTTONDOWN, 1 as WPARAM, lparam as LPARAM) };
                let up = unsafe { PostMessageW(hwnd, WM_LBUTTONUP, 0, lparam as LPARAM) };
                if down != 0 && up != 0 {
                    Ok(())
                } else {
                    Err(AgentError::ClickDispatchFailure {
                        reason: "PostMessage returned zero".into(),
                    })
                }
            }
        }
    }

    fn send_timeout(hwnd: HWND, msg: u32, wparam: usize, lparam: isize) -> bool {
        unsafe {
            let mut result: usize = 0;
            let r: LRESULT = SendMessageTimeoutW(
                hwnd,
                msg,
                wparam as WPARAM,
                lparam as LPARAM,
                SMTO_ABORTIFHUNG,
                SEND_TIMEOUT_MS,
                &mut result as *mut usize as *mut _,
            );
            r != 0
        }
    }

    /// Window-mode click: `content_point` is in capture-content pixels,
    /// translated to client pixels before dispatch, and the actually-
    /// clicked point is translated to screen space for the caller to report
    /// as a `Hit`.
    pub fn dispatch_click_in_window(
        hwnd: isize,
        content_point: (i32, i32),
        content_size: (u32, u32),
        method: ClickMethod,
    ) -> Result<(i32, i32), AgentError> {
        let hwnd = hwnd as HWND;
        if unsafe { IsWindow(hwnd) } == 0 {
            return Err(AgentError::TargetGone {
                reason: "window no longer exists".into(),
            });
        }
        let client_size = client_rect_size(hwnd).ok_or_else(|| AgentError::ClickDispatchFailure {
            reason: "GetClientRect failed".into(),
        })?;
        let client_point = scale_content_to_client(content_point, content_size, client_size);
        let lparam = make_lparam(client_point.0, client_point.1);
        send_button_messages(hwnd, lparam, method)?;

        let mut screen_point = POINT {
            x: client_point.0,
            y: client_point.1,
        };
        unsafe {
            ClientToScreen(hwnd, &mut screen_point);
        }
        Ok((screen_point.x, screen_point.y))
    }

    /// Recursively finds the deepest enabled, visible, non-transparent
    /// child window under a screen point, matching the original's
    /// `_deep_child_from_point` bound to a max recursion depth.
    fn deep_child_from_point(root: HWND, screen_point: (i32, i32)) -> HWND {
        let mut current = root;
        for _ in 0..MAX_CHILD_RECURSION {
            let mut client_point = POINT {
                x: screen_point.0,
                y: screen_point.1,
            };
            unsafe {
                ScreenToClient(current, &mut client_point);
            }
            let child = unsafe {
                ChildWindowFromPointEx(
                    current,
                    client_point,
                    CWP_SKIPINVISIBLE | CWP_SKIPDISABLED | CWP_SKIPTRANSPARENT,
                )
            };
            if child.is_null() || child == current {
                break;
            }
            current = child;
        }
        current
    }

    fn is_visible_and_enabled(hwnd: HWND) -> bool {
        unsafe { IsWindowVisible(hwnd) != 0 && IsWindowEnabled(hwnd) != 0 }
    }

    /// Resolves the deepest clickable window under `screen_point`, trying
    /// both the plain `WindowFromPoint` result and the recursive child walk
    /// when `enhanced_window_finding` is set, preferring whichever is
    /// visible and enabled.
    fn resolve_click_target(screen_point: (i32, i32), enhanced_window_finding: bool) -> Option<HWND> {
        let point = POINT {
            x: screen_point.0,
            y: screen_point.1,
        };
        let root = unsafe { WindowFromPoint(point) };
        if root.is_null() {
            return None;
        }
        let deep = deep_child_from_point(root, screen_point);

        if !enhanced_window_finding {
            return Some(deep);
        }

        if is_visible_and_enabled(deep) {
            Some(deep)
        } else if is_visible_and_enabled(root) {
            Some(root)
        } else {
            Some(deep)
        }
    }

    /// Monitor-mode click: `screen_point` is in screen pixels. Resolves the
    /// clickable child window under the point, optionally verifying it is
    /// enabled before dispatch.
    pub fn dispatch_click_on_screen(
        screen_point: (i32, i32),
        enhanced_window_finding: bool,
        verify_window_before_click: bool,
        method: ClickMethod,
    ) -> Result<ResolvedClickTarget, AgentError> {
        let hwnd = resolve_click_target(screen_point, enhanced_window_finding).ok_or_else(|| {
            AgentError::ClickDispatchFailure {
                reason: "no window found at the match point".into(),
            }
        })?;

        if verify_window_before_click && !is_enabled(hwnd) {
            return Err(AgentError::ClickDispatchFailure {
                reason: "target window failed state verification before click".into(),
            });
        }

        let mut client_point = POINT {
            x: screen_point.0,
            y: screen_point.1,
        };
        unsafe {
            ScreenToClient(hwnd, &mut client_point);
        }
        let lparam = make_lparam(client_point.x, client_point.y);
        send_button_messages(hwnd, lparam, method)?;

        Ok(ResolvedClickTarget {
            hwnd: hwnd as isize,
            client_point: (client_point.x, client_point.y),
        })
    }

    fn is_enabled(hwnd: HWND) -> bool {
        unsafe { IsWindow(hwnd) != 0 && IsWindowEnabled(hwnd) != 0 }
    }
}
