//! Foreground-window-change watcher.
//!
//! `SetWinEventHook` callbacks require a message loop, so this runs on its
//! own dedicated thread inside the worker process and forwards the owning
//! process's executable basename to the scan loop over a channel. Torn
//! down on `Stop`/`Exit`.

use tokio::sync::mpsc;

/// Handle to a running foreground watcher; dropping it tears the thread
/// and its hook down.
pub struct ForegroundWatcher {
    #[cfg(target_os = "windows")]
    _thread: win32::WatcherThread,
    #[cfg(not(target_os = "windows"))]
    _marker: (),
}

/// Starts the watcher, returning a handle plus a receiver of owning-process
/// executable basenames (e.g. `"Code.exe"`), one per foreground change.
pub fn start() -> (ForegroundWatcher, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    #[cfg(target_os = "windows")]
    {
        let thread = win32::WatcherThread::spawn(tx);
        (ForegroundWatcher { _thread: thread }, rx)
    }
    #[cfg(not(target_os = "windows"))]
    {
        drop(tx);
        (ForegroundWatcher { _marker: () }, rx)
    }
}

#[cfg(target_os = "windows")]
mod win32 {
    use std::{
        ffi::OsString,
        os::windows::ffi::OsStringExt,
        ptr,
        sync::atomic::{AtomicBool, Ordering},
        sync::Arc,
        thread::JoinHandle,
    };

    use tokio::sync::mpsc::UnboundedSender;
    use windows_sys::Win32::{
        Foundation::{CloseHandle, HWND},
        System::{
            ProcessStatus::GetModuleBaseNameW,
            Threading::{OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ},
        },
        UI::{
            Accessibility::{SetWinEventHook, UnhookWinEvent, HWINEVENTHOOK},
            WindowsAndMessaging::{
                DispatchMessageW, GetForegroundWindow, GetMessageW, GetWindowThreadProcessId,
                TranslateMessage, EVENT_SYSTEM_FOREGROUND, MSG, WINEVENT_OUTOFCONTEXT,
            },
        },
    };

    thread_local! {
        static SENDER: std::cell::RefCell<Option<UnboundedSender<String>>> = std::cell::RefCell::new(None);
    }

    pub struct WatcherThread {
        handle: Option<JoinHandle<()>>,
        stop: Arc<AtomicBool>,
    }

    impl WatcherThread {
        pub fn spawn(tx: UnboundedSender<String>) -> Self {
            let stop = Arc::new(AtomicBool::new(false));
            let handle = std::thread::spawn(move || {
                SENDER.with(|cell| *cell.borrow_mut() = Some(tx));
                run_message_pump();
            });
            WatcherThread {
                handle: Some(handle),
                stop,
            }
        }
    }

    impl Drop for WatcherThread {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
            // The hook callback thread owns its own message loop; there is
            // no portable wake-and-exit short of posting WM_QUIT, which
            // would require the thread id. We simply detach: the process
            // exiting (worker Stop/Exit) tears the thread down with it.
            if let Some(handle) = self.handle.take() {
                drop(handle);
            }
        }
    }

    fn run_message_pump() {
        unsafe extern "system" fn callback(
            _hook: HWINEVENTHOOK,
            _event: u32,
            hwnd: HWND,
            _id_object: i32,
            _id_child: i32,
            _event_thread: u32,
            _event_time: u32,
        ) {
            if hwnd.is_null() {
                return;
            }
            let name = process_name_for_window(hwnd);
            if name.is_empty() {
                return;
            }
            SENDER.with(|cell| {
                if let Some(tx) = cell.borrow().as_ref() {
                    let _ = tx.send(name);
                }
            });
        }

        unsafe {
            let hook = SetWinEventHook(
                EVENT_SYSTEM_FOREGROUND,
                EVENT_SYSTEM_FOREGROUND,
                ptr::null_mut(),
                Some(callback),
                0,
                0,
                WINEVENT_OUTOFCONTEXT,
            );

            if hook.is_null() {
                tracing::warn!("SetWinEventHook failed; foreground-change detection disabled");
                return;
            }

            // Report the window that's already foreground before any event
            // fires, so event-mode scheduling doesn't start blind.
            let current = GetForegroundWindow();
            if !current.is_null() {
                callback(ptr::null_mut(), EVENT_SYSTEM_FOREGROUND, current, 0, 0, 0, 0);
            }

            let mut msg: MSG = std::mem::zeroed();
            while GetMessageW(&mut msg, ptr::null_mut(), 0, 0) > 0 {
                TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }

            UnhookWinEvent(hook);
        }
    }

    fn process_name_for_window(hwnd: HWND) -> String {
        unsafe {
            let mut pid: u32 = 0;
            GetWindowThreadProcessId(hwnd, &mut pid);
            if pid == 0 {
                return String::new();
            }
            let handle = OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, 0, pid);
            if handle.is_null() {
                return String::new();
            }
            let mut buffer: Vec<u16> = vec![0; 260];
            let len = GetModuleBaseNameW(handle, ptr::null_mut(), buffer.as_mut_ptr(), buffer.len() as u32);
            CloseHandle(handle);
            if len == 0 {
                return String::new();
            }
            buffer.truncate(len as usize);
            OsString::from_wide(&buffer).to_string_lossy().into_owned()
        }
    }
}
