//! approve-worker: the isolated process a `SupervisorHandle` spawns.
//!
//! Speaks the `Cmd`/`Status`/`Hit`/`Log` protocol over stdin/stdout and
//! never touches a GUI surface directly except through `windows-capture`
//! and the Win32 click-posting calls — a crash here never takes the host
//! down with it.

use approve_agent::supervisor::worker::WorkerLoop;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("approve_agent=info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .init();

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    #[cfg(target_os = "windows")]
    {
        use approve_agent::capture::WindowsCaptureBackend;
        use approve_agent::pipeline::click::Win32ClickDispatcher;
        use approve_agent::pipeline::foreground;

        let (_watcher, foreground_rx) = foreground::start();
        let worker = WorkerLoop::new(WindowsCaptureBackend::new(), Win32ClickDispatcher::default());
        worker.run(stdin, stdout, foreground_rx).await;
    }

    #[cfg(not(target_os = "windows"))]
    {
        // No real capture surface off Windows; kept so the crate's tests
        // and CI can exercise the worker binary itself, not just the
        // library, without a display attached.
        use approve_agent::capture::MockCaptureBackend;
        use approve_agent::pipeline::click::RecordingClickDispatcher;

        tracing::warn!("non-Windows platform: running with a mock capture backend");
        let (_tx, foreground_rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = WorkerLoop::new(
            MockCaptureBackend::new((1920, 1080)),
            RecordingClickDispatcher::default(),
        );
        worker.run(stdin, stdout, foreground_rx).await;
    }
}
