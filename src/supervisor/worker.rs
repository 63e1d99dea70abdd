//! Worker-side main loop: owns one capture session, one template set, and
//! the pipeline state machine, and drives them from commands read off
//! stdin, emitting `Status`/`Hit`/`Log` events to stdout.
//!
//! Grounded in the original's `_scanner_worker_process`: a command queue
//! poll, a scan-and-maybe-click step, and a status push, generalized from a
//! `multiprocessing.Queue` poll loop into a `tokio::select!` over stdin
//! lines, a foreground-change channel, and an adaptive sleep.

use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;

use crate::capture::{CaptureBackend, CaptureMode, CaptureTuning, WindowTarget};
use crate::config::{CaptureTarget, ScanConfig};
use crate::pipeline::click::ClickDispatcher;
use crate::pipeline::scheduler::{AdaptiveScheduler, SchedulerTuning};
use crate::pipeline::{ScanPipeline, TickOutcome};

use super::protocol::{self, Cmd, Hit, Status, WorkerEvent};

/// Built from a `CaptureTarget`'s window fields, preferring hwnd, then
/// title, then process, matching the original's preference order and its
/// default of partial matching for both title and process.
fn window_target_from(target: &CaptureTarget) -> WindowTarget {
    if let Some(hwnd) = target.target_hwnd {
        WindowTarget::by_hwnd(hwnd)
    } else if let Some(title) = &target.target_window_title {
        WindowTarget::by_title(title.clone(), target.title_partial_match)
    } else if let Some(process) = &target.target_process {
        WindowTarget::by_process(process.clone(), target.process_partial_match)
    } else {
        WindowTarget::default()
    }
}

#[cfg(target_os = "windows")]
fn resolve_target_hwnd(target: &CaptureTarget) -> crate::error::AgentResult<Option<isize>> {
    if target.monitor_index.is_some() {
        return Ok(None);
    }
    let windows = crate::capture::window_target::enumerate_windows();
    let info = window_target_from(target).resolve(&windows)?;
    Ok(Some(info.hwnd))
}

/// Off Windows there is no real window to enumerate; a directly-configured
/// `target_hwnd` (as tests supply) is trusted as-is.
#[cfg(not(target_os = "windows"))]
fn resolve_target_hwnd(target: &CaptureTarget) -> crate::error::AgentResult<Option<isize>> {
    if target.monitor_index.is_some() {
        Ok(None)
    } else {
        Ok(target.target_hwnd)
    }
}

/// Drives one worker's lifecycle: `Start`/`Stop`/`UpdateConfig`/`Exit`
/// commands and the scan loop in between.
pub struct WorkerLoop<C, D> {
    capture: C,
    dispatcher: D,
    pipeline: Option<ScanPipeline>,
    scheduler: Option<AdaptiveScheduler>,
    target_hwnd: Option<isize>,
    running: bool,
}

impl<C, D> WorkerLoop<C, D>
where
    C: CaptureBackend,
    D: ClickDispatcher,
{
    pub fn new(capture: C, dispatcher: D) -> Self {
        WorkerLoop {
            capture,
            dispatcher,
            pipeline: None,
            scheduler: None,
            target_hwnd: None,
            running: false,
        }
    }

    /// Runs until `Exit` is received or stdin closes. `foreground_rx` feeds
    /// owning-process executable names from the foreground-change watcher;
    /// a no-op receiver (never sends) is fine when event-mode scheduling is
    /// not in use.
    pub async fn run<R, W>(
        mut self,
        cmd_reader: R,
        mut event_writer: W,
        mut foreground_rx: mpsc::UnboundedReceiver<String>,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        // `AsyncBufReadExt::read_line` is not cancel-safe, so it cannot be
        // raced directly inside `select!` alongside the sleep and
        // foreground-change branches below: a sleep winning mid-read would
        // silently drop whatever the reader had already buffered. Reading
        // on its own task and forwarding complete lines over a channel
        // sidesteps that entirely.
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut reader = BufReader::new(cmd_reader);
            loop {
                match protocol::read_cmd(&mut reader).await {
                    Ok(Some(cmd)) => {
                        if cmd_tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        });

        let started_at = Instant::now();

        loop {
            let tick_delay = self
                .scheduler
                .as_ref()
                .map(|s| s.next_delay_ms())
                .unwrap_or(200);

            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_cmd(cmd, &mut event_writer, started_at).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Some(process_name) = foreground_rx.recv() => {
                    if let Some(scheduler) = self.scheduler.as_mut() {
                        scheduler.on_foreground_change(&process_name);
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(tick_delay)), if self.running => {
                    self.run_tick(&mut event_writer, started_at).await;
                }
            }
        }

        if self.running {
            self.capture.close().await;
        }
    }

    /// Returns true when the worker should exit its main loop.
    async fn handle_cmd<W: AsyncWrite + Unpin>(
        &mut self,
        cmd: Cmd,
        writer: &mut W,
        started_at: Instant,
    ) -> bool {
        match cmd {
            Cmd::Start(cfg) => {
                self.start(cfg, writer, started_at).await;
                false
            }
            Cmd::Stop => {
                self.stop(writer, started_at).await;
                false
            }
            Cmd::UpdateConfig(cfg) => {
                self.update_config(cfg, writer, started_at).await;
                false
            }
            Cmd::Exit => true,
        }
    }

    async fn start<W: AsyncWrite + Unpin>(&mut self, cfg: ScanConfig, writer: &mut W, started_at: Instant) {
        if self.running {
            return;
        }
        self.bring_up(cfg, writer, started_at).await;
    }

    async fn stop<W: AsyncWrite + Unpin>(&mut self, writer: &mut W, started_at: Instant) {
        if !self.running {
            return;
        }
        self.capture.close().await;
        self.running = false;
        self.pipeline = None;
        self.scheduler = None;
        self.target_hwnd = None;
        self.emit_status(writer, started_at, "stopped", None).await;
    }

    async fn update_config<W: AsyncWrite + Unpin>(&mut self, cfg: ScanConfig, writer: &mut W, started_at: Instant) {
        let was_running = self.running;
        if was_running {
            self.capture.close().await;
            self.running = false;
            self.emit_status(writer, started_at, "reconfiguring", None).await;
        }
        self.bring_up(cfg, writer, started_at).await;
    }

    async fn bring_up<W: AsyncWrite + Unpin>(&mut self, cfg: ScanConfig, writer: &mut W, started_at: Instant) {
        if let Err(e) = cfg.validate() {
            self.emit_status(writer, started_at, "", Some(e.kind())).await;
            return;
        }

        let target_hwnd = match resolve_target_hwnd(&cfg.target) {
            Ok(h) => h,
            Err(e) => {
                self.emit_status(writer, started_at, "", Some(e.kind())).await;
                return;
            }
        };

        let open_result = if let Some(index) = cfg.target.monitor_index {
            self.capture.open_monitor(index).await
        } else {
            self.capture.open_window(&window_target_from(&cfg.target)).await
        };

        if let Err(e) = open_result {
            self.emit_status(writer, started_at, "", Some(e.kind())).await;
            return;
        }

        let tuning = CaptureTuning {
            fps: cfg.fps_max,
            include_cursor: cfg.include_cursor,
            border_required: cfg.border_required,
            restore_minimized_noactivate: cfg.restore_minimized_noactivate,
            capture_timeout_ms: cfg.capture_timeout_ms,
        };
        if let Err(e) = self.capture.configure(tuning).await {
            self.emit_status(writer, started_at, "", Some(e.kind())).await;
            return;
        }

        let scheduler_tuning = SchedulerTuning {
            scan_mode: cfg.scan_mode,
            active_scan_interval_ms: cfg.active_scan_interval_ms,
            idle_scan_interval_ms: cfg.idle_scan_interval_ms,
            miss_backoff_ms_max: cfg.miss_backoff_ms_max,
            hit_cooldown_ms: cfg.hit_cooldown_ms,
        };

        self.scheduler = Some(AdaptiveScheduler::new(scheduler_tuning, cfg.process_whitelist.clone()));
        self.target_hwnd = target_hwnd;
        self.pipeline = Some(ScanPipeline::new(cfg));
        self.running = true;

        self.emit_status(writer, started_at, "started", None).await;
    }

    async fn run_tick<W: AsyncWrite + Unpin>(&mut self, writer: &mut W, started_at: Instant) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };

        let outcome = pipeline
            .tick(&mut self.capture, &mut self.dispatcher, self.target_hwnd)
            .await;

        match outcome {
            Ok(TickOutcome::NoFrame) => {}
            Ok(TickOutcome::Miss { score }) => {
                if let Some(scheduler) = self.scheduler.as_mut() {
                    scheduler.on_miss();
                }
                let detail = format!("last score {score:.3}");
                self.emit_status(writer, started_at, &detail, None).await;
            }
            Ok(TickOutcome::Hit {
                score,
                screen_point,
                dispatch_error,
            }) => {
                match dispatch_error {
                    None => {
                        if let Some(scheduler) = self.scheduler.as_mut() {
                            scheduler.on_hit();
                        }
                        self.emit_hit(writer, started_at, score, screen_point).await;
                        let detail = format!("clicked at score {score:.3}");
                        self.emit_status(writer, started_at, &detail, None).await;
                    }
                    Some(e) => {
                        if let Some(scheduler) = self.scheduler.as_mut() {
                            scheduler.on_miss();
                        }
                        self.emit_log(writer, format!("click dispatch failed: {e}")).await;
                        self.emit_status(writer, started_at, "scanning", Some(e.kind()))
                            .await;
                    }
                }
            }
            Err(e) => {
                self.emit_log(writer, format!("tick failed: {e}")).await;
                self.emit_status(writer, started_at, "scanning", Some(e.kind()))
                    .await;
            }
        }
    }

    async fn emit_status<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        started_at: Instant,
        detail: &str,
        error: Option<&str>,
    ) {
        let scan_count = self.pipeline.as_ref().map(|p| p.scan_count()).unwrap_or(0);
        let status = Status {
            running: self.running,
            backend_label: capture_mode_label(self.target_hwnd),
            detail: detail.to_string(),
            scan_count,
            error: error.map(str::to_string),
            timestamp_monotonic_ms: started_at.elapsed().as_millis() as u64,
        };
        let _ = protocol::write_event(writer, &WorkerEvent::Status(status)).await;
    }

    async fn emit_hit<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        started_at: Instant,
        score: f32,
        screen_point: (i32, i32),
    ) {
        let hit = Hit {
            score,
            screen_x: screen_point.0,
            screen_y: screen_point.1,
            timestamp_monotonic_ms: started_at.elapsed().as_millis() as u64,
        };
        let _ = protocol::write_event(writer, &WorkerEvent::Hit(hit)).await;
    }

    async fn emit_log<W: AsyncWrite + Unpin>(&self, writer: &mut W, message: String) {
        let _ = protocol::write_event(writer, &WorkerEvent::Log(message)).await;
    }
}

fn capture_mode_label(target_hwnd: Option<isize>) -> String {
    match target_hwnd {
        Some(_) => "window".to_string(),
        None => "monitor".to_string(),
    }
}

/// Whether a config targets a window or a monitor; re-exported here so the
/// worker binary doesn't need to reach into `pipeline` for it.
pub fn capture_mode_of(target: &CaptureTarget) -> CaptureMode {
    crate::pipeline::capture_mode_of(target)
}
