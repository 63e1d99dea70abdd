//! Host-side supervisor: owns one worker child process, translates
//! `SupervisorHandle` method calls into `Cmd` lines on its stdin, and
//! republishes its stdout lines as `Status`/`Hit`/`Log` values.
//!
//! Grounded in the original's `ScannerProcessManager`: a command queue plus
//! a poll timer over three result queues, generalized here to an actual
//! child OS process (not a `multiprocessing.Process` sharing the host's
//! interpreter) communicating over stdio, with `tokio::sync::watch` standing
//! in for the "only the newest `Status` matters" coalescing the original's
//! poll timer performed implicitly by always reading the latest queue item.

pub mod protocol;
pub mod worker;

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};

use crate::error::{AgentError, AgentResult};
use crate::config::ScanConfig;

use protocol::{Cmd, Hit, Status, WorkerEvent};

/// Grace period after `Stop` before the supervisor escalates to terminating
/// the child process outright.
const STOP_GRACE: Duration = Duration::from_secs(5);
/// Grace period after a terminate signal before giving up waiting on exit.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Client handle to a running worker process. Cloning is not supported —
/// one handle owns the child's lifetime; share it behind an `Arc<Mutex<_>>`
/// if multiple callers need access.
pub struct SupervisorHandle {
    child: Child,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    status_rx: watch::Receiver<Status>,
    hit_rx: mpsc::UnboundedReceiver<Hit>,
    log_rx: mpsc::UnboundedReceiver<String>,
}

/// Result of [`SupervisorHandle::next_event`]: whichever of the three
/// per-channel waits resolved first.
pub enum SupervisorEvent {
    Status(Option<Status>),
    Hit(Option<Hit>),
    Log(Option<String>),
}

impl SupervisorHandle {
    /// Spawns `worker_path` as a child process and wires up its stdio to
    /// the wire protocol. The child is killed if this handle is dropped
    /// without an orderly [`SupervisorHandle::exit`].
    pub fn spawn(worker_path: impl AsRef<OsStr>) -> std::io::Result<Self> {
        let mut child = Command::new(worker_path.as_ref())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        spawn_cmd_writer(stdin, cmd_rx);

        let (status_tx, status_rx) = watch::channel(Status::default());
        let (hit_tx, hit_rx) = mpsc::unbounded_channel();
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        spawn_event_reader(stdout, status_tx, hit_tx, log_tx);
        spawn_stderr_drain(stderr);

        Ok(SupervisorHandle {
            child,
            cmd_tx,
            status_rx,
            hit_rx,
            log_rx,
        })
    }

    /// Idempotent on the worker side: a `Start` while already running is a
    /// no-op there, not here.
    pub fn start(&self, cfg: ScanConfig) -> AgentResult<()> {
        self.send(Cmd::Start(cfg))
    }

    pub fn update_config(&self, cfg: ScanConfig) -> AgentResult<()> {
        self.send(Cmd::UpdateConfig(cfg))
    }

    /// Requests a graceful stop, escalating to process-terminate after
    /// [`STOP_GRACE`] and giving up waiting after a further [`KILL_GRACE`].
    pub async fn stop(&mut self) -> AgentResult<()> {
        self.send(Cmd::Stop)?;
        if tokio::time::timeout(STOP_GRACE, self.wait_until_not_running())
            .await
            .is_err()
        {
            tracing::warn!("worker did not stop within the grace period; terminating");
            self.escalate().await;
        }
        Ok(())
    }

    /// Requests the worker drain its queue and exit, then waits for the
    /// process itself to exit, with the same escalation as [`Self::stop`].
    pub async fn exit(mut self) -> AgentResult<()> {
        let _ = self.send(Cmd::Exit);
        if tokio::time::timeout(STOP_GRACE, self.child.wait())
            .await
            .is_err()
        {
            tracing::warn!("worker did not exit within the grace period; terminating");
            self.escalate().await;
        }
        Ok(())
    }

    /// OS process id of the worker, for diagnostics and tests that need to
    /// act on the process from outside this handle.
    pub fn worker_pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Current (possibly stale) status snapshot. Consumers polling this
    /// directly should ignore a snapshot older than the one most recently
    /// applied — [`Status::timestamp_monotonic_ms`] is provided for that.
    pub fn status(&self) -> Status {
        self.status_rx.borrow().clone()
    }

    /// Awaits the next status change, coalescing any updates that arrived
    /// while nobody was waiting into just the newest one.
    pub async fn status_changed(&mut self) -> Option<Status> {
        self.status_rx.changed().await.ok()?;
        Some(self.status_rx.borrow().clone())
    }

    /// Awaits the next click notification. `Hit` messages are never
    /// dropped on the worker side; this returns `None` only once the
    /// worker's stdout has closed.
    pub async fn next_hit(&mut self) -> Option<Hit> {
        self.hit_rx.recv().await
    }

    /// Awaits the next free-form log line from the worker.
    pub async fn next_log(&mut self) -> Option<String> {
        self.log_rx.recv().await
    }

    /// Awaits whichever of [`Self::status_changed`], [`Self::next_hit`], or
    /// [`Self::next_log`] resolves first. Combines the three into a single
    /// `&mut self` call so callers (e.g. `tokio::select!` in the host
    /// binary) don't need to hold three independent mutable borrows of the
    /// handle at once.
    pub async fn next_event(&mut self) -> SupervisorEvent {
        tokio::select! {
            changed = self.status_rx.changed() => {
                SupervisorEvent::Status(changed.ok().map(|_| self.status_rx.borrow().clone()))
            }
            hit = self.hit_rx.recv() => SupervisorEvent::Hit(hit),
            line = self.log_rx.recv() => SupervisorEvent::Log(line),
        }
    }

    fn send(&self, cmd: Cmd) -> AgentResult<()> {
        self.cmd_tx.send(cmd).map_err(|_| AgentError::WorkerCrash)
    }

    async fn wait_until_not_running(&mut self) {
        loop {
            if !self.status_rx.borrow().running {
                return;
            }
            if self.status_rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn escalate(&mut self) {
        let _ = self.child.start_kill();
        if tokio::time::timeout(KILL_GRACE, self.child.wait())
            .await
            .is_err()
        {
            tracing::error!("worker did not exit even after a termination signal");
        }
    }
}

fn spawn_cmd_writer(mut stdin: tokio::process::ChildStdin, mut cmd_rx: mpsc::UnboundedReceiver<Cmd>) {
    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            if protocol::write_cmd(&mut stdin, &cmd).await.is_err() {
                break;
            }
        }
        let _ = stdin.shutdown().await;
    });
}

fn spawn_event_reader(
    stdout: tokio::process::ChildStdout,
    status_tx: watch::Sender<Status>,
    hit_tx: mpsc::UnboundedSender<Hit>,
    log_tx: mpsc::UnboundedSender<String>,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        loop {
            match protocol::read_event(&mut reader).await {
                Ok(Some(WorkerEvent::Status(status))) => {
                    let _ = status_tx.send(status);
                }
                Ok(Some(WorkerEvent::Hit(hit))) => {
                    let _ = hit_tx.send(hit);
                }
                Ok(Some(WorkerEvent::Log(message))) => {
                    let _ = log_tx.send(message);
                }
                Ok(None) | Err(_) => {
                    let mut crashed = status_tx.borrow().clone();
                    crashed.running = false;
                    crashed.error = Some(AgentError::WorkerCrash.kind().to_string());
                    let _ = status_tx.send(crashed);
                    break;
                }
            }
        }
    });
}

fn spawn_stderr_drain(stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::warn!(worker_stderr = %line, "worker crash diagnostic");
        }
    });
}
