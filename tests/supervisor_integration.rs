//! Drives the real, compiled worker binary over stdio through a
//! `SupervisorHandle`. A mocked capture backend would only exercise the
//! library's in-process plumbing; process spawn, pipe framing, and
//! escalating shutdown are only real when there is an actual child process
//! on the other end.

use std::path::PathBuf;
use std::time::Duration;

use approve_agent::config::ScanConfig;
use approve_agent::supervisor::SupervisorHandle;

fn worker_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_approve-worker"))
}

fn monitor_config() -> ScanConfig {
    let mut cfg = ScanConfig::default();
    cfg.target.monitor_index = Some(0);
    cfg.template_paths = vec![PathBuf::from("testdata/button.png")];
    cfg.interval_ms = 20;
    cfg.active_scan_interval_ms = 20;
    cfg
}

async fn wait_for<F: Fn(&approve_agent::supervisor::protocol::Status) -> bool>(
    supervisor: &mut SupervisorHandle,
    predicate: F,
) -> approve_agent::supervisor::protocol::Status {
    if predicate(&supervisor.status()) {
        return supervisor.status();
    }
    loop {
        let status = supervisor
            .status_changed()
            .await
            .expect("worker stdout closed before the expected status arrived");
        if predicate(&status) {
            return status;
        }
    }
}

#[tokio::test]
async fn start_then_stop_reports_running_then_stopped() {
    let mut supervisor = SupervisorHandle::spawn(worker_binary()).expect("spawn worker");
    supervisor.start(monitor_config()).unwrap();

    let running = tokio::time::timeout(Duration::from_secs(5), wait_for(&mut supervisor, |s| s.running))
        .await
        .expect("worker never reported running");
    assert!(running.error.is_none());

    supervisor.stop().await.unwrap();
    let stopped = tokio::time::timeout(
        Duration::from_secs(5),
        wait_for(&mut supervisor, |s| !s.running && s.detail == "stopped"),
    )
    .await
    .expect("worker never reported stopped");
    assert!(!stopped.running);

    supervisor.exit().await.unwrap();
}

#[tokio::test]
async fn invalid_config_is_rejected_without_crashing_the_worker() {
    let mut supervisor = SupervisorHandle::spawn(worker_binary()).expect("spawn worker");
    let mut bad_cfg = monitor_config();
    bad_cfg.threshold = 5.0;
    supervisor.start(bad_cfg).unwrap();

    let rejected = tokio::time::timeout(
        Duration::from_secs(5),
        wait_for(&mut supervisor, |s| s.error.as_deref() == Some("configuration")),
    )
    .await
    .expect("worker never reported the configuration error");
    assert!(!rejected.running);

    // The worker process itself must still be alive and usable after
    // rejecting a bad config, not just its stdout stream.
    supervisor.start(monitor_config()).unwrap();
    let running = tokio::time::timeout(Duration::from_secs(5), wait_for(&mut supervisor, |s| s.running))
        .await
        .expect("worker did not recover after an invalid Start");
    assert!(running.running);

    supervisor.exit().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn worker_crash_is_detected_and_recoverable() {
    let mut supervisor = SupervisorHandle::spawn(worker_binary()).expect("spawn worker");
    supervisor.start(monitor_config()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), wait_for(&mut supervisor, |s| s.running))
        .await
        .expect("worker never reported running");

    let pid = supervisor.worker_pid().expect("worker has a pid");
    let killed = std::process::Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .status()
        .expect("could not invoke kill(1)");
    assert!(killed.success());

    let crashed = tokio::time::timeout(
        Duration::from_secs(5),
        wait_for(&mut supervisor, |s| !s.running && s.error.is_some()),
    )
    .await
    .expect("supervisor never reported the worker as down");
    assert_eq!(crashed.error.as_deref(), Some("worker_crash"));
}
