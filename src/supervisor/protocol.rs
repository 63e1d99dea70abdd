//! Wire protocol between the host and a scanner worker process.
//!
//! The three queues the design calls `Cmd`/`Status`/`Hit`/`Log` are realized
//! over the child's stdin (host→worker) and stdout (worker→host), one JSON
//! value per line. Each worker→host line is tagged by a `channel` field so a
//! single stream can multiplex `Status`, `Hit`, and `Log` without a second
//! pipe. `stderr` carries only unstructured crash diagnostics, never
//! protocol data.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::ScanConfig;

/// Host→worker command. Idempotent where the design calls for it: a second
/// `Start` while already running is a no-op, and `Stop` while already
/// stopped is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Cmd {
    Start(ScanConfig),
    Stop,
    UpdateConfig(ScanConfig),
    Exit,
}

/// Worker→host status snapshot. `error` is the stable [`crate::error::AgentError::kind`]
/// tag, never the full error value — `AgentError` itself never crosses the
/// process boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Status {
    pub running: bool,
    pub backend_label: String,
    pub detail: String,
    pub scan_count: u64,
    pub error: Option<String>,
    pub timestamp_monotonic_ms: u64,
}

/// Worker→host click notification, in screen coordinates (window-mode hits
/// are pre-translated client-to-screen by the worker before this is sent).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    pub score: f32,
    pub screen_x: i32,
    pub screen_y: i32,
    pub timestamp_monotonic_ms: u64,
}

/// One multiplexed line read from the worker's stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", content = "data")]
pub enum WorkerEvent {
    Status(Status),
    Hit(Hit),
    Log(String),
}

/// Writes one command as a newline-delimited JSON line and flushes.
/// `write` is a `tokio::process::ChildStdin` in production and an in-memory
/// buffer in tests.
pub async fn write_cmd<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    cmd: &Cmd,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(cmd).expect("Cmd always serializes");
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Writes one worker event as a newline-delimited JSON line and flushes.
pub async fn write_event<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    event: &WorkerEvent,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(event).expect("WorkerEvent always serializes");
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Reads one line from `reader` and parses it as a `Cmd`. Returns `Ok(None)`
/// on clean EOF (the host closed stdin, e.g. after the process was killed).
pub async fn read_cmd<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
) -> std::io::Result<Option<Cmd>> {
    read_line_as(reader).await
}

/// Reads one line from `reader` and parses it as a `WorkerEvent`. Returns
/// `Ok(None)` on clean EOF (the worker process exited).
pub async fn read_event<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
) -> std::io::Result<Option<WorkerEvent>> {
    read_line_as(reader).await
}

async fn read_line_as<R, T>(reader: &mut R) -> std::io::Result<Option<T>>
where
    R: AsyncBufReadExt + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value = serde_json::from_str(trimmed)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// Convenience alias for wrapping a `ChildStdout`/`ChildStderr` in a
/// line-buffered reader.
pub fn line_reader<R: tokio::io::AsyncRead>(inner: R) -> BufReader<R> {
    BufReader::new(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn cmd_roundtrips_through_the_line_framing() {
        let mut buf: Vec<u8> = Vec::new();
        write_cmd(&mut buf, &Cmd::Stop).await.unwrap();

        let mut reader = line_reader(Cursor::new(buf));
        let cmd = read_cmd(&mut reader).await.unwrap().unwrap();
        assert!(matches!(cmd, Cmd::Stop));
    }

    #[tokio::test]
    async fn start_cmd_carries_the_full_config() {
        let mut cfg = ScanConfig::default();
        cfg.target.monitor_index = Some(2);
        let mut buf: Vec<u8> = Vec::new();
        write_cmd(&mut buf, &Cmd::Start(cfg.clone())).await.unwrap();

        let mut reader = line_reader(Cursor::new(buf));
        let cmd = read_cmd(&mut reader).await.unwrap().unwrap();
        match cmd {
            Cmd::Start(got) => assert_eq!(got.target.monitor_index, Some(2)),
            other => panic!("expected Start, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn worker_events_are_tagged_by_channel() {
        let status = Status {
            running: true,
            backend_label: "wgc-window".into(),
            detail: "last score 0.91".into(),
            scan_count: 42,
            error: None,
            timestamp_monotonic_ms: 1000,
        };
        let hit = Hit {
            score: 0.95,
            screen_x: 120,
            screen_y: 210,
            timestamp_monotonic_ms: 1001,
        };

        let mut buf: Vec<u8> = Vec::new();
        write_event(&mut buf, &WorkerEvent::Status(status.clone())).await.unwrap();
        write_event(&mut buf, &WorkerEvent::Hit(hit.clone())).await.unwrap();
        write_event(&mut buf, &WorkerEvent::Log("booted".into())).await.unwrap();

        let mut reader = line_reader(Cursor::new(buf));
        let e1 = read_event(&mut reader).await.unwrap().unwrap();
        let e2 = read_event(&mut reader).await.unwrap().unwrap();
        let e3 = read_event(&mut reader).await.unwrap().unwrap();

        assert!(matches!(e1, WorkerEvent::Status(s) if s == status));
        assert!(matches!(e2, WorkerEvent::Hit(h) if h == hit));
        assert!(matches!(e3, WorkerEvent::Log(s) if s == "booted"));
    }

    #[tokio::test]
    async fn empty_stream_yields_none_not_an_error() {
        let mut reader = line_reader(Cursor::new(Vec::<u8>::new()));
        assert!(read_cmd(&mut reader).await.unwrap().is_none());
    }
}
