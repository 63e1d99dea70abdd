//! Error taxonomy for the capture/match/click/supervise pipeline
//!
//! Every variant maps to one of the error kinds named in the design
//! documents. The worker never lets one of these escape into the host
//! process — [`AgentError::kind`] and [`AgentError::remediation_hint`]
//! are rendered into `Status`/`Log` wire messages instead.

/// Result type alias used throughout the pipeline.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors produced by the capture backend, matcher, click dispatcher, and
/// scanner supervisor.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A configuration field failed validation or a window target could not
    /// be resolved.
    #[error("invalid configuration: {reason}")]
    Configuration {
        /// Human-readable description of the invalid field or target.
        reason: String,
    },

    /// Windows Graphics Capture is not usable on this system at all (too old
    /// a Windows build, or session creation outright refused).
    #[error("capture unavailable: {reason}")]
    CaptureUnavailable {
        /// Why the capture library refused to start.
        reason: String,
    },

    /// A transient capture hiccup: timeout, empty frame, or a content-size
    /// change that requires a frame pool rebuild. Recovered on the next tick.
    #[error("transient capture failure: {reason}")]
    CaptureTransient {
        /// Description of the transient condition.
        reason: String,
    },

    /// The capture target disappeared: the HWND is no longer a window, or
    /// the monitor handle no longer resolves.
    #[error("capture target gone: {reason}")]
    TargetGone {
        /// Description of what disappeared.
        reason: String,
    },

    /// One or more template files could not be loaded; matching continues
    /// with whichever templates did load.
    #[error("template(s) skipped: {reason}")]
    MatcherSkip {
        /// Which paths were skipped and why.
        reason: String,
    },

    /// `SendMessageTimeout` returned zero, or window-state verification
    /// failed before a click was dispatched.
    #[error("click dispatch failed: {reason}")]
    ClickDispatchFailure {
        /// Why the click could not be delivered.
        reason: String,
    },

    /// The worker process exited unexpectedly while the supervisor believed
    /// it was running.
    #[error("worker died")]
    WorkerCrash,

    /// A precondition that should never be violated by correct callers, e.g.
    /// mismatched pixel formats between a sub-image and a template.
    #[error("programming error: {0}")]
    Invariant(String),
}

impl AgentError {
    /// Short, stable tag identifying the error kind, suitable for the
    /// `Status.error` wire field (§6/§7 of the design documents).
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Configuration { .. } => "configuration",
            AgentError::CaptureUnavailable { .. } => "capture_unavailable",
            AgentError::CaptureTransient { .. } => "capture_transient",
            AgentError::TargetGone { .. } => "target_gone",
            AgentError::MatcherSkip { .. } => "matcher_skip",
            AgentError::ClickDispatchFailure { .. } => "click_dispatch_failure",
            AgentError::WorkerCrash => "worker_crash",
            AgentError::Invariant(_) => "invariant",
        }
    }

    /// A human-actionable suggestion for resolving this error, independent of
    /// the terse `Display` message.
    pub fn remediation_hint(&self) -> &'static str {
        match self {
            AgentError::Configuration { .. } => {
                "check that exactly one of target_hwnd/target_window_title/target_process \
                 resolves, and that numeric fields are within their documented ranges"
            }
            AgentError::CaptureUnavailable { .. } => {
                "Windows Graphics Capture requires Windows 10 build 17134 or later; verify the \
                 build number and that no group policy disables screen capture"
            }
            AgentError::CaptureTransient { .. } => {
                "usually resolves on the next tick; if it persists, the target window may be \
                 occluded by a protected-content surface"
            }
            AgentError::TargetGone { .. } => {
                "the target window or monitor was closed or unplugged; call Start again with a \
                 fresh target"
            }
            AgentError::MatcherSkip { .. } => {
                "verify the template file paths exist and are readable image files"
            }
            AgentError::ClickDispatchFailure { .. } => {
                "the target window may be hung or the click point may fall outside any enabled \
                 child window; enable verify_window_before_click to confirm before dispatch"
            }
            AgentError::WorkerCrash => {
                "inspect the worker's stderr log for a panic backtrace, then call Start again"
            }
            AgentError::Invariant(_) => "this indicates a bug in the caller, not a runtime condition",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_hint_are_present_for_every_variant() {
        let variants = vec![
            AgentError::Configuration {
                reason: "bad".into(),
            },
            AgentError::CaptureUnavailable {
                reason: "bad".into(),
            },
            AgentError::CaptureTransient {
                reason: "bad".into(),
            },
            AgentError::TargetGone {
                reason: "bad".into(),
            },
            AgentError::MatcherSkip {
                reason: "bad".into(),
            },
            AgentError::ClickDispatchFailure {
                reason: "bad".into(),
            },
            AgentError::WorkerCrash,
            AgentError::Invariant("dtype mismatch".into()),
        ];

        for err in variants {
            assert!(!err.kind().is_empty());
            assert!(!err.remediation_hint().is_empty());
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn worker_crash_kind_is_stable() {
        assert_eq!(AgentError::WorkerCrash.kind(), "worker_crash");
        assert_eq!(AgentError::WorkerCrash.to_string(), "worker died");
    }

    #[test]
    fn configuration_error_carries_reason_in_message() {
        let err = AgentError::Configuration {
            reason: "monitor_index out of range".into(),
        };
        assert!(err.to_string().contains("monitor_index out of range"));
    }
}
