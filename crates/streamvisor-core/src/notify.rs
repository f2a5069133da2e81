use crate::process::ExitReason;
use crate::stream::{ChatId, StreamId, format_runtime};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Text used when a failed stream left no stderr output
pub const NO_DIAGNOSTICS: &str = "no diagnostic output";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivers terminal status to the chat that started a stream
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, destination: ChatId, text: &str) -> Result<(), NotifyError>;
}

/// Final outcome of a stream, sent once when its process exits on its own
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalReport {
    Completed {
        stream_id: StreamId,
        runtime: Option<Duration>,
    },
    Failed {
        stream_id: StreamId,
        reason: ExitReason,
        runtime: Option<Duration>,
        diagnostics: Option<String>,
    },
}

impl TerminalReport {
    pub fn new(
        stream_id: StreamId,
        reason: ExitReason,
        runtime: Option<Duration>,
        diagnostics: Option<String>,
    ) -> Self {
        if reason.success() {
            TerminalReport::Completed { stream_id, runtime }
        } else {
            TerminalReport::Failed {
                stream_id,
                reason,
                runtime,
                diagnostics,
            }
        }
    }
}

fn runtime_text(runtime: Option<Duration>) -> String {
    runtime.map_or_else(|| "unknown".to_string(), format_runtime)
}

impl fmt::Display for TerminalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReport::Completed { stream_id, runtime } => write!(
                f,
                "✅ Stream {stream_id} finished successfully\nRuntime: {}",
                runtime_text(*runtime)
            ),
            TerminalReport::Failed {
                stream_id,
                reason,
                runtime,
                diagnostics,
            } => write!(
                f,
                "⚠️ Stream {stream_id} ended with an error\nExit code: {reason}\nRuntime: {}\n\nDetails:\n{}",
                runtime_text(*runtime),
                diagnostics.as_deref().unwrap_or(NO_DIAGNOSTICS)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_report() {
        let report = TerminalReport::new(
            StreamId::from("stream_1"),
            ExitReason::Code(0),
            Some(Duration::from_secs(65)),
            Some("ignored".to_string()),
        );
        assert!(matches!(report, TerminalReport::Completed { .. }));
        let text = report.to_string();
        assert!(text.contains("stream_1 finished successfully"));
        assert!(text.contains("0:01:05"));
        assert!(!text.contains("ignored"));
    }

    #[test]
    fn test_failure_report_includes_code_and_details() {
        let report = TerminalReport::new(
            StreamId::from("stream_2"),
            ExitReason::Code(1),
            None,
            Some("Connection refused".to_string()),
        );
        assert!(matches!(report, TerminalReport::Failed { .. }));
        let text = report.to_string();
        assert!(text.contains("Exit code: 1"));
        assert!(text.contains("Runtime: unknown"));
        assert!(text.contains("Connection refused"));
    }

    #[test]
    fn test_failure_report_placeholder() {
        let report = TerminalReport::new(
            StreamId::from("stream_1"),
            ExitReason::Signaled(9),
            Some(Duration::ZERO),
            None,
        );
        let text = report.to_string();
        assert!(text.contains("signal 9"));
        assert!(text.contains(NO_DIAGNOSTICS));
    }
}
