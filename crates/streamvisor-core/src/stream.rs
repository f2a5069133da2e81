use crate::error::SupervisorError;
use crate::process::ProcessId;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Placeholder name for streams started without one
pub const DEFAULT_DISPLAY_NAME: &str = "Stream";

/// Identity on whose behalf streams run (a chat user)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub i64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Destination for terminal notifications (a chat)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner-scoped stream label such as `stream_1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(String);

impl StreamId {
    pub fn sequential(n: u64) -> Self {
        Self(format!("stream_{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to transcode and where to push it. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    source_url: String,
    destination_url: String,
    display_name: String,
    started_at: DateTime<Local>,
}

impl StreamConfig {
    pub fn new(
        source_url: impl Into<String>,
        destination_url: impl Into<String>,
    ) -> Result<Self, SupervisorError> {
        Self::named(source_url, destination_url, DEFAULT_DISPLAY_NAME)
    }

    pub fn named(
        source_url: impl Into<String>,
        destination_url: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<Self, SupervisorError> {
        let source_url = source_url.into();
        let destination_url = destination_url.into();
        if source_url.trim().is_empty() {
            return Err(SupervisorError::InvalidConfig(
                "stream source URL is empty".to_string(),
            ));
        }
        if destination_url.trim().is_empty() {
            return Err(SupervisorError::InvalidConfig(
                "destination URL is empty".to_string(),
            ));
        }

        let display_name = display_name.into();
        let display_name = if display_name.trim().is_empty() {
            DEFAULT_DISPLAY_NAME.to_string()
        } else {
            display_name
        };

        Ok(Self {
            source_url,
            destination_url,
            display_name,
            started_at: Local::now(),
        })
    }

    /// Overrides the creation timestamp
    pub fn with_started_at(mut self, started_at: DateTime<Local>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn destination_url(&self) -> &str {
        &self.destination_url
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Time since the stream was created, `None` if the clock went backwards
    pub fn elapsed(&self) -> Option<Duration> {
        (Local::now() - self.started_at).to_std().ok()
    }
}

/// One running child process together with the configuration it was started from.
///
/// The process handle is owned exclusively; nothing else holds a reference to it.
pub struct StreamHandle<H> {
    pub(crate) process: H,
    pub(crate) config: StreamConfig,
    pub(crate) pid: Option<ProcessId>,
    pub(crate) cancel: CancellationToken,
}

impl<H> StreamHandle<H> {
    pub fn new(
        process: H,
        pid: Option<ProcessId>,
        config: StreamConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            process,
            config,
            pid,
            cancel,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// PID captured at spawn time
    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    pub fn process_mut(&mut self) -> &mut H {
        &mut self.process
    }

    pub fn into_process(self) -> H {
        self.process
    }

    pub(crate) fn release(&self) {
        self.cancel.cancel();
    }
}

/// Formats a runtime as `H:MM:SS`; hours are not wrapped into days.
pub fn format_runtime(runtime: Duration) -> String {
    let total = runtime.as_secs();
    format!(
        "{}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
