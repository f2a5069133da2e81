use crate::command::TranscodeCommand;
use crate::error::LaunchError;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Unique identifier for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(value: u32) -> Self {
        ProcessId(value)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Process exited with the given exit code
    Code(i32),
    /// Process was terminated by a signal
    Signaled(i32),
    /// Platform did not report a code or signal
    Unknown,
}

impl ExitReason {
    pub fn success(&self) -> bool {
        matches!(self, ExitReason::Code(0))
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Code(code) => write!(f, "{code}"),
            ExitReason::Signaled(signal) => write!(f, "signal {signal}"),
            ExitReason::Unknown => f.write_str("unknown"),
        }
    }
}

/// Result of a single termination signal
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Signal was delivered
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

/// Outcome of the full graceful-then-forced stop sequence
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// Process exited within the grace period
    Graceful(ExitReason),
    /// Grace period elapsed and the process was killed
    Killed(ExitReason),
    /// Process had already exited before the stop began
    AlreadyExited(Option<ExitReason>),
    /// The process could not be confirmed terminated
    Failed(String),
}

impl StopOutcome {
    pub fn is_stopped(&self) -> bool {
        !matches!(self, StopOutcome::Failed(_))
    }
}

/// Resource snapshot of a live process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    /// False once the process has exited but has not been reaped yet
    pub alive: bool,
    pub memory_bytes: u64,
}

/// Trait representing a handle to a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None once the process has been reaped)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Try to get exit status without blocking.
    /// Once the process has exited every later call returns the same reason.
    async fn try_wait(&mut self) -> Result<Option<ExitReason>>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ExitReason>;

    /// Kill the process and reap it
    async fn kill(&mut self) -> Result<()>;

    /// Leading stderr output, truncated to `limit` characters.
    /// Returns `None` when the process wrote nothing.
    async fn diagnostics(&mut self, limit: usize) -> Option<String>;
}

/// Starts transcoder processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// The type of process handle this launcher produces
    type Handle: ProcessHandle + 'static;

    /// Spawn the command with stdin closed and stderr captured
    async fn launch(&self, command: &TranscodeCommand) -> Result<Self::Handle, LaunchError>;

    /// Resource snapshot for a PID, `None` if no such process exists
    fn process_info(&self, pid: ProcessId) -> Option<ProcessInfo>;
}

/// Signal-level process termination
#[async_trait]
pub trait ProcessTermination: Send + Sync {
    /// Terminate a single process gracefully (SIGTERM on Unix)
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Force kill a single process (SIGKILL on Unix)
    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Graceful termination, then a force kill if the process outlives `grace`
    async fn terminate_with_grace(
        &self,
        handle: &mut dyn ProcessHandle,
        grace: Duration,
    ) -> StopOutcome {
        match self.terminate_gracefully(handle).await {
            TerminationResult::Success => {
                match tokio::time::timeout(grace, handle.wait()).await {
                    Ok(Ok(reason)) => return StopOutcome::Graceful(reason),
                    Ok(Err(e)) => return StopOutcome::Failed(format!("wait failed: {e}")),
                    Err(_) => {
                        warn!(
                            "Process {:?} ignored SIGTERM for {:?}, escalating to SIGKILL",
                            handle.get_pid(),
                            grace
                        );
                    }
                }
            }
            TerminationResult::ProcessNotFound => {
                return StopOutcome::AlreadyExited(handle.wait().await.ok());
            }
            other => {
                warn!(
                    "Graceful termination of {:?} failed: {:?}",
                    handle.get_pid(),
                    other
                );
            }
        }

        match self.force_kill(handle).await {
            TerminationResult::Success | TerminationResult::ProcessNotFound => {
                match handle.wait().await {
                    Ok(reason) => {
                        info!("Process killed after grace period: {reason}");
                        StopOutcome::Killed(reason)
                    }
                    Err(e) => StopOutcome::Failed(format!("wait after kill failed: {e}")),
                }
            }
            TerminationResult::AccessDenied => {
                StopOutcome::Failed("permission denied".to_string())
            }
            TerminationResult::Failed(message) => StopOutcome::Failed(message),
        }
    }
}

/// Launcher plus termination, the full contract the supervisor relies on
pub trait ProcessManager: ProcessLauncher + ProcessTermination {}

impl<T: ProcessLauncher + ProcessTermination> ProcessManager for T {}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// The type of process manager this factory creates
    type Manager: ProcessManager;

    /// Create a process manager for the current platform
    fn create_process_manager() -> Self::Manager;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_reason_success() {
        assert!(ExitReason::Code(0).success());
        assert!(!ExitReason::Code(1).success());
        assert!(!ExitReason::Signaled(9).success());
        assert!(!ExitReason::Unknown.success());
    }

    #[test]
    fn test_exit_reason_display() {
        assert_eq!(ExitReason::Code(255).to_string(), "255");
        assert_eq!(ExitReason::Signaled(15).to_string(), "signal 15");
    }

    #[test]
    fn test_stop_outcome() {
        assert!(StopOutcome::Graceful(ExitReason::Signaled(15)).is_stopped());
        assert!(StopOutcome::Killed(ExitReason::Signaled(9)).is_stopped());
        assert!(StopOutcome::AlreadyExited(None).is_stopped());
        assert!(!StopOutcome::Failed("x".to_string()).is_stopped());
    }
}
