//! In-memory process manager and notifier for exercising the supervisor
//! without spawning real processes.

use crate::command::TranscodeCommand;
use crate::error::LaunchError;
use crate::notify::{Notifier, NotifyError};
use crate::process::{
    ExitReason, ProcessHandle, ProcessId, ProcessInfo, ProcessLauncher, ProcessTermination,
    TerminationResult,
};
use crate::stream::ChatId;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

pub const SIGTERM: i32 = 15;
pub const SIGKILL: i32 = 9;

/// How the next launch should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchFailure {
    /// The executable does not exist
    NotFound,
    /// Spawning failed for another reason
    Spawn,
}

/// A signal the fake manager was asked to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeSignal {
    Term,
    Kill,
}

#[derive(Default)]
struct FakeState {
    next_pid: u32,
    launches: Vec<TranscodeCommand>,
    processes: HashMap<u32, watch::Sender<Option<ExitReason>>>,
    signals: Vec<(ProcessId, FakeSignal)>,
    next_failure: Option<LaunchFailure>,
    ignore_sigterm: bool,
    stderr: Option<String>,
    launch_delay: Duration,
}

/// Scriptable stand-in for a platform process manager.
///
/// Clones share state, so a test can keep one copy to drive processes while
/// the supervisor owns another.
#[derive(Clone, Default)]
pub struct FakeProcessManager {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProcessManager {
    pub fn new() -> Self {
        let manager = Self::default();
        manager.state().next_pid = 1000;
        manager
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next launch fail
    pub fn fail_next_launch(&self, failure: LaunchFailure) {
        self.state().next_failure = Some(failure);
    }

    /// Processes launched from now on ignore SIGTERM
    pub fn ignore_sigterm(&self, ignore: bool) {
        self.state().ignore_sigterm = ignore;
    }

    /// Stderr text for processes launched from now on
    pub fn set_stderr(&self, text: impl Into<String>) {
        self.state().stderr = Some(text.into());
    }

    /// Launches take this long before returning
    pub fn set_launch_delay(&self, delay: Duration) {
        self.state().launch_delay = delay;
    }

    pub fn launches(&self) -> Vec<TranscodeCommand> {
        self.state().launches.clone()
    }

    pub fn signals(&self) -> Vec<(ProcessId, FakeSignal)> {
        self.state().signals.clone()
    }

    /// Ends a process as if it exited on its own
    pub fn exit(&self, pid: ProcessId, reason: ExitReason) {
        if let Some(tx) = self.state().processes.get(&pid.0) {
            tx.send_replace(Some(reason));
        }
    }

    pub fn is_alive(&self, pid: ProcessId) -> bool {
        self.state()
            .processes
            .get(&pid.0)
            .is_some_and(|tx| tx.borrow().is_none())
    }

    /// Number of launched processes that have not exited
    pub fn alive_count(&self) -> usize {
        self.state()
            .processes
            .values()
            .filter(|tx| tx.borrow().is_none())
            .count()
    }

    fn signal(&self, handle: &dyn ProcessHandle, signal: FakeSignal) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };
        let mut state = self.state();
        state.signals.push((pid, signal));
        let ignore_sigterm = state.ignore_sigterm;

        let Some(tx) = state.processes.get(&pid.0) else {
            return TerminationResult::ProcessNotFound;
        };
        if tx.borrow().is_some() {
            return TerminationResult::ProcessNotFound;
        }
        match signal {
            FakeSignal::Term if ignore_sigterm => {}
            FakeSignal::Term => {
                tx.send_replace(Some(ExitReason::Signaled(SIGTERM)));
            }
            FakeSignal::Kill => {
                tx.send_replace(Some(ExitReason::Signaled(SIGKILL)));
            }
        }
        TerminationResult::Success
    }
}

/// Handle to a process that only exists inside a [`FakeProcessManager`]
pub struct FakeProcess {
    pid: ProcessId,
    exit: watch::Receiver<Option<ExitReason>>,
    stderr: Option<String>,
    manager: FakeProcessManager,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn get_pid(&self) -> Option<ProcessId> {
        Some(self.pid)
    }

    async fn try_wait(&mut self) -> Result<Option<ExitReason>> {
        Ok(*self.exit.borrow())
    }

    async fn wait(&mut self) -> Result<ExitReason> {
        let reason = self.exit.wait_for(|reason| reason.is_some()).await?;
        Ok((*reason).unwrap_or(ExitReason::Unknown))
    }

    async fn kill(&mut self) -> Result<()> {
        if self.exit.borrow().is_none() {
            self.manager.exit(self.pid, ExitReason::Signaled(SIGKILL));
        }
        Ok(())
    }

    async fn diagnostics(&mut self, limit: usize) -> Option<String> {
        let text: String = self.stderr.as_deref()?.chars().take(limit).collect();
        if text.trim().is_empty() { None } else { Some(text) }
    }
}

#[async_trait]
impl ProcessLauncher for FakeProcessManager {
    type Handle = FakeProcess;

    async fn launch(&self, command: &TranscodeCommand) -> Result<FakeProcess, LaunchError> {
        let delay = self.state().launch_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.launches.push(command.clone());
        match state.next_failure.take() {
            Some(LaunchFailure::NotFound) => {
                return Err(LaunchError::LauncherNotFound {
                    path: command.program().to_string(),
                });
            }
            Some(LaunchFailure::Spawn) => {
                return Err(LaunchError::LaunchFailed(std::io::Error::other(
                    "resource temporarily unavailable",
                )));
            }
            None => {}
        }

        state.next_pid += 1;
        let pid = ProcessId(state.next_pid);
        let (tx, rx) = watch::channel(None);
        state.processes.insert(pid.0, tx);

        Ok(FakeProcess {
            pid,
            exit: rx,
            stderr: state.stderr.clone(),
            manager: self.clone(),
        })
    }

    fn process_info(&self, pid: ProcessId) -> Option<ProcessInfo> {
        let state = self.state();
        let tx = state.processes.get(&pid.0)?;
        Some(ProcessInfo {
            pid,
            alive: tx.borrow().is_none(),
            memory_bytes: 64 * 1024 * 1024,
        })
    }
}

#[async_trait]
impl ProcessTermination for FakeProcessManager {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        self.signal(handle, FakeSignal::Term)
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        self.signal(handle, FakeSignal::Kill)
    }
}

/// Notifier that records every message it is asked to deliver
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(ChatId, String)>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delivery attempt fails while set (attempts are still recorded)
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(|p| p.into_inner()) = failing;
    }

    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, destination: ChatId, text: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((destination, text.to_string()));
        if *self.failing.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(NotifyError::Delivery("chat unavailable".to_string()));
        }
        Ok(())
    }
}
