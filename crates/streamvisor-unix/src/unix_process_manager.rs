use anyhow::Result;
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;
use streamvisor_core::{
    DiagnosticCapture, ExitReason, LaunchError, ProcessHandle, ProcessId, ProcessInfo,
    ProcessLauncher, ProcessTermination, TerminationResult, TranscodeCommand,
};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

fn exit_reason(status: ExitStatus) -> ExitReason {
    match (status.code(), status.signal()) {
        (Some(code), _) => ExitReason::Code(code),
        (None, Some(signal)) => ExitReason::Signaled(signal),
        (None, None) => ExitReason::Unknown,
    }
}

/// Unix-specific process handle implementation
pub struct UnixProcessHandle {
    child: Child,
    stderr: DiagnosticCapture,
}

impl UnixProcessHandle {
    pub fn new(mut child: Child) -> Self {
        let stderr = match child.stderr.take() {
            Some(pipe) => DiagnosticCapture::spawn(pipe),
            None => DiagnosticCapture::empty(),
        };
        Self { child, stderr }
    }
}

#[async_trait]
impl ProcessHandle for UnixProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.child.id().map(ProcessId::from)
    }

    async fn try_wait(&mut self) -> Result<Option<ExitReason>> {
        Ok(self.child.try_wait()?.map(exit_reason))
    }

    async fn wait(&mut self) -> Result<ExitReason> {
        let status = self.child.wait().await?;
        Ok(exit_reason(status))
    }

    async fn kill(&mut self) -> Result<()> {
        self.child
            .kill()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to kill process: {}", e))
    }

    async fn diagnostics(&mut self, limit: usize) -> Option<String> {
        self.stderr.snippet(limit).await
    }
}

/// Spawns transcoders in their own process group and signals them with nix
pub struct UnixProcessManager {
    system: Mutex<System>,
}

impl Default for UnixProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UnixProcessManager {
    pub fn new() -> Self {
        info!("Initializing Unix process manager");
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn send(pid: ProcessId, signal: Signal) -> TerminationResult {
        let nix_pid = NixPid::from_raw(pid.0 as i32);
        let result = match signal {
            // Children share the transcoder's process group
            Signal::SIGKILL => signal::killpg(nix_pid, signal),
            _ => signal::kill(nix_pid, signal),
        };

        match result {
            Ok(()) => {
                info!("Sent {signal} to process {}", pid.0);
                TerminationResult::Success
            }
            Err(nix::errno::Errno::ESRCH) => {
                info!("Process {} not found (already terminated)", pid.0);
                TerminationResult::ProcessNotFound
            }
            Err(nix::errno::Errno::EPERM) => {
                warn!("Permission denied to signal process {}", pid.0);
                TerminationResult::AccessDenied
            }
            Err(e) => {
                warn!("Failed to send {signal} to process {}: {}", pid.0, e);
                TerminationResult::Failed(format!("{signal} failed: {e}"))
            }
        }
    }
}

#[async_trait]
impl ProcessLauncher for UnixProcessManager {
    type Handle = UnixProcessHandle;

    async fn launch(&self, command: &TranscodeCommand) -> Result<UnixProcessHandle, LaunchError> {
        let mut cmd = Command::new(command.program());
        cmd.args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so the whole tree can be killed
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| LaunchError::from_spawn(command.program(), e))?;

        if let Some(pid) = child.id() {
            info!(
                "Spawned Unix process: {} (PID: {}) with args: {:?}",
                command.program(),
                pid,
                command.args()
            );
        }

        Ok(UnixProcessHandle::new(child))
    }

    fn process_info(&self, pid: ProcessId) -> Option<ProcessInfo> {
        let mut system = self.system.lock().ok()?;
        let sys_pid = Pid::from_u32(pid.0);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        let Some(process) = system.process(sys_pid) else {
            debug!("No process info for PID {}", pid.0);
            return None;
        };
        Some(ProcessInfo {
            pid,
            alive: !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
            memory_bytes: process.memory(),
        })
    }
}

#[async_trait]
impl ProcessTermination for UnixProcessManager {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        match handle.get_pid() {
            Some(pid) => Self::send(pid, Signal::SIGTERM),
            None => TerminationResult::ProcessNotFound,
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };
        let result = Self::send(pid, Signal::SIGKILL);
        if result == TerminationResult::Success {
            // Reap it
            if let Err(e) = handle.kill().await {
                warn!("Handle kill cleanup failed: {}", e);
            }
        }
        result
    }
}
