use crate::command::TranscodeCommand;
use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::monitor::StreamMonitor;
use crate::notify::Notifier;
use crate::process::{ExitReason, ProcessHandle, ProcessId, ProcessManager, StopOutcome};
use crate::registry::StreamRegistry;
use crate::stream::{ChatId, OwnerId, StreamConfig, StreamHandle, StreamId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A stream that was admitted and launched
#[derive(Debug, Clone)]
pub struct StartedStream {
    pub stream_id: StreamId,
    pub pid: Option<ProcessId>,
    pub config: StreamConfig,
}

/// A stream removed by an explicit stop
#[derive(Debug, Clone)]
pub struct StoppedStream {
    pub stream_id: StreamId,
    pub pid: Option<ProcessId>,
    pub outcome: StopOutcome,
}

/// Point-in-time view of one registered stream
#[derive(Debug, Clone)]
pub struct StreamStatus {
    pub stream_id: StreamId,
    pub pid: Option<ProcessId>,
    pub config: StreamConfig,
    /// False when the process has exited but its monitor has not collected it yet
    pub running: bool,
    /// How the process ended, set only when `running` is false
    pub exit: Option<ExitReason>,
    pub uptime: Option<Duration>,
    pub memory_bytes: Option<u64>,
}

/// Starts, tracks and stops transcoder processes for many owners.
///
/// Cloning is cheap; clones share the registry and the shutdown token.
pub struct StreamSupervisor<M: ProcessManager, N> {
    config: SupervisorConfig,
    manager: Arc<M>,
    notifier: Arc<N>,
    registry: Arc<RwLock<StreamRegistry<M::Handle>>>,
    shutdown: CancellationToken,
}

impl<M: ProcessManager, N> Clone for StreamSupervisor<M, N> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            manager: self.manager.clone(),
            notifier: self.notifier.clone(),
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<M, N> StreamSupervisor<M, N>
where
    M: ProcessManager + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        config: SupervisorConfig,
        manager: Arc<M>,
        notifier: Arc<N>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let registry = StreamRegistry::new(config.max_streams_per_owner, config.stream_id_policy);

        Ok(Self {
            config,
            manager,
            notifier,
            registry: Arc::new(RwLock::new(registry)),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Admits, launches and registers a stream, then starts its monitor.
    ///
    /// Terminal notifications for this stream go to `destination`.
    pub async fn start_stream(
        &self,
        owner: OwnerId,
        destination: ChatId,
        config: StreamConfig,
    ) -> Result<StartedStream, SupervisorError> {
        if self.shutdown.is_cancelled() {
            return Err(SupervisorError::ShuttingDown);
        }

        let admission = {
            let mut registry = self.registry.write().await;
            let Some(admission) = registry.try_admit(owner) else {
                info!("Owner {owner} is at the stream limit ({})", registry.limit());
                return Err(SupervisorError::AdmissionRejected {
                    limit: registry.limit(),
                });
            };
            admission
        };

        let command = TranscodeCommand::for_stream(&self.config.transcoder_path, &config);
        let mut process = match self.manager.launch(&command).await {
            Ok(process) => process,
            Err(e) => {
                warn!("Failed to launch stream for owner {owner}: {e}");
                self.registry.write().await.release(admission);
                return Err(e.into());
            }
        };
        let pid = process.get_pid();

        let mut registry = self.registry.write().await;
        if self.shutdown.is_cancelled() {
            registry.release(admission);
            drop(registry);
            self.manager
                .terminate_with_grace(&mut process, self.config.grace_period())
                .await;
            return Err(SupervisorError::ShuttingDown);
        }

        let cancel = self.shutdown.child_token();
        let handle = StreamHandle::new(process, pid, config.clone(), cancel.clone());
        let key = registry.register(admission, handle);
        drop(registry);

        info!(
            "Started {} for owner {owner} (PID: {:?}) from {}",
            key.stream_id,
            pid,
            config.source_url()
        );

        let monitor = StreamMonitor {
            registry: self.registry.clone(),
            notifier: self.notifier.clone(),
            key: key.clone(),
            destination,
            poll_interval: self.config.poll_interval(),
            diagnostic_limit: self.config.diagnostic_limit,
            cancel,
        };
        tokio::spawn(monitor.run());

        Ok(StartedStream {
            stream_id: key.stream_id,
            pid,
            config,
        })
    }

    /// Removes one stream and terminates its process.
    ///
    /// The stream's monitor stands down without notifying; the returned value
    /// is the caller's confirmation. The owner's slot stays taken until the
    /// process is gone.
    pub async fn stop_stream(
        &self,
        owner: OwnerId,
        stream_id: &StreamId,
    ) -> Result<StoppedStream, SupervisorError> {
        let (handle, held) = {
            let mut registry = self.registry.write().await;
            let handle = registry
                .remove(owner, stream_id)
                .ok_or_else(|| SupervisorError::NotFound(stream_id.clone()))?;
            (handle, registry.reserve(owner))
        };

        let stopped = terminate(
            self.manager.clone(),
            self.config.grace_period(),
            stream_id.clone(),
            handle,
        )
        .await;
        self.registry.write().await.release(held);
        Ok(stopped)
    }

    /// Removes and terminates every stream of one owner
    pub async fn stop_all(&self, owner: OwnerId) -> Vec<StoppedStream> {
        let (handles, held) = {
            let mut registry = self.registry.write().await;
            let handles = registry.remove_owner(owner);
            let held: Vec<_> = handles.iter().map(|_| registry.reserve(owner)).collect();
            (handles, held)
        };

        let stopped = self.terminate_all(handles).await;
        let mut registry = self.registry.write().await;
        for admission in held {
            registry.release(admission);
        }
        stopped
    }

    pub async fn status(&self, owner: OwnerId) -> Vec<StreamStatus> {
        let mut registry = self.registry.write().await;
        let mut statuses = Vec::new();
        for (stream_id, handle) in registry.list(owner) {
            let exit = match handle.process_mut().try_wait().await {
                Ok(exit) => exit,
                Err(e) => {
                    warn!("Failed to poll {stream_id} for status: {e}");
                    None
                }
            };
            let running = exit.is_none();
            let info = handle
                .pid()
                .filter(|_| running)
                .and_then(|pid| self.manager.process_info(pid));

            statuses.push(StreamStatus {
                stream_id: stream_id.clone(),
                pid: handle.pid(),
                config: handle.config().clone(),
                running,
                exit,
                uptime: if running {
                    handle.config().elapsed()
                } else {
                    None
                },
                memory_bytes: info.map(|info| info.memory_bytes),
            });
        }
        statuses
    }

    pub async fn active_count(&self, owner: OwnerId) -> usize {
        self.registry.read().await.active_count(owner)
    }

    pub async fn total_active(&self) -> usize {
        self.registry.read().await.total_active()
    }

    /// Terminates every stream and refuses new launches.
    ///
    /// The registry is emptied regardless of individual termination outcomes.
    pub async fn shutdown(&self) -> Vec<StoppedStream> {
        info!("Shutting down supervisor, terminating all streams");
        self.shutdown.cancel();

        let handles: Vec<_> = self
            .registry
            .write()
            .await
            .drain()
            .into_iter()
            .map(|(_, stream_id, handle)| (stream_id, handle))
            .collect();
        let stopped = self.terminate_all(handles).await;

        info!("Supervisor shutdown complete ({} streams stopped)", stopped.len());
        stopped
    }

    async fn terminate_all(
        &self,
        handles: Vec<(StreamId, StreamHandle<M::Handle>)>,
    ) -> Vec<StoppedStream> {
        let mut tasks = JoinSet::new();
        for (stream_id, handle) in handles {
            tasks.spawn(terminate(
                self.manager.clone(),
                self.config.grace_period(),
                stream_id,
                handle,
            ));
        }

        let mut stopped = Vec::with_capacity(tasks.len());
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(stream) => stopped.push(stream),
                Err(e) => warn!("Termination task failed: {e}"),
            }
        }
        stopped
    }
}

async fn terminate<M: ProcessManager>(
    manager: Arc<M>,
    grace: Duration,
    stream_id: StreamId,
    handle: StreamHandle<M::Handle>,
) -> StoppedStream {
    let pid = handle.pid();
    let mut process = handle.into_process();
    let outcome = manager.terminate_with_grace(&mut process, grace).await;

    match &outcome {
        StopOutcome::Failed(message) => {
            warn!("Could not confirm termination of {stream_id} (PID: {pid:?}): {message}")
        }
        outcome => info!("Stopped {stream_id} (PID: {pid:?}): {outcome:?}"),
    }

    StoppedStream {
        stream_id,
        pid,
        outcome,
    }
}
