//! Per-stream exit watcher.
//!
//! Polls the handle's process at a fixed interval instead of awaiting its
//! exit: the process stays inside the registry so the stop path can signal
//! it, and the monitor only borrows it for each poll.

use crate::notify::{Notifier, TerminalReport};
use crate::process::{ExitReason, ProcessHandle};
use crate::registry::{StreamKey, StreamRegistry};
use crate::stream::{ChatId, StreamHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum Poll<H> {
    Running,
    Gone,
    Exited(StreamHandle<H>, ExitReason),
}

pub(crate) struct StreamMonitor<H, N> {
    pub(crate) registry: Arc<RwLock<StreamRegistry<H>>>,
    pub(crate) notifier: Arc<N>,
    pub(crate) key: StreamKey,
    pub(crate) destination: ChatId,
    pub(crate) poll_interval: Duration,
    pub(crate) diagnostic_limit: usize,
    pub(crate) cancel: CancellationToken,
}

impl<H, N> StreamMonitor<H, N>
where
    H: ProcessHandle + 'static,
    N: Notifier + 'static,
{
    /// Watches the stream until it exits or is removed by someone else.
    ///
    /// Returns the report that was sent, or `None` when the monitor stood down.
    pub(crate) async fn run(self) -> Option<TerminalReport> {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Monitor for {} cancelled", self.key.stream_id);
                    return None;
                }
                _ = ticker.tick() => {}
            }

            match self.poll().await {
                Poll::Running => continue,
                Poll::Gone => {
                    debug!(
                        "Stream {} of owner {} no longer registered, monitor exiting",
                        self.key.stream_id, self.key.owner
                    );
                    return None;
                }
                Poll::Exited(handle, reason) => return Some(self.finish(handle, reason).await),
            }
        }
    }

    async fn poll(&self) -> Poll<H> {
        let mut registry = self.registry.write().await;
        if self.cancel.is_cancelled() {
            return Poll::Gone;
        }
        let Some(handle) = registry.get_mut(&self.key) else {
            return Poll::Gone;
        };

        let polled = handle.process_mut().try_wait().await;
        match polled {
            Ok(None) => Poll::Running,
            Ok(Some(reason)) => match registry.remove_key(&self.key) {
                Some(handle) => Poll::Exited(handle, reason),
                None => Poll::Gone,
            },
            Err(e) => {
                warn!("Failed to poll stream {}: {e}", self.key.stream_id);
                Poll::Running
            }
        }
    }

    async fn finish(&self, handle: StreamHandle<H>, reason: ExitReason) -> TerminalReport {
        let runtime = handle.config().elapsed();
        let mut process = handle.into_process();
        let diagnostics = if reason.success() {
            None
        } else {
            process.diagnostics(self.diagnostic_limit).await
        };

        info!(
            "Stream {} of owner {} exited ({reason})",
            self.key.stream_id, self.key.owner
        );

        let report = TerminalReport::new(self.key.stream_id.clone(), reason, runtime, diagnostics);
        if let Err(e) = self
            .notifier
            .notify(self.destination, &report.to_string())
            .await
        {
            warn!(
                "Failed to deliver terminal notification for {} to chat {}: {e}",
                self.key.stream_id, self.destination
            );
        }
        report
    }
}
