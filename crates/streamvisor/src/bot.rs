use crate::commands::{CommandRouter, Sender};
use crate::telegram::{ParseMode, TelegramClient, TelegramError, Update};
use anyhow::{Context, Result};
use backon::{BackoffBuilder, ExponentialBuilder, Retryable};
use std::sync::Arc;
use streamvisor_core::{ChatId, Notifier, OwnerId, ProcessManager, RetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Long-polling update loop feeding the command router
pub struct Bot<M: ProcessManager, N> {
    client: Arc<TelegramClient>,
    router: Arc<CommandRouter<M, N>>,
    retry_config: RetryConfig,
}

impl<M, N> Bot<M, N>
where
    M: ProcessManager + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        client: Arc<TelegramClient>,
        router: Arc<CommandRouter<M, N>>,
        retry_config: RetryConfig,
    ) -> Result<Self> {
        retry_config
            .validate()
            .context("Invalid retry config")?;
        Ok(Self {
            client,
            router,
            retry_config,
        })
    }

    fn create_retry_strategy(&self) -> backon::ExponentialBackoff {
        let mut retry_builder = ExponentialBuilder::default()
            .with_min_delay(self.retry_config.min_delay())
            .with_max_delay(self.retry_config.max_delay())
            .with_max_times(self.retry_config.max_attempts as usize);

        if self.retry_config.jitter_factor > 0.0 {
            retry_builder = retry_builder.with_jitter();
        }

        retry_builder.build()
    }

    async fn fetch_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        let fetch = || async { self.client.get_updates(offset).await };

        if !self.retry_config.retries_enabled() {
            return fetch().await;
        }

        fetch
            .retry(self.create_retry_strategy())
            .when(TelegramError::is_transient)
            .notify(|e, delay| warn!("getUpdates failed, retrying in {delay:?}: {e}"))
            .await
    }

    /// Runs until `cancel` fires. Each command is handled in its own task.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.client
            .delete_webhook()
            .await
            .context("Failed to switch the bot to long polling")?;
        info!("Bot started, waiting for commands");

        let mut offset = 0;
        loop {
            let updates = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.fetch_updates(offset) => result,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(e) => {
                    error!("Failed to fetch updates: {e}");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_config.max_delay()) => continue,
                    }
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                self.dispatch(update);
            }
        }

        info!("Bot update loop stopped");
        Ok(())
    }

    fn dispatch(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let (Some(from), Some(text)) = (message.from, message.text) else {
            return;
        };
        let sender = Sender {
            owner: OwnerId(from.id),
            chat: ChatId(message.chat.id),
            first_name: from.first_name,
        };

        let client = self.client.clone();
        let router = self.router.clone();
        tokio::spawn(async move {
            let Some(reply) = router.handle(&sender, &text).await else {
                return;
            };
            if let Err(e) = client
                .send_message(sender.chat, &reply, Some(ParseMode::Html))
                .await
            {
                warn!("Failed to reply in chat {}: {e}", sender.chat);
            }
        });
    }
}
