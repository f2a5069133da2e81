pub mod bot;
pub mod commands;
pub mod profiles;
pub mod settings;
pub mod telegram;

pub use bot::Bot;
pub use commands::{Command, CommandRouter, Sender};
pub use profiles::{Profile, ProfileStore, ProfileStoreError};
pub use settings::{Settings, SettingsError};
pub use telegram::{TelegramClient, TelegramError};

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

#[cfg(unix)]
impl streamvisor_core::ProcessManagerFactory for PlatformProcessManagerFactory {
    type Manager = streamvisor_unix::UnixProcessManager;

    fn create_process_manager() -> Self::Manager {
        streamvisor_unix::UnixProcessManagerFactory::create_process_manager()
    }

    fn platform_name() -> &'static str {
        streamvisor_unix::UnixProcessManagerFactory::platform_name()
    }
}
