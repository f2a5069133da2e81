use std::path::PathBuf;
use streamvisor_core::{RetryConfig, StreamIdPolicy, SupervisorConfig};
use thiserror::Error;

/// Token value shipped in sample configs; never valid
pub const PLACEHOLDER_TOKEN: &str = "YOUR_BOT_TOKEN_HERE";

pub const DEFAULT_PROFILES_FILE: &str = "saved_configs.json";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("BOT_TOKEN is not set")]
    MissingToken,

    #[error("BOT_TOKEN still holds the placeholder value")]
    PlaceholderToken,

    #[error("Invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid supervisor settings: {0}")]
    Supervisor(String),
}

/// Everything the binary reads from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub bot_token: String,
    pub admin_ids: Vec<i64>,
    pub profiles_file: PathBuf,
    pub supervisor: SupervisorConfig,
    pub retry: RetryConfig,
}

impl Settings {
    /// Loads `.env` if present, then reads the process environment
    pub fn from_env() -> Result<Self, SettingsError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bot_token = get("BOT_TOKEN").ok_or(SettingsError::MissingToken)?;
        if bot_token.trim() == PLACEHOLDER_TOKEN {
            return Err(SettingsError::PlaceholderToken);
        }

        let admin_ids = match get("ADMIN_IDS") {
            Some(raw) => parse_admin_ids(&raw)?,
            None => Vec::new(),
        };

        let defaults = SupervisorConfig::default();
        let supervisor = SupervisorConfig {
            transcoder_path: get("FFMPEG_PATH").unwrap_or(defaults.transcoder_path),
            max_streams_per_owner: parse_or("MAX_STREAMS_PER_USER", get("MAX_STREAMS_PER_USER"))?
                .unwrap_or(defaults.max_streams_per_owner),
            poll_interval_ms: parse_or("STREAM_POLL_INTERVAL_MS", get("STREAM_POLL_INTERVAL_MS"))?
                .unwrap_or(defaults.poll_interval_ms),
            grace_period_ms: parse_or("STREAM_GRACE_PERIOD_MS", get("STREAM_GRACE_PERIOD_MS"))?
                .unwrap_or(defaults.grace_period_ms),
            diagnostic_limit: defaults.diagnostic_limit,
            stream_id_policy: parse_or::<StreamIdPolicy>("STREAM_ID_POLICY", get("STREAM_ID_POLICY"))?
                .unwrap_or_default(),
        };
        supervisor
            .validate()
            .map_err(|e| SettingsError::Supervisor(e.to_string()))?;

        Ok(Self {
            bot_token: bot_token.trim().to_string(),
            admin_ids,
            profiles_file: get("PROFILES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROFILES_FILE)),
            supervisor,
            retry: RetryConfig::default(),
        })
    }
}

fn parse_admin_ids(raw: &str) -> Result<Vec<i64>, SettingsError> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<i64>().map_err(|e| SettingsError::Invalid {
                var: "ADMIN_IDS",
                value: id.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

fn parse_or<T>(var: &'static str, value: Option<String>) -> Result<Option<T>, SettingsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| SettingsError::Invalid {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
