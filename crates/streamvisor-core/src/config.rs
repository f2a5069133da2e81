use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retry logic used by the chat transport's update loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Minimum delay between retry attempts (in milliseconds)
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Maximum delay between retry attempts (in milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum number of retry attempts (0 means no retries, just one attempt)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Jitter factor for randomizing delays (0.0 to 1.0)
    /// 0.0 = no jitter
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(anyhow::anyhow!(
                "min_delay_ms cannot be greater than max_delay_ms"
            ));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("jitter_factor must be between 0.0 and 1.0"));
        }

        if self.max_delay_ms > 60_000 {
            return Err(anyhow::anyhow!("max_delay_ms should not exceed 60 seconds"));
        }

        Ok(())
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Check if retries are enabled (more than 1 attempt)
    pub fn retries_enabled(&self) -> bool {
        self.max_attempts > 1
    }
}

/// How stream identifiers are generated for an owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamIdPolicy {
    /// `stream_<live count + 1>`; identifiers are reused once streams end.
    #[default]
    LiveCount,
    /// `stream_<n>` from a per-owner counter that never resets.
    Monotonic,
}

impl std::str::FromStr for StreamIdPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live-count" | "live_count" | "livecount" | "legacy" => Ok(Self::LiveCount),
            "monotonic" | "counter" => Ok(Self::Monotonic),
            other => Err(format!("unknown stream id policy: {other}")),
        }
    }
}

/// Supervisor configuration
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    /// Path or name of the transcoder executable
    #[builder(default = "default_transcoder_path()")]
    #[serde(default = "default_transcoder_path")]
    pub transcoder_path: String,

    /// Maximum number of concurrently running streams per owner
    #[builder(default = "default_max_streams_per_owner()")]
    #[serde(default = "default_max_streams_per_owner")]
    pub max_streams_per_owner: usize,

    /// Interval between liveness polls of a running stream (in milliseconds)
    #[builder(default = "default_poll_interval_ms()")]
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Time a stream gets to exit after SIGTERM before it is killed (in milliseconds)
    #[builder(default = "default_grace_period_ms()")]
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Maximum number of stderr characters quoted in a failure report
    #[builder(default = "default_diagnostic_limit()")]
    #[serde(default = "default_diagnostic_limit")]
    pub diagnostic_limit: usize,

    #[builder(default)]
    #[serde(default)]
    pub stream_id_policy: StreamIdPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            transcoder_path: default_transcoder_path(),
            max_streams_per_owner: default_max_streams_per_owner(),
            poll_interval_ms: default_poll_interval_ms(),
            grace_period_ms: default_grace_period_ms(),
            diagnostic_limit: default_diagnostic_limit(),
            stream_id_policy: StreamIdPolicy::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn builder() -> SupervisorConfigBuilder {
        SupervisorConfigBuilder::default()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.transcoder_path.trim().is_empty() {
            return Err(anyhow::anyhow!("transcoder_path must not be empty"));
        }

        if self.max_streams_per_owner == 0 {
            return Err(anyhow::anyhow!("max_streams_per_owner must be at least 1"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("poll_interval_ms must be greater than 0"));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

// Default value functions for serde
fn default_min_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_jitter_factor() -> f64 {
    0.1
}
fn default_transcoder_path() -> String {
    "ffmpeg".to_string()
}
fn default_max_streams_per_owner() -> usize {
    1
}
fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_grace_period_ms() -> u64 {
    5_000
}
fn default_diagnostic_limit() -> usize {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_config() {
        let config = RetryConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.retries_enabled());
    }

    #[test]
    fn test_single_attempt_disables_retries() {
        let config = RetryConfig {
            max_attempts: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(!config.retries_enabled());
    }

    #[test]
    fn test_invalid_retry_config() {
        let mut config = RetryConfig {
            min_delay_ms: 1000,
            max_delay_ms: 500,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.min_delay_ms = 100;
        config.max_delay_ms = 1000;
        config.jitter_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_supervisor_defaults() {
        let config = SupervisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transcoder_path, "ffmpeg");
        assert_eq!(config.max_streams_per_owner, 1);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert_eq!(config.diagnostic_limit, 500);
        assert_eq!(config.stream_id_policy, StreamIdPolicy::LiveCount);
    }

    #[test]
    fn test_builder_matches_defaults() {
        let built = SupervisorConfig::builder().build().unwrap();
        assert_eq!(built, SupervisorConfig::default());

        let built = SupervisorConfig::builder()
            .transcoder_path("/opt/ffmpeg/bin/ffmpeg")
            .max_streams_per_owner(3usize)
            .build()
            .unwrap();
        assert_eq!(built.transcoder_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(built.max_streams_per_owner, 3);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let config = SupervisorConfig {
            max_streams_per_owner: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SupervisorConfig =
            serde_json::from_str(r#"{"maxStreamsPerOwner": 2, "streamIdPolicy": "monotonic"}"#)
                .unwrap();
        assert_eq!(config.max_streams_per_owner, 2);
        assert_eq!(config.stream_id_policy, StreamIdPolicy::Monotonic);
        assert_eq!(config.poll_interval_ms, 5_000);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("live-count".parse(), Ok(StreamIdPolicy::LiveCount));
        assert_eq!("Monotonic".parse(), Ok(StreamIdPolicy::Monotonic));
        assert!("random".parse::<StreamIdPolicy>().is_err());
    }
}
