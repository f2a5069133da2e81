use crate::stream::StreamId;
use thiserror::Error;

/// Errors raised while starting a transcoder process
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Transcoder executable not found: {path}")]
    LauncherNotFound { path: String },

    #[error("Failed to start transcoder: {0}")]
    LaunchFailed(#[source] std::io::Error),
}

impl LaunchError {
    /// Classifies a spawn error, separating a missing executable from other failures
    pub fn from_spawn(path: &str, error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            LaunchError::LauncherNotFound {
                path: path.to_string(),
            }
        } else {
            LaunchError::LaunchFailed(error)
        }
    }
}

/// Core error types for supervisor operations
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Stream limit reached ({limit} per owner)")]
    AdmissionRejected { limit: usize },

    #[error("Stream {0} not found")]
    NotFound(StreamId),

    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(String),

    #[error("Supervisor is shutting down")]
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_spawn_error_classification() {
        let missing = LaunchError::from_spawn("ffmpeg", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(missing, LaunchError::LauncherNotFound { ref path } if path == "ffmpeg"));

        let denied =
            LaunchError::from_spawn("ffmpeg", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(denied, LaunchError::LaunchFailed(_)));
    }

    #[test]
    fn test_error_display() {
        let error = SupervisorError::AdmissionRejected { limit: 2 };
        assert!(format!("{error}").contains("2 per owner"));

        let error = SupervisorError::NotFound(StreamId::from("stream_3"));
        assert_eq!(format!("{error}"), "Stream stream_3 not found");

        let error: SupervisorError = LaunchError::LaunchFailed(io::Error::other("boom")).into();
        assert!(format!("{error}").contains("Failed to start transcoder"));
    }
}
