use thiserror::Error;

/// Field tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    #[error("Authentication rejected")]
    AuthRejected,

    #[error("Background registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Storage(format!("Serialization failed: {}", err))
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only fs");
        match TrackerError::from(io) {
            TrackerError::Storage(msg) => assert!(msg.contains("read-only")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
