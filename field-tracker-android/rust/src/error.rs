use field_tracker_rs::TrackerError;
use jni::JNIEnv;
use thiserror::Error;

/// Errors surfaced across the JNI boundary
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("Tracker not initialized; call init() first")]
    NotInitialized,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("JNI error: {0}")]
    JniError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for JNI operations
pub type JResult<T> = Result<T, BridgeError>;

fn exception_class(error: &BridgeError) -> &'static str {
    match error {
        BridgeError::NotInitialized => "java/lang/IllegalStateException",
        BridgeError::InvalidParameters(_) | BridgeError::Tracker(TrackerError::Config(_)) => {
            "java/lang/IllegalArgumentException"
        }
        BridgeError::Tracker(TrackerError::PermissionDenied) => "java/lang/SecurityException",
        BridgeError::Tracker(TrackerError::Storage(_))
        | BridgeError::Tracker(TrackerError::NetworkUnavailable(_)) => "java/io/IOException",
        BridgeError::Tracker(_) | BridgeError::JniError(_) | BridgeError::Internal(_) => {
            "java/lang/RuntimeException"
        }
    }
}

/// Throw Java exception from Rust error
pub fn throw_java_exception(env: &mut JNIEnv, error: &BridgeError) -> JResult<()> {
    let message = error.to_string();
    env.throw_new(exception_class(error), message)
        .map_err(|_| BridgeError::JniError("Failed to throw exception".to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_mapping() {
        assert_eq!(
            exception_class(&BridgeError::NotInitialized),
            "java/lang/IllegalStateException"
        );
        assert_eq!(
            exception_class(&TrackerError::Config("bad".into()).into()),
            "java/lang/IllegalArgumentException"
        );
        assert_eq!(
            exception_class(&TrackerError::Storage("disk full".into()).into()),
            "java/io/IOException"
        );
        assert_eq!(
            exception_class(&TrackerError::PermissionDenied.into()),
            "java/lang/SecurityException"
        );
        assert_eq!(
            exception_class(&TrackerError::AuthRejected.into()),
            "java/lang/RuntimeException"
        );
    }

    #[test]
    fn test_tracker_message_passes_through() {
        let err: BridgeError = TrackerError::ServerError(502).into();
        assert_eq!(err.to_string(), TrackerError::ServerError(502).to_string());
    }
}
