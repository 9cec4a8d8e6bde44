// Error types for the moderation engine.

use thiserror::Error;

use super::moderation_store::StoreError;
use super::platform::PlatformError;

#[derive(Debug, Error)]
pub enum ModerationError {
    /// Invalid threshold, action or detector definition. Rejected at write time.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The state store is unreachable; callers should report moderation as unavailable.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Platform action failed: {0}")]
    Platform(#[from] PlatformError),

    #[error("Revocation failed: {0}")]
    Revocation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moderation_error_messages_are_descriptive() {
        let err = ModerationError::Config("duplicate threshold 5".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: duplicate threshold 5"
        );

        let err = ModerationError::from(StoreError::Unavailable("db locked".into()));
        assert!(err.to_string().contains("db locked"));
    }
}
