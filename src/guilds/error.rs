//! Error types for guild state persistence.

use thiserror::Error;

/// Errors that can occur while loading or saving guild state
#[derive(Debug, Error)]
pub enum GuildDataError {
    /// Guild state could not be serialized or deserialized
    #[error("Guild state serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// Underlying storage I/O failed
    #[error("Guild storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for guild state persistence
pub type GuildDataResult<T> = Result<T, GuildDataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = GuildDataError::from(std::io::Error::other("disk unplugged"));
        assert!(error.to_string().contains("I/O error"));
        assert!(error.to_string().contains("disk unplugged"));
    }
}
