//! Error types for the live voice tutor

use thiserror::Error;

/// Result type alias for tutor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the live voice tutor
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone access refused or no usable input device
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No API key available from settings or environment
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// Streaming connection failed or broke after opening
    #[error("transport error: {0}")]
    Transport(String),

    /// A single inbound audio payload could not be decoded
    #[error("malformed audio: {0}")]
    MalformedAudio(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Message shown to the user when a session fails
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied(_) => "Failed to access microphone or connect.".to_string(),
            Self::MissingCredential(_) => {
                "No API key configured. Run `tutor set-key` or set GEMINI_API_KEY.".to_string()
            }
            Self::Transport(_) => "Connection error occurred.".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let err = Error::PermissionDenied("denied".to_string());
        assert_eq!(err.user_message(), "Failed to access microphone or connect.");

        let err = Error::Transport("reset".to_string());
        assert_eq!(err.user_message(), "Connection error occurred.");

        let err = Error::Config("bad".to_string());
        assert_eq!(err.user_message(), "configuration error: bad");
    }
}
