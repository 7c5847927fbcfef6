//! Error types for bandsync-core

use thiserror::Error;

/// Result type alias using bandsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in bandsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// `SQLite` error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network or transport failure talking to the sync server
    #[error("Transport error: {0}")]
    Transport(String),

    /// Sync server answered with a non-success status
    #[error("Sync API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether re-running the same sync cycle later may succeed.
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_server_errors_are_retriable() {
        assert!(Error::Transport("connection reset".into()).is_retriable());
        assert!(Error::Api {
            status: 503,
            message: "unavailable".into()
        }
        .is_retriable());
        assert!(Error::Api {
            status: 429,
            message: "slow down".into()
        }
        .is_retriable());
    }

    #[test]
    fn client_errors_are_not_retriable() {
        assert!(!Error::Api {
            status: 400,
            message: "bad payload".into()
        }
        .is_retriable());
        assert!(!Error::InvalidInput("empty tenant".into()).is_retriable());
    }
}
