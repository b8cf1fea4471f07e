//! Error types for the synchronization engine
//!
//! Nothing in here is fatal to the process. Remote failures are classified so
//! callers can decide between notifying operators, skipping a broken
//! configuration, or waiting for the next cycle.

use poise::serenity_prelude::{GuildId, UserId};
use thiserror::Error;

/// Failure of a remote platform operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The bot lacks a required capability
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The referenced member, role, channel or ban no longer exists
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limits, timeouts and server-side failures
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Platform error: {0}")]
    Other(String),
}

impl PlatformError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Failure reading or writing persisted tables
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A stored table exists but cannot be parsed
    #[error("Could not parse {path}: {source}")]
    Corrupt {
        path: std::path::PathBuf,
        source: serde_yaml::Error,
    },
}

/// Errors raised by engine tasks
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A bounded wait on a remote call expired
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Guild {0} is not cached")]
    GuildNotCached(GuildId),

    #[error("Member {1} of guild {0} is not cached")]
    MemberNotCached(GuildId, UserId),

    /// An operator request that cannot be applied as given
    #[error("{0}")]
    InvalidConfig(String),

    #[error("Engine error: {0}")]
    Other(String),
}

impl From<String> for EngineError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = EngineError::GuildNotCached(GuildId::new(42));
        assert_eq!(error.to_string(), "Guild 42 is not cached");

        let error = EngineError::Timeout("ban list");
        assert_eq!(error.to_string(), "Timed out waiting for ban list");

        let error = EngineError::from(PlatformError::PermissionDenied("ban".to_string()));
        assert_eq!(error.to_string(), "Permission denied: ban");

        let error = EngineError::from("Something went wrong".to_string());
        assert_eq!(error.to_string(), "Engine error: Something went wrong");
    }

    #[test]
    fn test_not_found_classification() {
        assert!(PlatformError::NotFound("member".to_string()).is_not_found());
        assert!(!PlatformError::Transient("429".to_string()).is_not_found());
    }
}
