//! Common error types for Vinylia

use thiserror::Error;

/// Common result type for Vinylia operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the Vinylia client crates
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No active session, or the backend refused the session's token
    #[error("Not authenticated")]
    Unauthenticated,

    /// Request never produced a response (connect, timeout, body read)
    #[error("Network error: {0}")]
    NetworkFailure(String),

    /// Backend answered with a non-success status
    #[error("Remote rejected request ({status}): {message}")]
    RemoteRejected {
        /// HTTP status code returned by the backend
        status: u16,
        /// Backend error message or body
        message: String,
    },

    /// Record already exists (unique constraint)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A mutation was issued against state that is pending or out of date
    #[error("Stale mutation: {0}")]
    StaleMutation(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error
    #[error("IO error: {0}")]
    Io(String),

    /// Response or config body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Whether the user can simply try the action again
    ///
    /// Network and backend failures are transient; a stale mutation resolves
    /// itself once the in-flight call settles. Auth and config errors need
    /// intervention first.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NetworkFailure(_) | Error::RemoteRejected { .. } | Error::StaleMutation(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::NetworkFailure("timeout".into()).is_recoverable());
        assert!(Error::RemoteRejected { status: 500, message: "boom".into() }.is_recoverable());
        assert!(Error::StaleMutation("s1".into()).is_recoverable());
        assert!(!Error::Unauthenticated.is_recoverable());
        assert!(!Error::Config("missing url".into()).is_recoverable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "config.toml");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(ref msg) if msg.contains("config.toml")));
    }
}
