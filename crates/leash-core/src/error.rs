//! Core error types for Leash

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type returned by every service operation
///
/// Every variant is terminal for the call that produced it. Nothing in the
/// core retries; callers decide.
#[derive(Error, Debug)]
pub enum LeashError {
    /// No user with this name is registered
    #[error("'{0}' is invalid username")]
    UnknownUser(String),

    /// The stored hash exists but the password does not match it
    #[error("Password for user '{0}' is invalid")]
    InvalidCredentials(String),

    /// The user record has no password hash at all
    #[error("Password for user '{0}' not set")]
    NoPassword(String),

    /// The stored hash is not `scheme:digest` or names an unsupported scheme
    #[error("Password for user '{username}' has invalid format: {reason}")]
    MalformedHash { username: String, reason: String },

    /// Missing, unknown or insufficiently privileged token
    #[error("Access Denied: {0}")]
    AccessDenied(String),

    /// A user with this name already exists
    #[error("User '{0}' already exists")]
    UserExists(String),

    /// The configured or requested strategy is not registered
    #[error("Unknown execution strategy: {0}")]
    UnknownStrategy(String),

    /// The strategy ran but did not produce a usable result
    #[error("Execution failed: {message}")]
    ExecutionError {
        message: String,
        /// Raw combined output, if any was captured
        output: Option<String>,
        /// Exit status of the process, if one ran
        exit_code: Option<i32>,
    },

    /// The strategy did not finish within the configured bound
    #[error("Execution timed out after {0}s")]
    ExecutionTimeout(u64),

    /// The session cannot be used for execution
    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),

    /// Credential/session document could not be loaded or saved
    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] PersistenceError),

    /// Attempt to write a reserved key
    #[error("You can't store '{0}'")]
    ReservedKey(String),

    /// First-run configuration was already done
    #[error("You can't call this function, root already installed")]
    AlreadyInstalled,

    /// Malformed request (bad params, unknown method, unsupported value)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl LeashError {
    /// Build an execution error from a bare message
    pub fn execution(message: impl Into<String>) -> Self {
        LeashError::ExecutionError {
            message: message.into(),
            output: None,
            exit_code: None,
        }
    }

    /// Wire-level kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LeashError::UnknownUser(_) => ErrorKind::UnknownUser,
            LeashError::InvalidCredentials(_) => ErrorKind::InvalidCredentials,
            LeashError::NoPassword(_) => ErrorKind::NoPassword,
            LeashError::MalformedHash { .. } => ErrorKind::MalformedHash,
            LeashError::AccessDenied(_) => ErrorKind::AccessDenied,
            LeashError::UserExists(_) => ErrorKind::UserExists,
            LeashError::UnknownStrategy(_) => ErrorKind::UnknownStrategy,
            LeashError::ExecutionError { .. } => ErrorKind::ExecutionError,
            LeashError::ExecutionTimeout(_) => ErrorKind::ExecutionTimeout,
            LeashError::InvalidSessionState(_) => ErrorKind::InvalidSessionState,
            LeashError::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            LeashError::ReservedKey(_) => ErrorKind::ReservedKey,
            LeashError::AlreadyInstalled => ErrorKind::AlreadyInstalled,
            LeashError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            LeashError::Config(_) => ErrorKind::Config,
        }
    }
}

/// Serializable error kind, the `kind` field of an RPC error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownUser,
    InvalidCredentials,
    NoPassword,
    MalformedHash,
    AccessDenied,
    UserExists,
    UnknownStrategy,
    ExecutionError,
    ExecutionTimeout,
    InvalidSessionState,
    PersistenceFailure,
    ReservedKey,
    AlreadyInstalled,
    InvalidRequest,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Persistence-related errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Reading or writing the state document failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state document is not valid JSON for the expected shape
    #[error("Invalid state document: {0}")]
    Json(#[from] serde_json::Error),

    /// The save was cut off before it could finish
    #[error("Save interrupted: {0}")]
    Interrupted(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            LeashError::AccessDenied("Invalid Token".into()).kind(),
            ErrorKind::AccessDenied
        );
        assert_eq!(
            LeashError::execution("boom").kind(),
            ErrorKind::ExecutionError
        );
        assert_eq!(LeashError::ExecutionTimeout(5).kind(), ErrorKind::ExecutionTimeout);
    }

    #[test]
    fn test_kind_serializes_as_name() {
        let json = serde_json::to_string(&ErrorKind::UnknownStrategy).unwrap();
        assert_eq!(json, r#""UnknownStrategy""#);
        assert_eq!(ErrorKind::MalformedHash.to_string(), "MalformedHash");
    }

    #[test]
    fn test_messages() {
        let err = LeashError::UnknownUser("bob".into());
        assert_eq!(err.to_string(), "'bob' is invalid username");
        let err = LeashError::ReservedKey("password".into());
        assert_eq!(err.to_string(), "You can't store 'password'");
    }
}
