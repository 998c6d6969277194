use std::time::Duration;

use thiserror::Error;

use crate::domain::envelope::HandlerKey;

/// Common error types for the agent core
#[derive(Error, Debug, Clone)]
pub enum FlowError {
    /// An envelope arrived whose key matched no registered entry
    #[error("no handler registered for {key} (message '{name}')")]
    UnhandledMessage { key: HandlerKey, name: String },

    /// A registered listener failed while processing an envelope
    #[error("handler for {key} failed on '{name}': {reason}")]
    CallbackFailure { key: HandlerKey, name: String, reason: String },

    /// A pending step exceeded its deadline
    #[error("no reply on {key} after {after:?}")]
    Timeout { key: HandlerKey, after: Duration },

    /// A pending step was cancelled before a reply arrived
    #[error("wait on {key} was cancelled")]
    Cancelled { key: HandlerKey },

    /// A reply arrived on the expected key but with another message name
    #[error("expected '{expected}' on {key}, got '{actual}'")]
    UnexpectedMessage { key: HandlerKey, expected: String, actual: String },

    /// The remote agent answered with a problem report
    #[error("problem report on {key}: {description}")]
    ProblemReport { key: HandlerKey, description: String },

    /// Inbound frame could not be turned into an envelope
    #[error("{0}")]
    Decode(String),

    /// Outbound delivery errors
    #[error("{0}")]
    Transport(String),

    /// Configuration related errors
    #[error("{0}")]
    Configuration(String),

    /// File system related errors
    #[error("{0}")]
    FileSystem(String),

    /// Serialization/deserialization errors
    #[error("{0}")]
    Serialization(String),

    /// Spawn errors
    #[error("{0}")]
    Spawn(String),

    /// Generic errors with context
    #[error("{0}")]
    Generic(String)
}

impl FlowError {
    /// The routing key this error refers to, if any
    pub fn key(&self) -> Option<&HandlerKey> {
        match self {
            FlowError::UnhandledMessage { key, .. }
            | FlowError::CallbackFailure { key, .. }
            | FlowError::Timeout { key, .. }
            | FlowError::Cancelled { key }
            | FlowError::UnexpectedMessage { key, .. }
            | FlowError::ProblemReport { key, .. } => Some(key),
            _ => None
        }
    }

    pub fn is_unhandled(&self) -> bool {
        matches!(self, FlowError::UnhandledMessage { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FlowError::Timeout { .. })
    }
}

/// Convert from anyhow::Error
impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        FlowError::Generic(err.to_string())
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        FlowError::FileSystem(err.to_string())
    }
}

/// Convert from serde_yaml::Error
impl From<serde_yaml::Error> for FlowError {
    fn from(err: serde_yaml::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}

/// Convert from serde_json::Error
impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Serialization(err.to_string())
    }
}

/// Convert from ractor::SpawnErr
impl From<ractor::SpawnErr> for FlowError {
    fn from(err: ractor::SpawnErr) -> Self {
        FlowError::Spawn(err.to_string())
    }
}
