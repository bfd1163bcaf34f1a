use thiserror::Error;

/// Errors surfaced by the store adapter and the feed runtime.
///
/// Malformed records and failed read write-backs never show up here: the
/// former degrade through defaults, the latter are logged and dropped.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("Invalid store path: {path:?}")]
    InvalidPath { path: String },
    #[error("Node at {path} is not a number")]
    NotANumber { path: String },
    #[error("Write rejected at {path}")]
    WriteRejected { path: String },
    #[error("No usable profile for user {user_id}")]
    ProfileMissing { user_id: String },
    #[error("Config error: {message}")]
    Config { message: String },
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PortalError>;
