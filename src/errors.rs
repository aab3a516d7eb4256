//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// A channel transport (Signal daemon, Slack socket mode) failed to
    /// send or receive. Whether this is transient or permanent is a
    /// property of the channel's own retry state, not of the error itself.
    Transport(String),
    /// A worker process failed to spawn, emit its ready signal, or produce
    /// a well-formed event stream.
    Worker(String),
    /// A tool request's JSON body failed schema or business-rule validation.
    ToolValidation(String),
    /// A tool request file could not be parsed as JSON. Left on disk for
    /// operator inspection rather than unlinked, unlike every other
    /// handler failure.
    IpcCorruption(String),
    /// An external bridge (mail relay, bookmark HTTP service) is reachable
    /// but refusing requests.
    BridgeOutage(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Caller is not authorized to perform the requested action.
    Unauthorized(String),
    /// The requested mutation conflicts with existing state.
    Conflict(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Worker(msg) => write!(f, "worker: {msg}"),
            Self::ToolValidation(msg) => write!(f, "tool validation: {msg}"),
            Self::IpcCorruption(msg) => write!(f, "ipc corruption: {msg}"),
            Self::BridgeOutage(msg) => write!(f, "bridge outage: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::ToolValidation(err.to_string())
    }
}
