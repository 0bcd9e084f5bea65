//! Task-Sharding Coordination Error Hierarchy
//!
//! Defines error types for the sharding subsystem, categorized by
//! protocol layer and operational concerns. Watch loops classify
//! coordination failures through [`CoordinationError::is_recoverable`]
//! to decide between retry-with-backoff and propagation.

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Coordination-service session and protocol failures
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// Task-table storage failures
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Dispatch and worker-pool failures
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Unrecoverable failures requiring external supervision
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    /// TCP connect to the coordination service failed
    #[error("Failed to connect to coordination service at {0}")]
    ConnectError(String),

    /// Connect did not complete within the configured timeout
    #[error("Connection to {endpoint} timed out after {timeout_ms}ms")]
    ConnectTimeout { endpoint: String, timeout_ms: u64 },

    /// Session was torn down mid-operation
    #[error("Coordination session connection closed")]
    ConnectionClosed,

    /// Session lease expired on the server side
    #[error("Coordination session expired")]
    SessionExpired,

    /// Operation issued before `connect()` established a session
    #[error("Not connected to coordination service")]
    NotConnected,

    /// Target node does not exist
    #[error("No node at path: {0}")]
    NoNode(String),

    /// Create issued for an existing path
    #[error("Node already exists at path: {0}")]
    NodeExists(String),

    /// Operation requires authentication
    #[error("Authorization required")]
    AuthRequired,

    /// Re-authentication attempt rejected
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Malformed or unexpected frame on the wire
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Frame serialization failures
    #[error("Frame codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Socket-level failures
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoordinationError {
    /// Whether a watch loop should backoff and retry instead of
    /// surfacing the error. Session loss and not-yet-provisioned paths
    /// are never fatal inside a watch loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoordinationError::ConnectionClosed
                | CoordinationError::SessionExpired
                | CoordinationError::NotConnected
                | CoordinationError::NoNode(_)
                | CoordinationError::ConnectError(_)
                | CoordinationError::ConnectTimeout { .. }
                | CoordinationError::Io(_)
        )
    }

    /// Session-level losses that warrant a reconnect attempt before the
    /// next retry. `NoNode` is recoverable but needs no reconnect.
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            CoordinationError::ConnectionClosed
                | CoordinationError::SessionExpired
                | CoordinationError::NotConnected
                | CoordinationError::Io(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// Serialization failures for persisted task rows
    #[error(transparent)]
    BincodeError(#[from] bincode::Error),

    /// Key conversion failures
    #[error("Value convert failed")]
    Convert(#[from] ConvertError),

    /// Disk I/O failures
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Error type for key conversion operations
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// The stored key does not hold a big-endian `u64`
    #[error("invalid byte length: expected 8 bytes, received {0} bytes")]
    InvalidLength(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Background loop terminated abnormally
    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    /// Per-task synchronization action failure, isolated by the worker
    #[error("Sync action failed for task {task_id}: {message}")]
    ActionFailed { task_id: u64, message: String },
}

// ============== Conversion Implementations ============== //

impl From<ConvertError> for Error {
    fn from(e: ConvertError) -> Self {
        Error::Storage(StorageError::Convert(e))
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        StorageError::DbError(err.to_string()).into()
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::DbError(err.to_string())
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        DispatchError::TaskFailed(err).into()
    }
}
