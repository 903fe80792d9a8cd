use thiserror::Error;

/// Errors that can arise while running or persisting the live world.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when a record or entity that must exist is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A stored field map lacks a field its kind declares.
    #[error("malformed record {key}: missing or invalid field '{field}'")]
    MalformedRecord { key: String, field: String },

    /// A persisted reference carries a kind tag with no registered loader.
    #[error("no loader registered for kind '{0}'")]
    UnknownKind(String),

    /// A life-stage table violates the ordinal sequence rules.
    #[error("invalid stage table: {0}")]
    InvalidStages(String),

    /// The room's action or broadcast channel no longer accepts work.
    #[error("room {0} is closed")]
    RoomClosed(u64),

    /// The world has been shut down.
    #[error("world is shut down")]
    ShutDown,
}

impl WorldError {
    pub(crate) fn malformed(key: impl Into<String>, field: impl Into<String>) -> Self {
        WorldError::MalformedRecord {
            key: key.into(),
            field: field.into(),
        }
    }
}
