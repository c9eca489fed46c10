//! Snapshot store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    /// Another process holds the group's database. This is the per-group
    /// run lock, so callers must not retry or work around it.
    #[error("state is locked by another run: {0}")]
    Locked(String),

    /// The database file exists but is not a readable redb file.
    #[error("state file is damaged: {0}")]
    Corrupt(String),

    /// Any other failure to open or create the database.
    #[error("cannot open state: {0}")]
    Open(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("snapshot table unavailable: {0}")]
    Table(String),

    #[error("snapshot read failed: {0}")]
    Read(String),

    #[error("snapshot write failed: {0}")]
    Write(String),

    #[error("cannot encode snapshot: {0}")]
    Serialize(String),

    #[error("cannot decode snapshot: {0}")]
    Deserialize(String),
}

impl From<redb::DatabaseError> for StateError {
    fn from(e: redb::DatabaseError) -> Self {
        use redb::{DatabaseError, StorageError};
        use std::io::ErrorKind;

        match &e {
            DatabaseError::DatabaseAlreadyOpen => StateError::Locked(e.to_string()),
            DatabaseError::Storage(StorageError::Corrupted(_)) => StateError::Corrupt(e.to_string()),
            DatabaseError::Storage(StorageError::Io(io))
                if matches!(io.kind(), ErrorKind::InvalidData | ErrorKind::UnexpectedEof) =>
            {
                StateError::Corrupt(e.to_string())
            }
            _ => StateError::Open(e.to_string()),
        }
    }
}
