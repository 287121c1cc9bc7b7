use thiserror::Error;

use crate::domain::id::TrackId;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("header of track {id} is unreadable: {reason}")]
    CorruptHeader { id: String, reason: String },

    #[error("track {0} already exists")]
    DuplicateTrack(TrackId),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
