use thiserror::Error;

use crate::{
    domain::id::{InvalidTrackId, TrackId},
    pipeline::{metadata::ExtractionError, reader::StreamError},
    storage::error::StorageError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// malformed request: bad id, missing field, oversized body
    Validation,
    /// the uploaded bytes are not audio we can read tags from
    Extraction,
    NotFound,
    /// the chunk store rejected a read or a write
    UpstreamStore,
    /// a download failed after bytes were already sent
    StreamTermination,
}

/// Every failure a pipeline reports to its caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),

    #[error("malformed audio content: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("track {0} not found")]
    NotFound(TrackId),

    #[error("chunk store failure: {0}")]
    UpstreamStore(#[from] StorageError),

    #[error("stream of track {id} terminated: {cause}")]
    StreamTermination {
        id: TrackId,
        #[source]
        cause: StreamError,
    },
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::Extraction(_) => ErrorKind::Extraction,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::UpstreamStore(_) => ErrorKind::UpstreamStore,
            PipelineError::StreamTermination { .. } => ErrorKind::StreamTermination,
        }
    }
}

impl From<InvalidTrackId> for PipelineError {
    fn from(err: InvalidTrackId) -> Self {
        PipelineError::Validation(err.to_string())
    }
}
