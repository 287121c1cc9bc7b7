//! Ordered chunk reads from the store into an output sink

use std::{
    io::{self, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use log::debug;
use thiserror::Error;

use crate::{
    domain::{id::TrackId, track::TrackHeader},
    pipeline::error::PipelineError,
    storage::{ChunkStore, error::StorageError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Opening,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { bytes: u64 },
    /// the sink went away or the token was cancelled; no further chunks were read
    Cancelled { bytes: u64 },
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("chunk {n} is missing")]
    MissingChunk { n: u32 },

    #[error("chunk {n} holds {actual} bytes, expected {expected}")]
    ChunkSize {
        n: u32,
        expected: usize,
        actual: usize,
    },

    #[error("content checksum {actual} does not match recorded {expected}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("chunk read failed: {0}")]
    Store(#[from] StorageError),

    #[error("output write failed: {0}")]
    Sink(#[from] io::Error),
}

/// Cooperative cancellation flag shared between a stream and whoever consumes it
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resolves tracks to their chunk sequence.
#[derive(Clone)]
pub struct ChunkStreamer {
    store: Arc<dyn ChunkStore>,
}

impl ChunkStreamer {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }

    /// Looks up the header. Nothing has been emitted when this fails,
    /// so the caller can still answer with a clean error.
    pub fn open(&self, id: &TrackId) -> Result<TrackStream, PipelineError> {
        let header = self
            .store
            .header(id)?
            .ok_or(PipelineError::NotFound(*id))?;

        debug!(
            "opened track {id}: {} bytes in {} chunks",
            header.length,
            header.chunk_count()
        );

        Ok(TrackStream {
            store: Arc::clone(&self.store),
            header,
            state: StreamState::Opening,
        })
    }
}

pub struct TrackStream {
    store: Arc<dyn ChunkStore>,
    header: TrackHeader,
    state: StreamState,
}

impl TrackStream {
    pub fn header(&self) -> &TrackHeader {
        &self.header
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Forwards every chunk, in order, to `sink` as soon as it is read.
    ///
    /// The token is checked before each chunk read. A sink that reports a broken
    /// connection counts as cancellation, not failure.
    pub fn pump<W: Write>(
        &mut self,
        sink: &mut W,
        cancel: &CancelToken,
    ) -> Result<StreamOutcome, StreamError> {
        self.state = StreamState::Streaming;

        let result = self.forward(sink, cancel);
        self.state = match &result {
            Ok(StreamOutcome::Completed { .. }) => StreamState::Completed,
            Ok(StreamOutcome::Cancelled { .. }) => StreamState::Cancelled,
            Err(_) => StreamState::Failed,
        };
        result
    }

    fn forward<W: Write>(
        &self,
        sink: &mut W,
        cancel: &CancelToken,
    ) -> Result<StreamOutcome, StreamError> {
        let id = self.header.id;
        let mut hasher = blake3::Hasher::new();
        let mut sent = 0u64;

        for n in 0..self.header.chunk_count() {
            if cancel.is_cancelled() {
                return Ok(StreamOutcome::Cancelled { bytes: sent });
            }

            let chunk = self
                .store
                .chunk(&id, n)?
                .ok_or(StreamError::MissingChunk { n })?;

            let expected = self.header.expected_chunk_len(n);
            if chunk.data.len() != expected {
                return Err(StreamError::ChunkSize {
                    n,
                    expected,
                    actual: chunk.data.len(),
                });
            }

            match sink.write_all(&chunk.data) {
                Ok(()) => {}
                Err(e) if is_disconnect(&e) => {
                    cancel.cancel();
                    return Ok(StreamOutcome::Cancelled { bytes: sent });
                }
                Err(e) => return Err(e.into()),
            }

            hasher.update(&chunk.data);
            sent += chunk.data.len() as u64;
        }

        let actual = hasher.finalize().to_hex().to_string();
        if actual != self.header.checksum {
            return Err(StreamError::ChecksumMismatch {
                expected: self.header.checksum.clone(),
                actual,
            });
        }

        match sink.flush() {
            Ok(()) => Ok(StreamOutcome::Completed { bytes: sent }),
            Err(e) if is_disconnect(&e) => Ok(StreamOutcome::Cancelled { bytes: sent }),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}
