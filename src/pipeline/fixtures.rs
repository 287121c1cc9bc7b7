//! Helpers shared by pipeline and http tests

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::anyhow;

use crate::{
    config::Database,
    domain::{
        id::TrackId,
        track::{Chunk, TrackHeader},
    },
    storage::{ChunkStore, SqliteStore, error::StorageError},
};

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::default())
}

/// Deterministic, non repeating-per-chunk content
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 251) as u8).collect()
}

/// 8 kHz mono 16-bit PCM wav with `samples` samples of a sawtooth
pub fn wav(samples: usize) -> Vec<u8> {
    wav_with_info(samples, &[])
}

/// Same as [`wav`], with a LIST/INFO chunk carrying the given tags
pub fn wav_with_info(samples: usize, info: &[(&[u8; 4], &str)]) -> Vec<u8> {
    let mut fmt = Vec::new();
    fmt.extend_from_slice(&1u16.to_le_bytes()); // PCM
    fmt.extend_from_slice(&1u16.to_le_bytes()); // mono
    fmt.extend_from_slice(&8000u32.to_le_bytes());
    fmt.extend_from_slice(&16000u32.to_le_bytes());
    fmt.extend_from_slice(&2u16.to_le_bytes());
    fmt.extend_from_slice(&16u16.to_le_bytes());

    let data = (0..samples)
        .flat_map(|i| (((i % 64) as i16 - 32) * 512).to_le_bytes())
        .collect::<Vec<u8>>();

    let mut body = b"WAVE".to_vec();
    push_chunk(&mut body, b"fmt ", &fmt);

    if !info.is_empty() {
        let mut list = b"INFO".to_vec();
        for (id, value) in info {
            let mut text = value.as_bytes().to_vec();
            text.push(0);
            push_chunk(&mut list, id, &text);
        }
        push_chunk(&mut body, b"LIST", &list);
    }

    push_chunk(&mut body, b"data", &data);

    let mut riff = b"RIFF".to_vec();
    riff.extend_from_slice(&(body.len() as u32).to_le_bytes());
    riff.extend_from_slice(&body);
    riff
}

fn push_chunk(into: &mut Vec<u8>, id: &[u8; 4], payload: &[u8]) {
    into.extend_from_slice(id);
    into.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    into.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        into.push(0);
    }
}

/// Wraps an in-memory store, counting chunk reads and injecting failures
#[derive(Default)]
pub struct FaultyStore {
    pub inner: SqliteStore,
    pub header_reads: AtomicUsize,
    pub chunk_reads: AtomicUsize,
    chunk_writes: AtomicUsize,
    fail_put_chunk_after: Option<usize>,
    fail_put_header: bool,
    fail_chunk_read_at: Option<u32>,
}

impl Default for SqliteStore {
    fn default() -> Self {
        let config = Database {
            in_memory: true,
            path: None,
        };
        SqliteStore::open(&config).expect("in-memory store")
    }
}

impl FaultyStore {
    pub fn failing_put_chunk_after(successful: usize) -> Self {
        Self {
            fail_put_chunk_after: Some(successful),
            ..Default::default()
        }
    }

    pub fn failing_put_header() -> Self {
        Self {
            fail_put_header: true,
            ..Default::default()
        }
    }

    pub fn failing_chunk_read_at(n: u32) -> Self {
        Self {
            fail_chunk_read_at: Some(n),
            ..Default::default()
        }
    }

    pub fn stored_chunks(&self) -> Result<usize, StorageError> {
        self.inner.chunk_total()
    }
}

impl ChunkStore for FaultyStore {
    fn put_chunk(&self, owner: &TrackId, n: u32, data: &[u8]) -> Result<(), StorageError> {
        let written = self.chunk_writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_put_chunk_after.is_some_and(|limit| written >= limit) {
            return Err(StorageError::Internal(anyhow!("injected chunk write failure")));
        }
        self.inner.put_chunk(owner, n, data)
    }

    fn put_header(&self, header: &TrackHeader) -> Result<(), StorageError> {
        if self.fail_put_header {
            return Err(StorageError::Internal(anyhow!("injected header write failure")));
        }
        self.inner.put_header(header)
    }

    fn header(&self, id: &TrackId) -> Result<Option<TrackHeader>, StorageError> {
        self.header_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.header(id)
    }

    fn chunk(&self, owner: &TrackId, n: u32) -> Result<Option<Chunk>, StorageError> {
        self.chunk_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_chunk_read_at == Some(n) {
            return Err(StorageError::Internal(anyhow!("injected chunk read failure")));
        }
        self.inner.chunk(owner, n)
    }

    fn headers(&self) -> Result<Vec<TrackHeader>, StorageError> {
        self.inner.headers()
    }

    fn delete_chunks(&self, owner: &TrackId) -> Result<usize, StorageError> {
        self.inner.delete_chunks(owner)
    }
}
