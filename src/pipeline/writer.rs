use std::{
    io::{ErrorKind, Read},
    sync::Arc,
};

use anyhow::anyhow;
use chrono::Utc;
use log::{debug, error, info, warn};

use crate::{
    domain::{
        id::TrackId,
        track::{TagMap, TrackHeader},
    },
    storage::{ChunkStore, error::StorageError},
};

/// Splits content into fixed size chunks and persists them as a new track.
pub struct ChunkWriter {
    store: Arc<dyn ChunkStore>,
    chunk_size: u32,
}

struct Written {
    length: u64,
    chunks: u32,
    checksum: blake3::Hash,
}

impl ChunkWriter {
    pub fn new(store: Arc<dyn ChunkStore>, chunk_size: u32) -> Self {
        Self { store, chunk_size }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Writes `source` chunk by chunk, then the header.
    ///
    /// Only one chunk is held in memory at a time and each one is handed to the
    /// store before the next is read. The header goes last, so readers never see
    /// a track whose chunks are incomplete. On failure every chunk already
    /// written for the new id is removed (best effort).
    pub fn write<R: Read>(
        &self,
        mut source: R,
        name: &str,
        metadata: TagMap,
    ) -> Result<TrackHeader, StorageError> {
        let id = TrackId::generate();

        let result = self.write_chunks(&id, &mut source).and_then(|written| {
            let header = TrackHeader {
                id,
                name: name.to_string(),
                length: written.length,
                chunk_size: self.chunk_size,
                metadata,
                upload_date: Utc::now(),
                checksum: written.checksum.to_hex().to_string(),
            };
            self.store.put_header(&header)?;
            info!(
                "stored track {id} '{name}': {} bytes in {} chunks",
                written.length, written.chunks
            );
            Ok(header)
        });

        if let Err(e) = &result {
            warn!("writing track {id} failed: {e}");
            self.remove_orphans(&id);
        }
        result
    }

    fn write_chunks<R: Read>(&self, id: &TrackId, source: &mut R) -> Result<Written, StorageError> {
        if self.chunk_size == 0 {
            return Err(StorageError::Internal(anyhow!("chunk size must be positive")));
        }

        let mut buf = vec![0u8; self.chunk_size as usize];
        let mut hasher = blake3::Hasher::new();
        let mut length = 0u64;
        let mut n = 0u32;

        loop {
            let filled = fill(source, &mut buf).map_err(|e| {
                StorageError::Internal(anyhow!(e).context("failed to read track content"))
            })?;
            if filled == 0 {
                break;
            }

            let payload = &buf[..filled];
            self.store.put_chunk(id, n, payload)?;
            debug!("track {id}: wrote chunk {n} ({filled} bytes)");

            hasher.update(payload);
            length += filled as u64;
            n += 1;

            if filled < buf.len() {
                break;
            }
        }

        Ok(Written {
            length,
            chunks: n,
            checksum: hasher.finalize(),
        })
    }

    fn remove_orphans(&self, id: &TrackId) {
        match self.store.delete_chunks(id) {
            Ok(0) => {}
            Ok(removed) => info!("removed {removed} orphaned chunks of track {id}"),
            Err(e) => error!("could not remove orphaned chunks of track {id}: {e}"),
        }
    }
}

/// Reads until `buf` is full or the source is exhausted
fn fill<R: Read>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
