use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use log::debug;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use crate::{
    config,
    domain::{
        id::TrackId,
        track::{Chunk, TagMap, TrackHeader},
    },
    storage::{
        db::{self, datetime_to_millis, millis_to_datetime},
        error::StorageError,
        schema::{columns::*, tables::*},
    },
};

/// Chunked object store the pipelines are built on.
///
/// Implementations must be safe for concurrent use: one instance is shared by
/// every in-flight upload and download.
pub trait ChunkStore: Send + Sync {
    fn put_chunk(&self, owner: &TrackId, n: u32, data: &[u8]) -> Result<(), StorageError>;

    /// Makes a track visible to readers. Called once all of its chunks are written.
    fn put_header(&self, header: &TrackHeader) -> Result<(), StorageError>;

    fn header(&self, id: &TrackId) -> Result<Option<TrackHeader>, StorageError>;

    fn chunk(&self, owner: &TrackId, n: u32) -> Result<Option<Chunk>, StorageError>;

    /// All headers, in the order they were written
    fn headers(&self) -> Result<Vec<TrackHeader>, StorageError>;

    /// Removes every chunk of `owner`, returns how many were removed
    fn delete_chunks(&self, owner: &TrackId) -> Result<usize, StorageError>;
}

/// SQLite backed [`ChunkStore`] laid out like a GridFS bucket:
/// one table of headers, one table of numbered chunks.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

struct HeaderRow {
    id: String,
    filename: String,
    length: i64,
    chunk_size: i64,
    upload_date: i64,
    metadata: String,
    checksum: String,
}

impl HeaderRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            filename: row.get(1)?,
            length: row.get(2)?,
            chunk_size: row.get(3)?,
            upload_date: row.get(4)?,
            metadata: row.get(5)?,
            checksum: row.get(6)?,
        })
    }

    fn into_header(self) -> Result<TrackHeader, StorageError> {
        let corrupt = |reason: String| StorageError::CorruptHeader {
            id: self.id.clone(),
            reason,
        };

        let id = TrackId::from_hex(&self.id).map_err(|e| corrupt(e.to_string()))?;
        let length = u64::try_from(self.length).map_err(|e| corrupt(e.to_string()))?;
        let chunk_size = u32::try_from(self.chunk_size).map_err(|e| corrupt(e.to_string()))?;
        let upload_date = millis_to_datetime(self.upload_date).map_err(|e| corrupt(e.to_string()))?;
        let metadata: TagMap =
            serde_json::from_str(&self.metadata).map_err(|e| corrupt(e.to_string()))?;

        Ok(TrackHeader {
            id,
            name: self.filename,
            length,
            chunk_size,
            metadata,
            upload_date,
            checksum: self.checksum,
        })
    }
}

impl SqliteStore {
    pub fn open(config: &config::Database) -> Result<Self, StorageError> {
        Ok(Self::from_existing_conn(db::open(config)?))
    }

    pub fn from_existing_conn(db: Connection) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn close(self) -> Result<(), StorageError> {
        let conn = self
            .db
            .into_inner()
            .map_err(|e| StorageError::Internal(anyhow!("chunk store lock poisoned: {e}")))?;
        conn.close().map_err(|(_, e)| StorageError::Database(e))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.db.lock().map_err(|e| {
            StorageError::Internal(anyhow!("could not access chunk store under lock: {e}"))
        })
    }

    /// (n, payload length) of every chunk stored for `owner`, ordered by n
    #[cfg(test)]
    pub(crate) fn chunk_layout(&self, owner: &TrackId) -> Result<Vec<(u32, usize)>, StorageError> {
        let db = self.lock()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {N}, length({DATA}) FROM {CHUNKS} WHERE {FILES_ID} = ?1 ORDER BY {N}"
        ))?;
        let layout = stmt
            .query_map(params![owner.to_hex()], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(layout)
    }

    #[cfg(test)]
    pub(crate) fn chunk_total(&self) -> Result<usize, StorageError> {
        let total: i64 =
            self.lock()?
                .query_row(&format!("SELECT COUNT(*) FROM {CHUNKS}"), [], |row| row.get(0))?;
        Ok(total as usize)
    }

    #[cfg(test)]
    pub(crate) fn execute(&self, sql: &str) -> Result<usize, StorageError> {
        Ok(self.lock()?.execute(sql, [])?)
    }
}

impl ChunkStore for SqliteStore {
    fn put_chunk(&self, owner: &TrackId, n: u32, data: &[u8]) -> Result<(), StorageError> {
        self.lock()?.execute(
            &format!("INSERT INTO {CHUNKS} ({FILES_ID}, {N}, {DATA}) VALUES (?1, ?2, ?3)"),
            params![owner.to_hex(), n, data],
        )?;
        Ok(())
    }

    fn put_header(&self, header: &TrackHeader) -> Result<(), StorageError> {
        let length = i64::try_from(header.length)
            .map_err(|e| StorageError::Internal(anyhow!("track length out of range: {e}")))?;
        let metadata = serde_json::to_string(&header.metadata)?;

        let inserted = self.lock()?.execute(
            &format!(
                "INSERT INTO {FILES} ({ID}, {FILENAME}, {LENGTH}, {CHUNK_SIZE}, {UPLOAD_DATE}, {METADATA}, {CHECKSUM}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                header.id.to_hex(),
                header.name,
                length,
                header.chunk_size,
                datetime_to_millis(header.upload_date),
                metadata,
                header.checksum,
            ],
        );

        match inserted {
            Ok(_) => {
                debug!("header written for track {}", header.id);
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StorageError::DuplicateTrack(header.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn header(&self, id: &TrackId) -> Result<Option<TrackHeader>, StorageError> {
        let row = self
            .lock()?
            .query_row(
                &format!(
                    "SELECT {ID}, {FILENAME}, {LENGTH}, {CHUNK_SIZE}, {UPLOAD_DATE}, {METADATA}, {CHECKSUM} \
                     FROM {FILES} WHERE {ID} = ?1"
                ),
                params![id.to_hex()],
                HeaderRow::from_row,
            )
            .optional()?;

        row.map(HeaderRow::into_header).transpose()
    }

    fn chunk(&self, owner: &TrackId, n: u32) -> Result<Option<Chunk>, StorageError> {
        let data: Option<Vec<u8>> = self
            .lock()?
            .query_row(
                &format!("SELECT {DATA} FROM {CHUNKS} WHERE {FILES_ID} = ?1 AND {N} = ?2"),
                params![owner.to_hex(), n],
                |row| row.get(0),
            )
            .optional()?;

        Ok(data.map(|data| Chunk {
            owner: *owner,
            n,
            data,
        }))
    }

    fn headers(&self) -> Result<Vec<TrackHeader>, StorageError> {
        let rows = {
            let db = self.lock()?;
            let mut stmt = db.prepare(&format!(
                "SELECT {ID}, {FILENAME}, {LENGTH}, {CHUNK_SIZE}, {UPLOAD_DATE}, {METADATA}, {CHECKSUM} \
                 FROM {FILES} ORDER BY rowid"
            ))?;
            let rows = stmt
                .query_map([], HeaderRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter().map(HeaderRow::into_header).collect()
    }

    fn delete_chunks(&self, owner: &TrackId) -> Result<usize, StorageError> {
        let removed = self.lock()?.execute(
            &format!("DELETE FROM {CHUNKS} WHERE {FILES_ID} = ?1"),
            params![owner.to_hex()],
        )?;
        Ok(removed)
    }
}
