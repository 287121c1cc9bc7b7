use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::id::TrackId;

/// Audio tags extracted at upload time, tag name -> value
pub type TagMap = BTreeMap<String, String>;

/// Header record of a stored track. Never carries chunk payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackHeader {
    pub id: TrackId,
    pub name: String,
    /// total byte size, sum of all chunk lengths
    pub length: u64,
    pub chunk_size: u32,
    pub metadata: TagMap,
    pub upload_date: DateTime<Utc>,
    /// blake3 digest of the whole content, hex encoded
    pub checksum: String,
}

impl TrackHeader {
    pub fn chunk_count(&self) -> u32 {
        chunk_count(self.length, self.chunk_size)
    }

    /// Byte length chunk `n` must have. Every chunk is full except the last one.
    pub fn expected_chunk_len(&self, n: u32) -> usize {
        let count = self.chunk_count();
        if n + 1 < count {
            self.chunk_size as usize
        } else {
            let full = u64::from(self.chunk_size) * u64::from(count.saturating_sub(1));
            (self.length - full) as usize
        }
    }
}

pub fn chunk_count(length: u64, chunk_size: u32) -> u32 {
    if chunk_size == 0 {
        return 0;
    }
    u32::try_from(length.div_ceil(u64::from(chunk_size))).unwrap_or(u32::MAX)
}

/// A contiguous slice of a track's bytes, the unit of storage and streaming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub owner: TrackId,
    pub n: u32,
    pub data: Vec<u8>,
}
