//! Audio tag extraction from an in-memory upload

use std::{fmt::Display, io::Cursor, sync::Arc};

use symphonia::core::{
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::{MetadataOptions, StandardTagKey, Tag, Value},
    probe::Hint,
};
use thiserror::Error;

use crate::domain::track::TagMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    Empty,
    UnsupportedFormat,
    Malformed,
    LimitExceeded,
}

impl Display for ExtractionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            ExtractionErrorKind::Empty => "empty",
            ExtractionErrorKind::UnsupportedFormat => "unsupported format",
            ExtractionErrorKind::Malformed => "malformed",
            ExtractionErrorKind::LimitExceeded => "limit exceeded",
        };
        write!(f, "{kind}")
    }
}

#[derive(Debug, Error)]
#[error("{kind}: {detail}")]
pub struct ExtractionError {
    pub kind: ExtractionErrorKind,
    pub detail: String,
}

impl From<SymphoniaError> for ExtractionError {
    fn from(err: SymphoniaError) -> Self {
        let kind = match &err {
            SymphoniaError::Unsupported(_) => ExtractionErrorKind::UnsupportedFormat,
            SymphoniaError::LimitError(_) => ExtractionErrorKind::LimitExceeded,
            _ => ExtractionErrorKind::Malformed,
        };
        Self {
            kind,
            detail: err.to_string(),
        }
    }
}

/// Read-only view of an upload buffer shared with the caller, so probing
/// never copies the audio.
struct SharedAudio(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedAudio {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reads container tags (ID3v2, RIFF INFO, Vorbis comments, ...) out of raw audio bytes.
///
/// Extraction is pure: nothing is written anywhere, the buffer is only read.
#[derive(Debug, Default, Clone)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn extract(&self, audio: Arc<Vec<u8>>) -> Result<TagMap, ExtractionError> {
        if audio.is_empty() {
            return Err(ExtractionError {
                kind: ExtractionErrorKind::Empty,
                detail: "no audio content".into(),
            });
        }

        let source = MediaSourceStream::new(
            Box::new(Cursor::new(SharedAudio(audio))),
            Default::default(),
        );
        let mut opened = symphonia::default::get_probe().format(
            &Hint::new(),
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let mut tags = TagMap::new();

        // tags found ahead of the container, e.g. an ID3v2 block before mp3 frames
        if let Some(metadata) = opened.metadata.get() {
            if let Some(revision) = metadata.current() {
                collect_tags(revision.tags(), &mut tags);
            }
        }

        let container_metadata = opened.format.metadata();
        if let Some(revision) = container_metadata.current() {
            collect_tags(revision.tags(), &mut tags);
        }

        Ok(tags)
    }
}

fn collect_tags(source: &[Tag], into: &mut TagMap) {
    for tag in source {
        if let Value::Binary(_) = tag.value {
            continue;
        }

        let value = tag.value.to_string();
        let value = value.trim_end_matches('\0').trim();
        if value.is_empty() {
            continue;
        }

        let key = tag
            .std_key
            .as_ref()
            .and_then(tag_name)
            .map(str::to_string)
            .unwrap_or_else(|| tag.key.clone());

        into.entry(key).or_insert_with(|| value.to_string());
    }
}

fn tag_name(key: &StandardTagKey) -> Option<&'static str> {
    let name = match key {
        StandardTagKey::TrackTitle => "title",
        StandardTagKey::Artist => "artist",
        StandardTagKey::Album => "album",
        StandardTagKey::AlbumArtist => "albumArtist",
        StandardTagKey::Genre => "genre",
        StandardTagKey::Date => "year",
        StandardTagKey::TrackNumber => "track",
        StandardTagKey::Comment => "comment",
        StandardTagKey::Composer => "composer",
        _ => return None,
    };
    Some(name)
}
