use std::sync::Arc;

use log::{info, warn};

use crate::{
    domain::track::TrackHeader,
    pipeline::{error::PipelineError, metadata::MetadataExtractor, writer::ChunkWriter},
    storage::ChunkStore,
};

/// A parsed upload request, before validation
#[derive(Debug, Default)]
pub struct UploadForm {
    pub name: Option<String>,
    /// full audio content, already buffered in memory
    pub track: Option<Vec<u8>>,
}

pub struct UploadPipeline {
    extractor: MetadataExtractor,
    writer: ChunkWriter,
}

impl UploadPipeline {
    pub fn new(store: Arc<dyn ChunkStore>, chunk_size: u32) -> Self {
        Self {
            extractor: MetadataExtractor,
            writer: ChunkWriter::new(store, chunk_size),
        }
    }

    /// Validates the form, extracts tags and persists the track.
    ///
    /// Nothing reaches the store unless validation and extraction both succeed.
    pub fn upload(&self, form: UploadForm) -> Result<TrackHeader, PipelineError> {
        let name = form
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| PipelineError::validation("No track name in the request body"))?;

        let audio = form
            .track
            .map(Arc::new)
            .ok_or_else(|| PipelineError::validation("No track file in the request body"))?;

        let metadata = self.extractor.extract(Arc::clone(&audio)).map_err(|e| {
            warn!("rejecting upload '{name}': {e}");
            PipelineError::from(e)
        })?;

        let header = self.writer.write(&audio[..], &name, metadata)?;
        info!(
            "upload '{name}' stored as {} ({} bytes, chunk size {})",
            header.id,
            header.length,
            self.writer.chunk_size()
        );
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, thread};

    use super::*;
    use crate::{
        pipeline::{
            error::ErrorKind,
            fixtures::{FaultyStore, memory_store, wav, wav_with_info},
        },
        storage::SqliteStore,
    };

    fn form(name: Option<&str>, track: Option<Vec<u8>>) -> UploadForm {
        UploadForm {
            name: name.map(str::to_string),
            track,
        }
    }

    fn pipeline(store: Arc<SqliteStore>) -> UploadPipeline {
        UploadPipeline::new(store, 64)
    }

    #[test]
    fn stores_track_with_extracted_tags() -> anyhow::Result<()> {
        let store = memory_store();
        let audio = wav_with_info(100, &[(b"INAM", "Night Drive")]);

        let header = pipeline(store.clone()).upload(form(Some("night"), Some(audio.clone())))?;

        let stored = store.header(&header.id)?.unwrap();
        assert_eq!(stored.name, "night");
        assert_eq!(stored.length, audio.len() as u64);
        assert!(stored.metadata.values().any(|v| v == "Night Drive"));
        Ok(())
    }

    #[test]
    fn missing_name_is_rejected_without_writes() -> anyhow::Result<()> {
        let store = memory_store();

        for name in [None, Some(""), Some("   ")] {
            let err = pipeline(store.clone())
                .upload(form(name, Some(wav(100))))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        assert!(store.headers()?.is_empty());
        assert_eq!(store.chunk_total()?, 0);
        Ok(())
    }

    #[test]
    fn missing_file_is_rejected() {
        let err = pipeline(memory_store())
            .upload(form(Some("song"), None))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn unreadable_audio_is_rejected_without_writes() -> anyhow::Result<()> {
        let store = memory_store();

        let err = pipeline(store.clone())
            .upload(form(Some("song"), Some(b"plain text, no audio here".repeat(10))))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Extraction);
        assert!(store.headers()?.is_empty());
        assert_eq!(store.chunk_total()?, 0);
        Ok(())
    }

    #[test]
    fn store_failure_is_reported_as_upstream() -> anyhow::Result<()> {
        let store = Arc::new(FaultyStore::failing_put_chunk_after(1));
        let pipeline = UploadPipeline::new(store.clone(), 64);

        let err = pipeline
            .upload(form(Some("song"), Some(wav(200))))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UpstreamStore);
        assert!(store.headers()?.is_empty());
        assert_eq!(store.stored_chunks()?, 0);
        Ok(())
    }

    #[test]
    fn concurrent_uploads_get_distinct_ids() -> anyhow::Result<()> {
        let store = memory_store();
        let pipeline = Arc::new(pipeline(store.clone()));

        let handles = (0..8)
            .map(|i| {
                let pipeline = Arc::clone(&pipeline);
                thread::spawn(move || {
                    pipeline
                        .upload(form(Some(&format!("song {i}")), Some(wav(100 + i * 10))))
                        .map(|h| h.id)
                })
            })
            .collect::<Vec<_>>();

        let ids = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Result<HashSet<_>, _>>()?;

        assert_eq!(ids.len(), 8);
        assert_eq!(store.headers()?.len(), 8);
        Ok(())
    }
}
