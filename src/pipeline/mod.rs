//! Upload, download and catalog flows over a [`ChunkStore`]

pub mod catalog;
pub mod download;
pub mod error;
pub mod metadata;
pub mod reader;
pub mod upload;
pub mod writer;

#[cfg(test)]
pub(crate) mod fixtures;

use std::sync::Arc;

use crate::{
    config::{CatalogConfig, StreamingConfig, UploadConfig},
    storage::ChunkStore,
};

use catalog::CatalogQuery;
use download::DownloadPipeline;
use upload::UploadPipeline;

/// The three pipelines wired to one shared store.
pub struct TrackService {
    pub upload: UploadPipeline,
    pub download: DownloadPipeline,
    pub catalog: CatalogQuery,
}

impl TrackService {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        upload: &UploadConfig,
        catalog: &CatalogConfig,
        streaming: &StreamingConfig,
    ) -> Self {
        Self {
            upload: UploadPipeline::new(Arc::clone(&store), upload.chunk_size_bytes),
            download: DownloadPipeline::new(Arc::clone(&store), streaming.window_chunks),
            catalog: CatalogQuery::new(store, catalog),
        }
    }
}
