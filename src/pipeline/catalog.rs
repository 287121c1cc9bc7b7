use std::sync::Arc;

use log::debug;
use rand::Rng;

use crate::{
    config::CatalogConfig,
    domain::track::TrackHeader,
    pipeline::error::PipelineError,
    storage::ChunkStore,
};

/// Listing and random sampling over every stored track header.
pub struct CatalogQuery {
    store: Arc<dyn ChunkStore>,
    default_amount: usize,
    max_amount: usize,
}

impl CatalogQuery {
    pub fn new(store: Arc<dyn ChunkStore>, config: &CatalogConfig) -> Self {
        Self {
            store,
            default_amount: config.default_random_amount,
            max_amount: config.max_random_amount,
        }
    }

    pub fn list(&self) -> Result<Vec<TrackHeader>, PipelineError> {
        Ok(self.store.headers()?)
    }

    /// Interprets the `amount` query parameter.
    ///
    /// Absent, zero or negative means the default amount.
    pub fn resolve_amount(&self, raw: Option<&str>) -> Result<usize, PipelineError> {
        let Some(raw) = raw else {
            return Ok(self.default_amount);
        };

        let amount: i64 = raw.trim().parse().map_err(|_| {
            PipelineError::validation(format!("amount must be an integer, got '{raw}'"))
        })?;

        if amount <= 0 {
            return Ok(self.default_amount);
        }

        match usize::try_from(amount) {
            Ok(amount) if amount <= self.max_amount => Ok(amount),
            _ => Err(PipelineError::validation(format!(
                "amount must not exceed {}",
                self.max_amount
            ))),
        }
    }

    pub fn random(&self, amount: usize) -> Result<Vec<TrackHeader>, PipelineError> {
        self.random_with(amount, &mut rand::rng())
    }

    /// Draws `amount` headers uniformly with replacement from one snapshot of
    /// the catalog. Repeats are expected when the catalog is small.
    pub fn random_with<R: Rng + ?Sized>(
        &self,
        amount: usize,
        rng: &mut R,
    ) -> Result<Vec<TrackHeader>, PipelineError> {
        let catalog = self.store.headers()?;
        debug!(
            "sampling {amount} of {} tracks",
            catalog.len()
        );
        Ok(sample_with_replacement(&catalog, amount, rng))
    }
}

/// An empty `items` yields an empty sample whatever `amount` is.
pub fn sample_with_replacement<T: Clone, R: Rng + ?Sized>(
    items: &[T],
    amount: usize,
    rng: &mut R,
) -> Vec<T> {
    if items.is_empty() {
        return Vec::new();
    }

    (0..amount)
        .map(|_| items[rng.random_range(0..items.len())].clone())
        .collect()
}
