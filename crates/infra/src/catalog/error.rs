use thiserror::Error;

use catalog_core::CatalogError;
use catalog_products::{Category, Product};

/// Steps of a product mutation, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Validate,
    Upload,
    Store,
    Publish,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Validate => "validate",
            PipelineStep::Upload => "upload",
            PipelineStep::Store => "store",
            PipelineStep::Publish => "publish",
        }
    }
}

impl core::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A product mutation that stopped at `step`.
///
/// When `committed` is set the store write went through before the failure:
/// the row is persisted and visible to reads even though the call failed.
#[derive(Debug, Clone, Error)]
#[error("{step} step failed: {source}")]
pub struct PipelineError {
    pub step: PipelineStep,
    pub source: CatalogError,
    pub committed: Option<Box<Product>>,
}

impl PipelineError {
    pub fn new(step: PipelineStep, source: impl Into<CatalogError>) -> Self {
        Self {
            step,
            source: source.into(),
            committed: None,
        }
    }

    pub fn after_commit(step: PipelineStep, source: impl Into<CatalogError>, product: Product) -> Self {
        Self {
            step,
            source: source.into(),
            committed: Some(Box::new(product)),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.committed.is_some()
    }
}

/// A category mutation failure.
#[derive(Debug, Clone, Error)]
pub enum CategorySyncError {
    /// The store rejected or failed the write; nothing changed.
    #[error(transparent)]
    Store(#[from] CatalogError),

    /// The store write committed but the cache batch failed. The cache is stale
    /// for this category until the next rebuild.
    #[error("category {} committed but cache sync failed: {source}", category.id)]
    Cache {
        category: Box<Category>,
        source: CatalogError,
    },
}

impl CategorySyncError {
    /// The underlying catalog error, whichever side failed.
    pub fn catalog_error(&self) -> &CatalogError {
        match self {
            CategorySyncError::Store(e) => e,
            CategorySyncError::Cache { source, .. } => source,
        }
    }
}
