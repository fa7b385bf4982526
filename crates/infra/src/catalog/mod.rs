//! Catalog application services: category sync, product pipeline, fan-out reads.

pub mod category_sync;
pub mod error;
pub mod fan_out;
pub mod product_pipeline;

pub use category_sync::{CategorySynchronizer, DeletePolicy};
pub use error::{CategorySyncError, PipelineError, PipelineStep};
pub use fan_out::CategoryFanOut;
pub use product_pipeline::ProductPipeline;
