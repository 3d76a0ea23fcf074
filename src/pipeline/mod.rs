//! The indexing and integration pipelines.

pub mod indexer;
pub mod integrater;
pub mod state;

pub use indexer::{select_indexing_images, IndexerPipeline, SolutionTable};
pub use integrater::{IntegraterPipeline, REJECTION_RATIO};
pub use state::{Phase, PipelineState, Stage};
