//! mxrs - macromolecular crystallography data reduction pipelines.
//!
//! This crate drives external indexing and integration programs through
//! a pull-based pipeline model:
//!
//! - Three-stage pipelines (prepare, execute, finish) with cascading
//!   invalidation: changing an input redoes exactly what it dirtied
//! - Backend selection with ordered fallback, pinning and affinity
//! - A lattice plausibility check that demotes pseudo-centred
//!   autoindexing solutions to their primitive counterpart
//! - Chunked parallel integration on rayon with a gain-correction
//!   barrier and sort-merged reflection output
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      IntegraterPipeline             │
//! │  owns IndexerPipeline, pulls its    │
//! │  cell / lattice / matrix results    │
//! └─────────────────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────┐
//! │  ┌───────────┐  ┌───────────────┐  │
//! │  │  Backend  │  │   Lattice     │  │
//! │  │  Factory  │  │   Validator   │  │
//! │  └───────────┘  └───────────────┘  │
//! │  ┌───────────┐  ┌───────────────┐  │
//! │  │ Parallel  │  │    Versioned  │  │
//! │  │Coordinator│  │  Log Parsers  │  │
//! │  └───────────┘  └───────────────┘  │
//! └─────────────────────────────────────┘
//! ```
//!
//! External programs are reached through an injected
//! [`backend::InvokerFactory`]; the crate itself never spawns processes,
//! which keeps every pipeline testable against scripted transcripts.

pub mod backend;
pub mod data;
pub mod error;
pub mod lattice;
pub mod pipeline;
pub mod runtime;

// Re-export commonly used items
pub use backend::{
    default_indexer_factory, default_integrater_factory, BackendFactory, InvokerFactory,
};
pub use data::{ImageWedge, Lattice, LatticeSolution, MatFile, Reflection, Sweep, UnitCell};
pub use error::{ProcessError, Result};
pub use lattice::{BeamGeometry, Verdict};
pub use pipeline::{IndexerPipeline, IntegraterPipeline};
pub use runtime::ParallelIntegrationCoordinator;
