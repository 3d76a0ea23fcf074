//! Parallel execution of the integration work.

pub mod parallel;

pub use parallel::{split_wedge, IntegraterSpawner, ParallelIntegrationCoordinator};
