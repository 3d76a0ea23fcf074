//! Chunked parallel integration.
//!
//! One sweep is split into contiguous image chunks, each integrated by
//! its own backend process in its own working directory, fanned out on
//! the rayon pool. Every round is a full barrier: all chunks of a round
//! finish before any decision is made. If any chunk discovers the
//! assumed detector gain was wrong, all results of the round are
//! discarded and every chunk is rerun with the corrected gain, once.
//! Finally the per-chunk reflection lists are renumbered onto a single
//! monotone batch axis and sort-merged.

use log::{debug, info};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{IntegrateOutcome, IntegrateRequest, IntegrationBackend};
use crate::data::{sort_reflections, ImageWedge, Reflection};
use crate::error::{ProcessError, Result};

/// Spawns a fresh integration backend per chunk.
pub type IntegraterSpawner = dyn Fn() -> Result<Box<dyn IntegrationBackend>> + Send + Sync;

/// One discard-and-restart on a gain correction, then accept.
const MAX_GAIN_ROUNDS: u32 = 2;

pub struct ParallelIntegrationCoordinator {
    spawner: Arc<IntegraterSpawner>,
    jobs: usize,
}

impl ParallelIntegrationCoordinator {
    pub fn new(spawner: Arc<IntegraterSpawner>, jobs: usize) -> Self {
        Self {
            spawner,
            jobs: jobs.max(1),
        }
    }

    /// Coordinator sized for the machine.
    pub fn with_default_jobs(spawner: Arc<IntegraterSpawner>) -> Self {
        Self::new(spawner, num_cpus::get())
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Integrate `request.wedge` in parallel chunks under
    /// `working_directory`, returning one merged outcome.
    pub fn integrate(
        &self,
        request: &IntegrateRequest,
        working_directory: &Path,
    ) -> Result<IntegrateOutcome> {
        let chunks = split_wedge(&request.wedge, self.jobs);
        info!(
            "integrating {} in {} chunk(s): {}",
            request.wedge,
            chunks.len(),
            chunks
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut request = request.clone();
        let mut round = 0;
        loop {
            round += 1;
            let outcomes = self.run_round(&request, &chunks, working_directory)?;

            let suggested = outcomes.iter().find_map(|o| o.suggested_gain);
            match suggested {
                Some(gain) if round < MAX_GAIN_ROUNDS => {
                    // stale assumption: every chunk of this round used the
                    // wrong gain, so none of the results are kept
                    info!("gain corrected to {:.3}, restarting all chunks", gain);
                    request.gain = Some(gain);
                }
                _ => {
                    // the merged outcome carries whatever gain ended up
                    // established, so callers can reuse it on a rerun
                    let mut merged = merge_outcomes(outcomes);
                    merged.suggested_gain = suggested.or(request.gain);
                    return Ok(merged);
                }
            }
        }
    }

    /// Run every chunk of one round to completion. Full barrier: the
    /// slowest chunk gates the round. Backends are spawned and configured
    /// serially here, on the coordinating thread, so the spawner (and any
    /// factory state behind it) is never touched from the pool.
    fn run_round(
        &self,
        request: &IntegrateRequest,
        chunks: &[ImageWedge],
        working_directory: &Path,
    ) -> Result<Vec<IntegrateOutcome>> {
        let mut runs = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let mut backend = (self.spawner)()?;
            backend.set_working_directory(chunk_directory(working_directory, i)?);
            backend.set_sweep(request.sweep.clone());

            let mut chunk_request = request.clone();
            chunk_request.wedge = *chunk;
            runs.push((i, chunk_request, backend));
        }

        runs.into_par_iter()
            .map(|(i, chunk_request, mut backend)| {
                debug!("chunk {} covering {} starting", i, chunk_request.wedge);
                backend.integrate(&chunk_request)
            })
            .collect()
    }
}

fn chunk_directory(working_directory: &Path, index: usize) -> Result<PathBuf> {
    let dir = working_directory.join(format!("chunk-{}", index));
    std::fs::create_dir_all(&dir).map_err(|e| ProcessError::io(dir.display().to_string(), e))?;
    Ok(dir)
}

/// Split a wedge into at most `n` contiguous chunks of near-equal size,
/// any remainder going to the earlier chunks. Never returns an empty
/// chunk: fewer images than `n` means fewer chunks.
pub fn split_wedge(wedge: &ImageWedge, n: usize) -> Vec<ImageWedge> {
    let images = wedge.len();
    let n = (n as u32).min(images).max(1);
    let base = images / n;
    let remainder = images % n;

    let mut chunks = Vec::with_capacity(n as usize);
    let mut start = wedge.start();
    for i in 0..n {
        let size = base + u32::from(i < remainder);
        let end = start + size - 1;
        chunks.push(ImageWedge::new(start, end).unwrap_or_else(|_| unreachable!()));
        start = end + 1;
    }
    chunks
}

/// Merge per-chunk outcomes: batches renumbered onto one monotone
/// non-overlapping axis in chunk order, reflections sorted into the
/// canonical (h, k, l, batch) order.
fn merge_outcomes(outcomes: Vec<IntegrateOutcome>) -> IntegrateOutcome {
    let mut reflections = Vec::new();
    let mut mosaics = Vec::new();
    let mut next_batch = 0u32;
    let mut first_batch = None;

    for outcome in &outcomes {
        let (lo, hi) = outcome.batches;
        let offset = if lo > next_batch { 0 } else { next_batch - lo + u32::from(next_batch > 0) };

        for r in &outcome.reflections {
            let mut r = *r;
            r.batch += offset;
            reflections.push(r);
        }
        mosaics.extend(outcome.mosaics.iter().copied());

        let hi = hi + offset;
        first_batch.get_or_insert(lo + offset);
        next_batch = hi;
    }

    sort_reflections(&mut reflections);

    // refined cell averaged over chunks
    let mut cell = [0.0f64; 6];
    for outcome in &outcomes {
        for (acc, v) in cell.iter_mut().zip(outcome.refined_cell.as_array()) {
            *acc += v;
        }
    }
    for v in cell.iter_mut() {
        *v /= outcomes.len() as f64;
    }

    IntegrateOutcome {
        reflections,
        batches: (first_batch.unwrap_or(0), next_batch),
        refined_cell: crate::data::UnitCell::from_array(cell),
        mosaics,
        suggested_gain: None,
    }
}
