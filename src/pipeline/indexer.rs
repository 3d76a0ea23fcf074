//! The autoindexing pipeline.
//!
//! Owns one autoindexing backend and drives it through the prepare,
//! execute and finish stages. Results are pulled, not pushed: every
//! getter first brings the pipeline to the finished phase, so a caller
//! can change an input at any time and the next getter transparently
//! redoes whatever the change invalidated.
//!
//! Candidate solutions live in a [`SolutionTable`] ordered by symmetry.
//! When downstream processing disproves the current lattice it calls
//! [`IndexerPipeline::eliminate`], the table drops its top entry and the
//! next getter reindexes against the next-lower symmetry.

use log::{debug, info};
use std::path::PathBuf;

use super::state::{PipelineState, Stage};
use crate::backend::{IndexOutcome, IndexRequest, IndexingBackend};
use crate::data::{ImageWedge, Lattice, LatticeSolution, MatFile, SpotRecord, Sweep, UnitCell};
use crate::error::{ProcessError, Result};
use crate::lattice::{validate, BeamGeometry, Verdict};

/// Transient-failure retries per indexing run: one plain attempt, then
/// one with a widened spot search.
const MAX_INDEX_ATTEMPTS: u32 = 2;

/// Filename of the orientation matrix interchange file left in the
/// working directory for downstream consumers.
pub const MATRIX_FILE: &str = "index.mat";

/// Candidate solutions ordered by decreasing symmetry, with elimination.
#[derive(Debug, Clone, Default)]
pub struct SolutionTable {
    solutions: Vec<LatticeSolution>,
}

impl SolutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate, keeping one entry per lattice (the better fit
    /// wins) and the descending symmetry order.
    pub fn insert(&mut self, solution: LatticeSolution) {
        if let Some(existing) = self
            .solutions
            .iter_mut()
            .find(|s| s.lattice == solution.lattice)
        {
            if solution.goodness_of_fit < existing.goodness_of_fit {
                *existing = solution;
            }
            return;
        }
        self.solutions.push(solution);
        self.solutions
            .sort_by(|a, b| b.lattice.spacegroup_number().cmp(&a.lattice.spacegroup_number()));
    }

    /// The highest-symmetry candidate still standing.
    pub fn best(&self) -> Result<&LatticeSolution> {
        self.solutions.first().ok_or_else(|| ProcessError::BadLattice {
            reason: "no indexing solutions remain".to_string(),
        })
    }

    /// Drop the current best. Refuses to empty the table: the triclinic
    /// fallback must always survive.
    pub fn eliminate(&mut self) -> Result<LatticeSolution> {
        if self.solutions.len() <= 1 {
            return Err(ProcessError::BadLattice {
                reason: "no lower-symmetry solution to fall back to".to_string(),
            });
        }
        let dropped = self.solutions.remove(0);
        info!("eliminated indexing solution {}", dropped.lattice);
        Ok(dropped)
    }

    /// Discard everything in favour of one known-good solution.
    pub fn replace(&mut self, solution: LatticeSolution) {
        self.solutions = vec![solution];
    }

    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }

    pub fn lattices(&self) -> Vec<Lattice> {
        self.solutions.iter().map(|s| s.lattice).collect()
    }
}

/// The autoindexing pipeline over one sweep.
pub struct IndexerPipeline {
    state: PipelineState,
    backend: Box<dyn IndexingBackend>,
    sweep: Sweep,
    geometry: BeamGeometry,
    working_directory: PathBuf,

    /// Lattice asserted by the caller; skips the plausibility check.
    user_lattice: Option<(Lattice, Option<UnitCell>)>,
    /// Spots found on the indexing images, input to the plausibility
    /// check. Empty is allowed and passes the check trivially.
    spots: Vec<SpotRecord>,

    wedges: Vec<ImageWedge>,
    table: SolutionTable,
    outcome: Option<IndexOutcome>,
}

impl IndexerPipeline {
    pub fn new(
        backend: Box<dyn IndexingBackend>,
        sweep: Sweep,
        geometry: BeamGeometry,
        working_directory: PathBuf,
    ) -> Self {
        let mut backend = backend;
        backend.set_sweep(sweep.clone());
        backend.set_working_directory(working_directory.clone());
        Self {
            state: PipelineState::new(),
            backend,
            sweep,
            geometry,
            working_directory,
            user_lattice: None,
            spots: Vec::new(),
            wedges: Vec::new(),
            table: SolutionTable::new(),
            outcome: None,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn sweep(&self) -> &Sweep {
        &self.sweep
    }

    pub fn geometry(&self) -> &BeamGeometry {
        &self.geometry
    }

    /// Assert the lattice (and optionally the cell). Invalidates any
    /// indexing already done.
    pub fn set_user_lattice(&mut self, lattice: Lattice, cell: Option<UnitCell>) {
        self.user_lattice = Some((lattice, cell));
        self.table = SolutionTable::new();
        self.state.set(Stage::Execute, false);
    }

    pub fn user_lattice(&self) -> Option<Lattice> {
        self.user_lattice.map(|(l, _)| l)
    }

    /// Provide found spots for the lattice plausibility check.
    /// Invalidates the finish stage only.
    pub fn set_spots(&mut self, spots: Vec<SpotRecord>) {
        self.spots = spots;
        self.state.set(Stage::Finish, false);
    }

    /// Override the automatic image selection. Invalidates everything.
    pub fn set_wedges(&mut self, wedges: Vec<ImageWedge>) {
        self.wedges = wedges;
        self.state.reset();
    }

    // -- pulled results ------------------------------------------------

    pub fn solution(&mut self) -> Result<LatticeSolution> {
        self.run(Stage::Finish)?;
        Ok(self.current().solution.clone())
    }

    pub fn lattice(&mut self) -> Result<Lattice> {
        Ok(self.solution()?.lattice)
    }

    pub fn cell(&mut self) -> Result<UnitCell> {
        Ok(self.solution()?.cell)
    }

    pub fn mosaic(&mut self) -> Result<f64> {
        Ok(self.solution()?.mosaic)
    }

    pub fn matrix(&mut self) -> Result<MatFile> {
        self.run(Stage::Finish)?;
        Ok(self.current().matrix.clone())
    }

    pub fn refined_beam(&mut self) -> Result<(f64, f64)> {
        self.run(Stage::Finish)?;
        Ok(self.current().refined_beam)
    }

    pub fn refined_distance(&mut self) -> Result<f64> {
        self.run(Stage::Finish)?;
        Ok(self.current().refined_distance)
    }

    /// Images chosen for indexing; selects them first if needed.
    pub fn indexing_wedges(&mut self) -> Result<Vec<ImageWedge>> {
        self.run(Stage::Prepare)?;
        Ok(self.wedges.clone())
    }

    /// The current candidate table, for reporting.
    pub fn solutions(&mut self) -> Result<Vec<Lattice>> {
        self.run(Stage::Finish)?;
        Ok(self.table.lattices())
    }

    /// Disprove the current solution: drop it from the table and force a
    /// reindex against the next-lower symmetry on the next getter.
    pub fn eliminate(&mut self) -> Result<()> {
        self.table.eliminate()?;
        self.state.set(Stage::Execute, false);
        Ok(())
    }

    // -- stage machinery -----------------------------------------------

    fn current(&self) -> &IndexOutcome {
        self.outcome
            .as_ref()
            .unwrap_or_else(|| unreachable!("outcome set by execute stage"))
    }

    fn run(&mut self, upto: Stage) -> Result<()> {
        while let Some(stage) = self.state.next_pending(upto) {
            debug!("indexer: running {} stage", stage.name());
            match stage {
                Stage::Prepare => self.prepare()?,
                Stage::Execute => self.execute()?,
                Stage::Finish => self.finish()?,
            }
        }
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        if self.wedges.is_empty() {
            self.wedges = select_indexing_images(&self.sweep);
        }
        info!(
            "indexing {} with images {}",
            self.sweep.template,
            self.wedges
                .iter()
                .map(|w| w.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
        self.state.set(Stage::Prepare, true);
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        // constrain the backend to the target lattice, caller assertion
        // first, otherwise the best surviving candidate
        let constraint = match self.user_lattice {
            Some(assigned) => Some(assigned),
            None => match self.table.best() {
                Ok(best) => Some((best.lattice, Some(best.cell))),
                Err(_) => None,
            },
        };
        if let Some((lattice, cell)) = constraint {
            self.backend.set_lattice_constraint(lattice, cell);
        }

        let mut outcome = self.index_with_retry()?;

        if self.user_lattice.is_some() {
            self.table.replace(outcome.solution.clone());
        } else if self.table.is_empty() {
            // first run seeds the candidate table; later runs are
            // constrained by it, so an eliminated lattice can never get
            // back in through the backend's alternates
            for alternate in &outcome.alternates {
                self.table.insert(alternate.clone());
            }
            self.table.insert(outcome.solution.clone());

            // the backend may have picked a lower symmetry than the best
            // candidate: reimpose the best and rerun
            let best = self.table.best()?.clone();
            if best.lattice != outcome.solution.lattice {
                debug!(
                    "reindexing with target lattice {} over {}",
                    best.lattice, outcome.solution.lattice
                );
                self.backend
                    .set_lattice_constraint(best.lattice, Some(best.cell));
                outcome = self.index_with_retry()?;
            }
        }

        info!(
            "indexed {} as {} cell {}",
            self.sweep.template, outcome.solution.lattice, outcome.solution.cell
        );

        outcome.matrix.write_to(&self.working_directory.join(MATRIX_FILE))?;
        self.outcome = Some(outcome);
        self.state.set(Stage::Execute, true);

        Ok(())
    }

    fn index_with_retry(&mut self) -> Result<IndexOutcome> {
        let mut request = IndexRequest {
            wedges: self.wedges.clone(),
            beam_centre: self.geometry.beam_centre,
            distance: self.geometry.distance,
            wavelength: self.geometry.wavelength,
            widen_search: false,
        };

        let mut last = None;
        for attempt in 0..MAX_INDEX_ATTEMPTS {
            request.widen_search = attempt > 0;
            match self.backend.index(&request) {
                Ok(outcome) => return Ok(outcome),
                Err(ProcessError::Indexing { reason }) => {
                    debug!("indexing attempt {} failed: {}", attempt + 1, reason);
                    last = Some(ProcessError::Indexing { reason });
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| ProcessError::Indexing {
            reason: "indexing failed".to_string(),
        }))
    }

    fn finish(&mut self) -> Result<()> {
        if self.user_lattice.is_none() {
            let outcome = self.current();
            let verdict = validate(
                outcome.solution.lattice,
                &outcome.matrix,
                &self.geometry,
                &self.sweep,
                &self.spots,
            )?;

            if let Verdict::Corrected { lattice, cell, .. } = verdict {
                info!(
                    "centred solution {} rejected, reindexing as {} cell {}",
                    self.current().solution.lattice,
                    lattice,
                    cell
                );
                let mosaic = self.current().solution.mosaic;
                let goodness = self.current().solution.goodness_of_fit;
                self.table
                    .replace(LatticeSolution::new(lattice, cell, goodness, mosaic));

                // force a reindex constrained to the primitive solution;
                // that one passes the check by construction, so the run
                // loop terminates
                self.state.set(Stage::Execute, false);
                return Ok(());
            }
        }

        self.state.set(Stage::Finish, true);
        Ok(())
    }
}

/// Pick images for autoindexing: the first image plus the images nearest
/// 45 and 90 degrees of rotation when the sweep reaches that far,
/// otherwise the middle and last images. At most four wedges.
pub fn select_indexing_images(sweep: &Sweep) -> Vec<ImageWedge> {
    let mut images = vec![sweep.first_image];

    match (
        sweep.image_at_rotation(45.0),
        sweep.image_at_rotation(90.0 - sweep.phi_width),
    ) {
        (Some(i45), Some(i90)) => {
            images.push(i45);
            images.push(i90);
        }
        _ => {
            images.push(sweep.first_image + sweep.image_count() / 2);
            images.push(sweep.last_image);
        }
    }

    images.sort_unstable();
    images.dedup();
    images.truncate(4);
    images.into_iter().map(ImageWedge::single).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::traits::{ImageAware, LatticeAware, Runnable};
    use crate::data::OrientationMatrix;
    use nalgebra::Matrix3;
    use std::path::Path;

    fn sweep_90() -> Sweep {
        Sweep::new("ins_####.img", "/data", 1, 90, 0.0, 1.0).unwrap()
    }

    fn geometry() -> BeamGeometry {
        BeamGeometry {
            distance: 150.0,
            wavelength: 0.98,
            beam_centre: (94.3, 94.5),
            pixel_size: (0.0816, 0.0816),
        }
    }

    fn solution(lattice: Lattice, gof: f64) -> LatticeSolution {
        LatticeSolution::new(
            lattice,
            UnitCell::new(78.5, 78.5, 37.8, 90.0, 90.0, 90.0),
            gof,
            0.4,
        )
    }

    fn matfile() -> MatFile {
        MatFile::new(
            OrientationMatrix::new(Matrix3::identity() * 0.01),
            Matrix3::identity(),
            UnitCell::new(100.0, 100.0, 100.0, 90.0, 90.0, 90.0),
        )
    }

    /// Canned backend: pops one scripted response per index call.
    struct CannedIndexer {
        dir: PathBuf,
        sweep: Option<Sweep>,
        constraint: Option<(Lattice, Option<UnitCell>)>,
        responses: Vec<Result<IndexOutcome>>,
        requests_seen: Vec<IndexRequest>,
    }

    impl CannedIndexer {
        fn new(responses: Vec<Result<IndexOutcome>>) -> Self {
            Self {
                dir: PathBuf::from("."),
                sweep: None,
                constraint: None,
                responses,
                requests_seen: Vec::new(),
            }
        }
    }

    impl Runnable for CannedIndexer {
        fn set_working_directory(&mut self, dir: PathBuf) {
            self.dir = dir;
        }
        fn working_directory(&self) -> &Path {
            &self.dir
        }
        fn name(&self) -> &'static str {
            "canned"
        }
    }

    impl ImageAware for CannedIndexer {
        fn set_sweep(&mut self, sweep: Sweep) {
            self.sweep = Some(sweep);
        }
        fn sweep(&self) -> Option<&Sweep> {
            self.sweep.as_ref()
        }
    }

    impl LatticeAware for CannedIndexer {
        fn set_lattice_constraint(&mut self, lattice: Lattice, cell: Option<UnitCell>) {
            self.constraint = Some((lattice, cell));
        }
        fn lattice_constraint(&self) -> Option<(Lattice, Option<UnitCell>)> {
            self.constraint
        }
    }

    impl IndexingBackend for CannedIndexer {
        fn index(&mut self, request: &IndexRequest) -> Result<IndexOutcome> {
            self.requests_seen.push(request.clone());
            if self.responses.is_empty() {
                // repeat the last response shape: synthesize from constraint
                let lattice = self.constraint.map(|(l, _)| l).unwrap_or(Lattice::AP);
                return Ok(outcome_for(lattice));
            }
            self.responses.remove(0)
        }
    }

    fn outcome_for(lattice: Lattice) -> IndexOutcome {
        IndexOutcome {
            solution: solution(lattice, 1.0),
            alternates: vec![solution(lattice, 1.0)],
            matrix: matfile(),
            refined_beam: (94.4, 94.6),
            refined_distance: 149.7,
        }
    }

    fn pipeline(responses: Vec<Result<IndexOutcome>>) -> (IndexerPipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let p = IndexerPipeline::new(
            Box::new(CannedIndexer::new(responses)),
            sweep_90(),
            geometry(),
            dir.path().to_path_buf(),
        );
        (p, dir)
    }

    #[test]
    fn test_select_images_long_sweep() {
        let wedges = select_indexing_images(&sweep_90());
        let images: Vec<u32> = wedges.iter().map(|w| w.start()).collect();
        assert_eq!(images, vec![1, 46, 90]);
    }

    #[test]
    fn test_select_images_short_sweep() {
        let sweep = Sweep::new("x_####.img", "/data", 1, 20, 0.0, 1.0).unwrap();
        let wedges = select_indexing_images(&sweep);
        let images: Vec<u32> = wedges.iter().map(|w| w.start()).collect();
        assert_eq!(images, vec![1, 11, 20]);
    }

    #[test]
    fn test_getter_drives_whole_pipeline() {
        let (mut p, _dir) = pipeline(vec![Ok(outcome_for(Lattice::TP))]);
        assert_eq!(p.lattice().unwrap(), Lattice::TP);
        // matrix interchange file landed in the working directory
        assert!(p.matrix().is_ok());
    }

    #[test]
    fn test_matrix_file_written() {
        let (mut p, dir) = pipeline(vec![Ok(outcome_for(Lattice::TP))]);
        p.solution().unwrap();
        let path = dir.path().join(MATRIX_FILE);
        let on_disk = MatFile::read_from(&path).unwrap();
        assert!(on_disk.cell.close_to(&matfile().cell, 1e-3));
    }

    #[test]
    fn test_transient_failure_retries_with_widened_search() {
        let (mut p, _dir) = pipeline(vec![
            Err(ProcessError::Indexing {
                reason: "mosaic estimation failed".to_string(),
            }),
            Ok(outcome_for(Lattice::TP)),
        ]);
        assert_eq!(p.lattice().unwrap(), Lattice::TP);
    }

    #[test]
    fn test_transient_failure_bounded() {
        let failure = || {
            Err(ProcessError::Indexing {
                reason: "mosaic estimation failed".to_string(),
            })
        };
        let (mut p, _dir) = pipeline(vec![failure(), failure(), Ok(outcome_for(Lattice::TP))]);
        assert!(matches!(
            p.lattice(),
            Err(ProcessError::Indexing { .. })
        ));
    }

    #[test]
    fn test_eliminate_reindexes_lower_symmetry() {
        let mut first = outcome_for(Lattice::TP);
        first.alternates = vec![
            solution(Lattice::TP, 1.0),
            solution(Lattice::MP, 1.5),
            solution(Lattice::AP, 2.0),
        ];
        // empty remaining responses: the canned backend then echoes the
        // lattice constraint, as a real backend would
        let (mut p, _dir) = pipeline(vec![Ok(first)]);

        assert_eq!(p.lattice().unwrap(), Lattice::TP);
        p.eliminate().unwrap();
        assert_eq!(p.lattice().unwrap(), Lattice::MP);
        p.eliminate().unwrap();
        assert_eq!(p.lattice().unwrap(), Lattice::AP);
        // triclinic is the floor
        assert!(p.eliminate().is_err());
    }

    #[test]
    fn test_centring_correction_forces_reindex() {
        // detector spot sitting exactly on the Ewald sphere whose hkl
        // under the 0.01 * I matrix rounds to (-1, 2, 14): h + k odd,
        // forbidden under C centering
        let (s2, s3) = (0.02_f64, 0.14_f64);
        let scale = 100.0 / (1.0 - s2 * s2 - s3 * s3).sqrt();
        let xp = -s2 * scale;
        let yp = s3 * scale;
        let spot = SpotRecord::new(yp / 0.1, xp / 0.1, 1, 1000.0, 10.0);

        let geometry = BeamGeometry {
            distance: 100.0,
            wavelength: 1.0,
            beam_centre: (0.0, 0.0),
            pixel_size: (0.1, 0.1),
        };
        let dir = tempfile::tempdir().unwrap();
        let mut p = IndexerPipeline::new(
            // exhausted responses: the rerun echoes the oP constraint
            Box::new(CannedIndexer::new(vec![Ok(outcome_for(Lattice::OC))])),
            sweep_90(),
            geometry,
            dir.path().to_path_buf(),
        );
        p.set_spots(vec![spot; 50]);

        assert_eq!(p.lattice().unwrap(), Lattice::OP);
        // the table carries only the corrected solution
        assert_eq!(p.solutions().unwrap(), vec![Lattice::OP]);
    }

    #[test]
    fn test_user_lattice_constrains_backend() {
        let (mut p, _dir) = pipeline(vec![Ok(outcome_for(Lattice::MP))]);
        p.set_user_lattice(Lattice::MP, None);
        assert_eq!(p.lattice().unwrap(), Lattice::MP);
    }

    #[test]
    fn test_backend_disagreement_triggers_reimposed_target() {
        // backend first returns oP but the table says tP is best
        let mut first = outcome_for(Lattice::OP);
        first.alternates = vec![solution(Lattice::TP, 1.2), solution(Lattice::OP, 1.0)];
        let (mut p, _dir) = pipeline(vec![Ok(first)]);
        // rerun echoes the reimposed tP constraint
        assert_eq!(p.lattice().unwrap(), Lattice::TP);
    }

    #[test]
    fn test_table_orders_and_eliminates() {
        let mut table = SolutionTable::new();
        table.insert(solution(Lattice::MP, 1.0));
        table.insert(solution(Lattice::TP, 2.0));
        table.insert(solution(Lattice::AP, 0.5));
        assert_eq!(table.lattices(), vec![Lattice::TP, Lattice::MP, Lattice::AP]);

        table.eliminate().unwrap();
        assert_eq!(table.best().unwrap().lattice, Lattice::MP);
    }

    #[test]
    fn test_table_keeps_better_fit_per_lattice() {
        let mut table = SolutionTable::new();
        table.insert(solution(Lattice::TP, 2.0));
        table.insert(solution(Lattice::TP, 1.0));
        assert_eq!(table.lattices().len(), 1);
        assert!((table.best().unwrap().goodness_of_fit - 1.0).abs() < 1e-12);
    }
}
