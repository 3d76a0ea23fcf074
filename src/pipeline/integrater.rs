//! The integration pipeline.
//!
//! Owns the indexing pipeline and one integration backend family. The
//! prepare stage pulls the indexing results (which transparently runs
//! the indexer if needed), execute fans the sweep out over the parallel
//! coordinator, and finish checks the asserted lattice by comparing
//! postrefinement deviations against an unconstrained triclinic pass.
//!
//! A lattice disproved at any point surfaces as
//! [`ProcessError::BadLattice`]; the outer driver in
//! [`IntegraterPipeline::integrate`] responds by eliminating the
//! indexing solution and rerunning everything the elimination dirtied.

use log::{debug, info};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::indexer::IndexerPipeline;
use super::state::{PipelineState, Stage};
use crate::backend::{
    default_indexer_factory, default_integrater_factory, IntegrateOutcome, IntegrateRequest,
    InvokerFactory,
};
use crate::data::{ImageWedge, Lattice, MatFile, Reflection, Sweep, UnitCell};
use crate::error::{ProcessError, Result};
use crate::lattice::BeamGeometry;
use crate::runtime::{IntegraterSpawner, ParallelIntegrationCoordinator};

/// A lattice-constrained cell refinement is rejected when its mean
/// positional and rotational RMS deviations exceed the triclinic ones
/// by this factor.
pub const REJECTION_RATIO: f64 = 1.5;

/// Indexing results the execute and finish stages work from, fixed at
/// prepare time.
#[derive(Debug, Clone)]
struct IntegrationContext {
    lattice: Lattice,
    cell: UnitCell,
    matrix: MatFile,
    mosaic: f64,
    beam_centre: (f64, f64),
    distance: f64,
}

pub struct IntegraterPipeline {
    state: PipelineState,
    indexer: IndexerPipeline,
    coordinator: ParallelIntegrationCoordinator,
    spawner: Arc<IntegraterSpawner>,
    working_directory: PathBuf,

    /// Wedge to integrate; defaults to the whole sweep.
    wedge: Option<ImageWedge>,
    /// Resolution limits asserted by the caller. Sticky: they survive
    /// lattice elimination and every rerun.
    user_d_min: Option<f64>,
    user_d_max: Option<f64>,
    gain: Option<f64>,

    context: Option<IntegrationContext>,
    outcome: Option<IntegrateOutcome>,
}

impl IntegraterPipeline {
    pub fn new(
        indexer: IndexerPipeline,
        spawner: Arc<IntegraterSpawner>,
        working_directory: PathBuf,
        jobs: usize,
    ) -> Self {
        Self {
            state: PipelineState::new(),
            indexer,
            coordinator: ParallelIntegrationCoordinator::new(spawner.clone(), jobs),
            spawner,
            working_directory,
            wedge: None,
            user_d_min: None,
            user_d_max: None,
            gain: None,
            context: None,
            outcome: None,
        }
    }

    /// Build the whole reduction stack from the default backend
    /// factories: an indexing backend selected with fallback, and a
    /// spawner handing each integration chunk its own backend.
    pub fn with_default_indexer(
        invokers: &Arc<dyn InvokerFactory>,
        sweep: Sweep,
        geometry: BeamGeometry,
        working_directory: PathBuf,
        jobs: usize,
    ) -> Result<Self> {
        let backend = default_indexer_factory().select(invokers, None)?;
        let indexer =
            IndexerPipeline::new(backend, sweep, geometry, working_directory.clone());
        let invokers = invokers.clone();
        // one factory for the whole family: after the first spawn its
        // affinity sends every later chunk straight to the same program
        // without re-probing the candidate list
        let factory = Mutex::new(default_integrater_factory());
        let spawner: Arc<IntegraterSpawner> = Arc::new(move || {
            factory
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .select(&invokers, None)
        });
        Ok(Self::new(indexer, spawner, working_directory, jobs))
    }

    pub fn indexer(&mut self) -> &mut IndexerPipeline {
        &mut self.indexer
    }

    /// Restrict integration to `wedge`. Invalidates the integration but
    /// not the indexing.
    pub fn set_wedge(&mut self, wedge: ImageWedge) {
        self.wedge = Some(wedge);
        self.state.set(Stage::Execute, false);
    }

    /// Assert resolution limits in Angstrom. These stick across lattice
    /// elimination and reruns until set again.
    pub fn set_resolution(&mut self, d_min: Option<f64>, d_max: Option<f64>) {
        self.user_d_min = d_min;
        self.user_d_max = d_max;
        self.state.set(Stage::Execute, false);
    }

    /// Assert the detector gain.
    pub fn set_gain(&mut self, gain: f64) {
        self.gain = Some(gain);
        self.state.set(Stage::Execute, false);
    }

    // -- pulled results ------------------------------------------------

    pub fn reflections(&mut self) -> Result<Vec<Reflection>> {
        self.run(Stage::Finish)?;
        Ok(self.current().reflections.clone())
    }

    pub fn batches(&mut self) -> Result<(u32, u32)> {
        self.run(Stage::Finish)?;
        Ok(self.current().batches)
    }

    pub fn refined_cell(&mut self) -> Result<UnitCell> {
        self.run(Stage::Finish)?;
        Ok(self.current().refined_cell)
    }

    pub fn mosaics(&mut self) -> Result<Vec<f64>> {
        self.run(Stage::Finish)?;
        Ok(self.current().mosaics.clone())
    }

    /// The fully driven reduction: integrate, and whenever the current
    /// lattice is disproved, eliminate it and start over with the next
    /// lower symmetry. Fails for good only when the triclinic fallback
    /// itself fails.
    pub fn integrate(&mut self) -> Result<Vec<Reflection>> {
        loop {
            match self.reflections() {
                Ok(reflections) => return Ok(reflections),
                Err(ProcessError::BadLattice { reason }) => {
                    info!("lattice disproved ({}), eliminating and rerunning", reason);
                    self.indexer.eliminate()?;
                    self.state.reset();
                }
                Err(e) => return Err(e),
            }
        }
    }

    // -- stage machinery -----------------------------------------------

    fn current(&self) -> &IntegrateOutcome {
        self.outcome
            .as_ref()
            .unwrap_or_else(|| unreachable!("outcome set by execute stage"))
    }

    fn run(&mut self, upto: Stage) -> Result<()> {
        while let Some(stage) = self.state.next_pending(upto) {
            debug!("integrater: running {} stage", stage.name());
            match stage {
                Stage::Prepare => self.prepare()?,
                Stage::Execute => self.execute()?,
                Stage::Finish => self.finish()?,
            }
        }
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        let solution = self.indexer.solution()?;
        let matrix = self.indexer.matrix()?;
        let beam_centre = self.indexer.refined_beam()?;
        let distance = self.indexer.refined_distance()?;

        info!(
            "integrating as {} cell {} mosaic {:.3}",
            solution.lattice, solution.cell, solution.mosaic
        );

        self.context = Some(IntegrationContext {
            lattice: solution.lattice,
            cell: solution.cell,
            matrix,
            mosaic: solution.mosaic,
            beam_centre,
            distance,
        });
        self.state.set(Stage::Prepare, true);
        Ok(())
    }

    fn request(&mut self) -> Result<IntegrateRequest> {
        let wedge = match self.wedge {
            Some(w) => w,
            None => self.indexer.sweep().full_wedge(),
        };
        let context = self
            .context
            .as_ref()
            .unwrap_or_else(|| unreachable!("context set by prepare stage"));
        Ok(IntegrateRequest {
            sweep: self.indexer.sweep().clone(),
            wedge,
            lattice: context.lattice,
            cell: context.cell,
            matrix: context.matrix.clone(),
            beam_centre: context.beam_centre,
            distance: context.distance,
            mosaic: context.mosaic,
            gain: self.gain,
            d_min: self.user_d_min,
            d_max: self.user_d_max,
        })
    }

    fn execute(&mut self) -> Result<()> {
        let mut request = self.request()?;

        let outcome = match self.coordinator.integrate(&request, &self.working_directory) {
            Ok(outcome) => outcome,
            Err(ProcessError::NegativeMosaic { mosaic }) => {
                // one retry with a doubled seed; a second failure means
                // the lattice constraints are forcing the refinement
                // somewhere unphysical
                info!(
                    "refined mosaic went negative ({:.4}), retrying with doubled seed",
                    mosaic
                );
                request.mosaic *= 2.0;
                match self.coordinator.integrate(&request, &self.working_directory) {
                    Ok(outcome) => outcome,
                    Err(ProcessError::NegativeMosaic { .. }) => {
                        return Err(ProcessError::BadLattice {
                            reason: "negative mosaic spread with doubled seed".to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        info!(
            "integrated batches {} to {}, {} reflections",
            outcome.batches.0,
            outcome.batches.1,
            outcome.reflections.len()
        );
        // keep a discovered gain correction; a rerun then starts from the
        // right value instead of repeating the discovery round
        if let Some(gain) = outcome.suggested_gain {
            self.gain = Some(gain);
        }
        self.outcome = Some(outcome);
        self.state.set(Stage::Execute, true);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let lattice = self
            .context
            .as_ref()
            .unwrap_or_else(|| unreachable!("context set by prepare stage"))
            .lattice;

        if lattice != Lattice::AP && self.indexer.user_lattice().is_none() {
            self.check_lattice_by_postrefinement(lattice)?;
        }

        self.state.set(Stage::Finish, true);
        Ok(())
    }

    /// Postrefine under the asserted lattice and unconstrained in
    /// triclinic; if the constrained positional and rotational deviations
    /// are much worse the lattice assignment is wrong.
    fn check_lattice_by_postrefinement(&mut self, lattice: Lattice) -> Result<()> {
        let request = self.request()?;
        let mut backend = (self.spawner)()?;
        backend.set_working_directory(self.working_directory.clone());
        backend.set_sweep(request.sweep.clone());

        let triclinic = match backend.postrefine(&request, Lattice::AP) {
            Ok(d) => d,
            Err(e @ (ProcessError::NotAvailable { .. } | ProcessError::Parse { .. })) => {
                // no triclinic reference, no comparison
                debug!("triclinic postrefinement unavailable: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let constrained = backend.postrefine(&request, lattice)?;

        let ratios: Vec<f64> = constrained
            .rmsd
            .iter()
            .zip(triclinic.rmsd.iter())
            .chain(constrained.rms_phi.iter().zip(triclinic.rms_phi.iter()))
            .filter(|(_, t)| **t > 0.0)
            .map(|(c, t)| c / t)
            .collect();

        if ratios.is_empty() {
            debug!("no usable postrefinement deviations, accepting {}", lattice);
            return Ok(());
        }

        let mean = ratios.iter().sum::<f64>() / ratios.len() as f64;
        debug!(
            "postrefinement rms ratio {} vs aP over {} terms: {:.3}",
            lattice,
            ratios.len(),
            mean
        );

        if mean > REJECTION_RATIO {
            return Err(ProcessError::BadLattice {
                reason: format!(
                    "postrefinement {:.2}x worse than triclinic under {}",
                    mean, lattice
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::traits::{
        ImageAware, IndexOutcome, IndexRequest, IndexingBackend, IntegrationBackend, LatticeAware,
        PostrefDeviations, Runnable,
    };
    use crate::data::{LatticeSolution, OrientationMatrix, Sweep};
    use crate::lattice::BeamGeometry;
    use nalgebra::Matrix3;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn sweep_30() -> Sweep {
        Sweep::new("ins_####.img", "/data", 1, 30, 0.0, 1.0).unwrap()
    }

    fn geometry() -> BeamGeometry {
        BeamGeometry {
            distance: 150.0,
            wavelength: 0.98,
            beam_centre: (94.3, 94.5),
            pixel_size: (0.0816, 0.0816),
        }
    }

    fn matfile() -> MatFile {
        MatFile::new(
            OrientationMatrix::new(Matrix3::identity() * 0.01),
            Matrix3::identity(),
            UnitCell::new(100.0, 100.0, 100.0, 90.0, 90.0, 90.0),
        )
    }

    /// Indexer double: echoes its lattice constraint, seeding a table
    /// with the given alternates on the first call.
    struct EchoIndexer {
        dir: PathBuf,
        sweep: Option<Sweep>,
        constraint: Option<(Lattice, Option<UnitCell>)>,
        alternates: Vec<Lattice>,
        first: bool,
    }

    impl Runnable for EchoIndexer {
        fn set_working_directory(&mut self, dir: PathBuf) {
            self.dir = dir;
        }
        fn working_directory(&self) -> &Path {
            &self.dir
        }
        fn name(&self) -> &'static str {
            "echo"
        }
    }
    impl ImageAware for EchoIndexer {
        fn set_sweep(&mut self, sweep: Sweep) {
            self.sweep = Some(sweep);
        }
        fn sweep(&self) -> Option<&Sweep> {
            self.sweep.as_ref()
        }
    }
    impl LatticeAware for EchoIndexer {
        fn set_lattice_constraint(&mut self, lattice: Lattice, cell: Option<UnitCell>) {
            self.constraint = Some((lattice, cell));
        }
        fn lattice_constraint(&self) -> Option<(Lattice, Option<UnitCell>)> {
            self.constraint
        }
    }
    impl IndexingBackend for EchoIndexer {
        fn index(&mut self, _request: &IndexRequest) -> Result<IndexOutcome> {
            let cell = UnitCell::new(78.5, 78.5, 37.8, 90.0, 90.0, 90.0);
            let lattice = if self.first {
                self.first = false;
                self.alternates[0]
            } else {
                self.constraint.map(|(l, _)| l).unwrap_or(Lattice::AP)
            };
            Ok(IndexOutcome {
                solution: LatticeSolution::new(lattice, cell, 1.0, 0.4),
                alternates: self
                    .alternates
                    .iter()
                    .map(|&l| LatticeSolution::new(l, cell, 1.0, 0.4))
                    .collect(),
                matrix: matfile(),
                refined_beam: (94.4, 94.6),
                refined_distance: 149.7,
            })
        }
    }

    /// Integration double with adjustable failure behaviour, shared
    /// across the clones the spawner hands out.
    #[derive(Clone)]
    struct Script {
        /// Lattices whose postrefinement is twice as bad as triclinic.
        reject_lattices: Vec<Lattice>,
        /// Lattices whose rotational deviations alone are three times
        /// triclinic; positions stay clean.
        phi_reject_lattices: Vec<Lattice>,
        /// Fail integration with NegativeMosaic while mosaic < this.
        mosaic_floor: f64,
        /// Suggest this gain whenever the request disagrees with it.
        gain_wanted: Option<f64>,
        /// Error to raise from the triclinic postrefinement pass.
        triclinic_error: Option<ProcessError>,
        integrations: Arc<AtomicU32>,
        mosaics_seen: Arc<Mutex<Vec<f64>>>,
        resolutions_seen: Arc<Mutex<Vec<Option<f64>>>>,
        gains_seen: Arc<Mutex<Vec<Option<f64>>>>,
    }

    impl Script {
        fn new() -> Self {
            Self {
                reject_lattices: Vec::new(),
                phi_reject_lattices: Vec::new(),
                mosaic_floor: 0.0,
                gain_wanted: None,
                triclinic_error: None,
                integrations: Arc::new(AtomicU32::new(0)),
                mosaics_seen: Arc::new(Mutex::new(Vec::new())),
                resolutions_seen: Arc::new(Mutex::new(Vec::new())),
                gains_seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    struct ScriptedIntegrater {
        dir: PathBuf,
        sweep: Option<Sweep>,
        script: Script,
    }

    impl Runnable for ScriptedIntegrater {
        fn set_working_directory(&mut self, dir: PathBuf) {
            self.dir = dir;
        }
        fn working_directory(&self) -> &Path {
            &self.dir
        }
        fn name(&self) -> &'static str {
            "scripted"
        }
    }
    impl ImageAware for ScriptedIntegrater {
        fn set_sweep(&mut self, sweep: Sweep) {
            self.sweep = Some(sweep);
        }
        fn sweep(&self) -> Option<&Sweep> {
            self.sweep.as_ref()
        }
    }
    impl IntegrationBackend for ScriptedIntegrater {
        fn integrate(&mut self, request: &IntegrateRequest) -> Result<crate::backend::IntegrateOutcome> {
            // same refusal as the real drivers
            if self.sweep.is_none() {
                return Err(ProcessError::Indexing {
                    reason: "no sweep assigned to integration backend".into(),
                });
            }
            self.script.integrations.fetch_add(1, Ordering::SeqCst);
            self.script.mosaics_seen.lock().unwrap().push(request.mosaic);
            self.script
                .resolutions_seen
                .lock()
                .unwrap()
                .push(request.d_min);
            self.script.gains_seen.lock().unwrap().push(request.gain);
            if request.mosaic < self.script.mosaic_floor {
                return Err(ProcessError::NegativeMosaic {
                    mosaic: request.mosaic - self.script.mosaic_floor,
                });
            }
            let suggested = match (self.script.gain_wanted, request.gain) {
                (Some(wanted), None) => Some(wanted),
                (Some(wanted), Some(gain)) if (gain - wanted).abs() > 1e-9 => Some(wanted),
                _ => None,
            };
            let (lo, hi) = (request.wedge.start(), request.wedge.end());
            Ok(crate::backend::IntegrateOutcome {
                reflections: (lo..=hi)
                    .map(|b| Reflection::new([b as i32, 0, 0], b, 100.0, 1.0))
                    .collect(),
                batches: (lo, hi),
                refined_cell: request.cell,
                mosaics: vec![request.mosaic],
                suggested_gain: suggested,
            })
        }

        fn postrefine(
            &mut self,
            request: &IntegrateRequest,
            lattice: Lattice,
        ) -> Result<PostrefDeviations> {
            if self.sweep.is_none() {
                return Err(ProcessError::Indexing {
                    reason: "no sweep assigned to integration backend".into(),
                });
            }
            if lattice == Lattice::AP {
                if let Some(e) = &self.script.triclinic_error {
                    return Err(e.clone());
                }
            }
            let images = request.wedge.len() as usize;
            let rejected = self.script.reject_lattices.contains(&lattice);
            let rms = if rejected { 2.0 } else { 1.0 };
            let rms_phi = if rejected {
                0.02
            } else if self.script.phi_reject_lattices.contains(&lattice) {
                0.03
            } else {
                0.01
            };
            Ok(PostrefDeviations {
                rmsd: vec![rms; images],
                rms_phi: vec![rms_phi; images],
            })
        }
    }

    fn pipeline_with(
        script: Script,
        alternates: Vec<Lattice>,
        jobs: usize,
    ) -> (IntegraterPipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let indexer = IndexerPipeline::new(
            Box::new(EchoIndexer {
                dir: PathBuf::from("."),
                sweep: None,
                constraint: None,
                alternates,
                first: true,
            }),
            sweep_30(),
            geometry(),
            dir.path().to_path_buf(),
        );
        let spawner: Arc<IntegraterSpawner> = Arc::new(move || {
            Ok(Box::new(ScriptedIntegrater {
                dir: PathBuf::from("."),
                sweep: None,
                script: script.clone(),
            }) as Box<dyn IntegrationBackend>)
        });
        let p = IntegraterPipeline::new(indexer, spawner, dir.path().to_path_buf(), jobs);
        (p, dir)
    }

    #[test]
    fn test_getter_drives_both_pipelines() {
        let (mut p, _dir) = pipeline_with(Script::new(), vec![Lattice::TP], 2);
        let reflections = p.reflections().unwrap();
        assert_eq!(reflections.len(), 30);
        assert_eq!(p.batches().unwrap(), (1, 30));
    }

    #[test]
    fn test_wedge_restriction() {
        let (mut p, _dir) = pipeline_with(Script::new(), vec![Lattice::TP], 1);
        p.set_wedge(ImageWedge::new(5, 14).unwrap());
        assert_eq!(p.batches().unwrap(), (5, 14));
        assert_eq!(p.reflections().unwrap().len(), 10);
    }

    #[test]
    fn test_negative_mosaic_retries_with_doubled_seed() {
        let mut script = Script::new();
        script.mosaic_floor = 0.6; // seed 0.4 fails, doubled 0.8 passes
        let mosaics = script.mosaics_seen.clone();
        let (mut p, _dir) = pipeline_with(script, vec![Lattice::TP], 1);

        assert!(p.reflections().is_ok());
        let seen = mosaics.lock().unwrap();
        assert_eq!(seen.as_slice(), &[0.4, 0.8]);
    }

    #[test]
    fn test_persistent_negative_mosaic_eliminates_lattice() {
        let mut script = Script::new();
        script.mosaic_floor = 10.0; // never satisfied
        let (mut p, _dir) = pipeline_with(script, vec![Lattice::TP, Lattice::AP], 1);

        // tP fails, gets eliminated, aP fails too and there is nothing
        // below it
        assert!(matches!(
            p.integrate(),
            Err(ProcessError::BadLattice { .. })
        ));
    }

    #[test]
    fn test_postrefinement_rejection_falls_through_to_lower_symmetry() {
        let mut script = Script::new();
        script.reject_lattices = vec![Lattice::TP];
        let integrations = script.integrations.clone();
        let (mut p, _dir) = pipeline_with(script, vec![Lattice::TP, Lattice::MP], 1);

        assert!(p.reflections().is_err());
        // driver recovers by falling back to mP
        let reflections = p.integrate().unwrap();
        assert_eq!(reflections.len(), 30);
        assert_eq!(p.indexer().lattice().unwrap(), Lattice::MP);
        assert!(integrations.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_triclinic_skips_lattice_check() {
        let mut script = Script::new();
        // would reject every lattice, but aP never runs the check
        script.reject_lattices = Lattice::all_by_symmetry().to_vec();
        let (mut p, _dir) = pipeline_with(script, vec![Lattice::AP], 1);
        assert!(p.reflections().is_ok());
    }

    #[test]
    fn test_user_lattice_skips_lattice_check() {
        let mut script = Script::new();
        script.reject_lattices = vec![Lattice::TP];
        let (mut p, _dir) = pipeline_with(script, vec![Lattice::TP], 1);
        p.indexer().set_user_lattice(Lattice::TP, None);
        assert!(p.reflections().is_ok());
    }

    #[test]
    fn test_resolution_limit_is_sticky_across_elimination() {
        let mut script = Script::new();
        script.reject_lattices = vec![Lattice::TP];
        let resolutions = script.resolutions_seen.clone();
        let (mut p, _dir) = pipeline_with(script, vec![Lattice::TP, Lattice::MP], 1);

        p.set_resolution(Some(1.8), None);
        p.integrate().unwrap();

        let seen = resolutions.lock().unwrap();
        assert!(seen.len() >= 2, "expected a rerun after elimination");
        assert!(seen.iter().all(|d| *d == Some(1.8)));
    }

    #[test]
    fn test_phi_deviations_alone_disprove_lattice() {
        let mut script = Script::new();
        // positions refine fine under tP; the rotations do not
        script.phi_reject_lattices = vec![Lattice::TP];
        let (mut p, _dir) = pipeline_with(script, vec![Lattice::TP, Lattice::MP], 1);

        assert!(matches!(
            p.reflections(),
            Err(ProcessError::BadLattice { .. })
        ));
        p.integrate().unwrap();
        assert_eq!(p.indexer().lattice().unwrap(), Lattice::MP);
    }

    #[test]
    fn test_discovered_gain_survives_invalidation() {
        let mut script = Script::new();
        script.gain_wanted = Some(1.8);
        let gains = script.gains_seen.clone();
        let integrations = script.integrations.clone();
        let (mut p, _dir) = pipeline_with(script, vec![Lattice::TP], 1);

        // discovery round plus corrected rerun
        p.reflections().unwrap();
        assert_eq!(gains.lock().unwrap().as_slice(), &[None, Some(1.8)]);

        // a rerun starts from the established gain, no rediscovery
        p.set_resolution(Some(2.0), None);
        p.reflections().unwrap();
        assert_eq!(
            gains.lock().unwrap().as_slice(),
            &[None, Some(1.8), Some(1.8)]
        );
        assert_eq!(integrations.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unreadable_triclinic_reference_skips_check() {
        let mut script = Script::new();
        script.reject_lattices = vec![Lattice::TP];
        script.triclinic_error = Some(ProcessError::Parse {
            line: "POSTREF".to_string(),
            reason: "no deviations reported".to_string(),
        });
        let (mut p, _dir) = pipeline_with(script, vec![Lattice::TP], 1);
        // without a triclinic reference the lattice stands
        assert!(p.reflections().is_ok());
    }

    #[test]
    fn test_triclinic_io_failure_propagates() {
        let mut script = Script::new();
        script.triclinic_error = Some(ProcessError::Io {
            path: "postref.log".to_string(),
            reason: "permission denied".to_string(),
        });
        let (mut p, _dir) = pipeline_with(script, vec![Lattice::TP], 1);
        assert!(matches!(p.reflections(), Err(ProcessError::Io { .. })));
    }

    #[test]
    fn test_setters_invalidate_execution() {
        let script = Script::new();
        let integrations = script.integrations.clone();
        let (mut p, _dir) = pipeline_with(script, vec![Lattice::TP], 1);

        p.reflections().unwrap();
        assert_eq!(integrations.load(Ordering::SeqCst), 1);

        // no input change: cached result, no new run
        p.reflections().unwrap();
        assert_eq!(integrations.load(Ordering::SeqCst), 1);

        p.set_resolution(Some(2.0), None);
        p.reflections().unwrap();
        assert_eq!(integrations.load(Ordering::SeqCst), 2);
    }
}
