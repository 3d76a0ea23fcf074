//! Backend capability traits and structured request/outcome types.
//!
//! Concrete backends are process drivers. Rather than a deep inheritance
//! hierarchy they implement small capability traits piecemeal: every
//! backend is [`Runnable`], backends that look at image frames are
//! [`ImageAware`], backends that accept a lattice constraint are
//! [`LatticeAware`]. Pipeline logic only ever sees the structured outcome
//! types; raw backend text stays behind the versioned log parsers.

use std::path::{Path, PathBuf};

use crate::data::{ImageWedge, Lattice, LatticeSolution, MatFile, Reflection, Sweep, UnitCell};
use crate::error::Result;

/// Anything that runs an external program in a working directory.
pub trait Runnable {
    fn set_working_directory(&mut self, dir: PathBuf);
    fn working_directory(&self) -> &Path;
    /// Program name, also the factory candidate key.
    fn name(&self) -> &'static str;
}

/// Backends that consume diffraction image frames.
pub trait ImageAware {
    fn set_sweep(&mut self, sweep: Sweep);
    fn sweep(&self) -> Option<&Sweep>;
}

/// Backends that accept an asserted lattice (and optionally cell).
pub trait LatticeAware {
    fn set_lattice_constraint(&mut self, lattice: Lattice, cell: Option<UnitCell>);
    fn lattice_constraint(&self) -> Option<(Lattice, Option<UnitCell>)>;
}

/// Input to one autoindexing run.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    pub wedges: Vec<ImageWedge>,
    pub beam_centre: (f64, f64),
    pub distance: f64,
    pub wavelength: f64,
    /// Set on retry after a transient estimation failure: the backend
    /// widens its spot-search parameter once.
    pub widen_search: bool,
}

/// Structured result of one autoindexing run.
#[derive(Debug, Clone)]
pub struct IndexOutcome {
    /// The solution the backend chose.
    pub solution: LatticeSolution,
    /// Every solution the backend considered, the chosen one included.
    pub alternates: Vec<LatticeSolution>,
    /// Orientation matrix payload in interchange form.
    pub matrix: MatFile,
    pub refined_beam: (f64, f64),
    pub refined_distance: f64,
}

/// Input to one integration run over a single wedge.
#[derive(Debug, Clone)]
pub struct IntegrateRequest {
    /// Sweep the wedge belongs to; freshly spawned backends are pointed
    /// at it before they run.
    pub sweep: Sweep,
    pub wedge: ImageWedge,
    pub lattice: Lattice,
    pub cell: UnitCell,
    pub matrix: MatFile,
    pub beam_centre: (f64, f64),
    pub distance: f64,
    /// Seed mosaic spread in degrees.
    pub mosaic: f64,
    /// Detector gain override, if one has been established.
    pub gain: Option<f64>,
    pub d_min: Option<f64>,
    pub d_max: Option<f64>,
}

/// Structured result of one integration run.
#[derive(Debug, Clone)]
pub struct IntegrateOutcome {
    pub reflections: Vec<Reflection>,
    /// First and last batch numbers integrated, inclusive.
    pub batches: (u32, u32),
    pub refined_cell: UnitCell,
    /// Per-block refined mosaic spreads.
    pub mosaics: Vec<f64>,
    /// Set when the backend found the assumed detector gain wrong
    /// mid-run and suggests a corrected value. In a merged outcome this
    /// carries the gain the accepted round ran with.
    pub suggested_gain: Option<f64>,
}

/// Per-image deviations from a postrefinement pass.
#[derive(Debug, Clone, Default)]
pub struct PostrefDeviations {
    /// Positional RMS deviations, one per refined image.
    pub rmsd: Vec<f64>,
    /// Rotation (phi) RMS deviations, one per refined image.
    pub rms_phi: Vec<f64>,
}

/// An autoindexing backend.
pub trait IndexingBackend: Runnable + ImageAware + LatticeAware + Send {
    fn index(&mut self, request: &IndexRequest) -> Result<IndexOutcome>;
}

/// An integration backend.
pub trait IntegrationBackend: Runnable + ImageAware + Send {
    fn integrate(&mut self, request: &IntegrateRequest) -> Result<IntegrateOutcome>;

    /// Postrefine the cell under `lattice` without integrating, for the
    /// lattice-correctness comparison against triclinic.
    fn postrefine(
        &mut self,
        request: &IntegrateRequest,
        lattice: Lattice,
    ) -> Result<PostrefDeviations>;
}
