//! XDS-family process drivers.
//!
//! Same capability surface as the Mosflm drivers, different command and
//! report vocabulary: XDS takes a keyword=value parameter deck and runs a
//! named job step.

use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::invoker::InvokerFactory;
use super::parse::{IndexLogParser, IntegrateLogParser, LogParser, XDS_V1};
use super::traits::{
    ImageAware, IndexOutcome, IndexRequest, IndexingBackend, IntegrateOutcome, IntegrateRequest,
    IntegrationBackend, LatticeAware, PostrefDeviations, Runnable,
};
use crate::data::{Lattice, Sweep, UnitCell};
use crate::error::{ProcessError, Result};

/// Program name probed for by the factory.
pub const XDS_PROGRAM: &str = "xds";

fn probe(invokers: &Arc<dyn InvokerFactory>) -> Result<()> {
    if invokers.available(XDS_PROGRAM) {
        Ok(())
    } else {
        Err(ProcessError::NotAvailable {
            backend: XDS_PROGRAM.to_string(),
        })
    }
}

fn run(invokers: &Arc<dyn InvokerFactory>, deck: &[String]) -> Result<Vec<String>> {
    let mut invoker = invokers.spawn(XDS_PROGRAM)?;
    invoker.start()?;
    for line in deck {
        invoker.input(line)?;
    }
    invoker.close_wait()
}

fn deck_geometry(deck: &mut Vec<String>, sweep: &Sweep, beam: (f64, f64), distance: f64) {
    deck.push(format!(
        "NAME_TEMPLATE_OF_DATA_FRAMES= {}/{}",
        sweep.directory, sweep.template
    ));
    deck.push(format!("ORGX= {:.2} ORGY= {:.2}", beam.0, beam.1));
    deck.push(format!("DETECTOR_DISTANCE= {:.2}", distance));
    deck.push(format!(
        "OSCILLATION_RANGE= {:.4} STARTING_ANGLE= {:.4}",
        sweep.phi_width, sweep.phi_start
    ));
}

/// Autoindexing driver running the IDXREF step.
pub struct XdsIndexer {
    invokers: Arc<dyn InvokerFactory>,
    parser: LogParser,
    working_dir: PathBuf,
    sweep: Option<Sweep>,
    constraint: Option<(Lattice, Option<UnitCell>)>,
}

impl XdsIndexer {
    pub fn new(invokers: Arc<dyn InvokerFactory>) -> Result<Self> {
        probe(&invokers)?;
        Ok(Self {
            invokers,
            parser: LogParser::new(XDS_V1),
            working_dir: PathBuf::from("."),
            sweep: None,
            constraint: None,
        })
    }
}

impl Runnable for XdsIndexer {
    fn set_working_directory(&mut self, dir: PathBuf) {
        self.working_dir = dir;
    }

    fn working_directory(&self) -> &Path {
        &self.working_dir
    }

    fn name(&self) -> &'static str {
        "xds"
    }
}

impl ImageAware for XdsIndexer {
    fn set_sweep(&mut self, sweep: Sweep) {
        self.sweep = Some(sweep);
    }

    fn sweep(&self) -> Option<&Sweep> {
        self.sweep.as_ref()
    }
}

impl LatticeAware for XdsIndexer {
    fn set_lattice_constraint(&mut self, lattice: Lattice, cell: Option<UnitCell>) {
        self.constraint = Some((lattice, cell));
    }

    fn lattice_constraint(&self) -> Option<(Lattice, Option<UnitCell>)> {
        self.constraint
    }
}

impl IndexingBackend for XdsIndexer {
    fn index(&mut self, request: &IndexRequest) -> Result<IndexOutcome> {
        let sweep = self.sweep.as_ref().ok_or_else(|| ProcessError::Indexing {
            reason: "no sweep assigned to indexing backend".to_string(),
        })?;

        let mut deck = vec!["JOB= IDXREF".to_string()];
        deck_geometry(&mut deck, sweep, request.beam_centre, request.distance);
        deck.push(format!("X-RAY_WAVELENGTH= {:.6}", request.wavelength));

        if let Some((lattice, cell)) = &self.constraint {
            deck.push(format!(
                "SPACE_GROUP_NUMBER= {}",
                lattice.spacegroup_number()
            ));
            if let Some(cell) = cell {
                deck.push(format!("UNIT_CELL_CONSTANTS= {}", cell));
            }
        }
        if request.widen_search {
            deck.push("INDEX_ERROR= 0.10".to_string());
        }
        for wedge in &request.wedges {
            deck.push(format!("SPOT_RANGE= {} {}", wedge.start(), wedge.end()));
        }

        debug!("xds idxref: {} spot range(s)", request.wedges.len());
        let output = run(&self.invokers, &deck)?;
        self.parser.parse_index(&output)
    }
}

/// Integration driver running the INTEGRATE (and CORRECT) steps.
pub struct XdsIntegrater {
    invokers: Arc<dyn InvokerFactory>,
    parser: LogParser,
    working_dir: PathBuf,
    sweep: Option<Sweep>,
}

impl XdsIntegrater {
    pub fn new(invokers: Arc<dyn InvokerFactory>) -> Result<Self> {
        probe(&invokers)?;
        Ok(Self {
            invokers,
            parser: LogParser::new(XDS_V1),
            working_dir: PathBuf::from("."),
            sweep: None,
        })
    }

    fn deck(&self, request: &IntegrateRequest, lattice: Lattice, job: &str) -> Result<Vec<String>> {
        let sweep = self.sweep.as_ref().ok_or_else(|| ProcessError::Indexing {
            reason: "no sweep assigned to integration backend".to_string(),
        })?;

        request
            .matrix
            .write_to(&self.working_dir.join("XPARM.mat"))?;

        let mut deck = vec![format!("JOB= {}", job)];
        deck_geometry(&mut deck, sweep, request.beam_centre, request.distance);
        deck.push(format!(
            "SPACE_GROUP_NUMBER= {}",
            lattice.spacegroup_number()
        ));
        deck.push(format!("UNIT_CELL_CONSTANTS= {}", request.cell));
        deck.push(format!("BEAM_DIVERGENCE= {:.4}", request.mosaic));
        deck.push(format!(
            "DATA_RANGE= {} {}",
            request.wedge.start(),
            request.wedge.end()
        ));
        if let Some(gain) = request.gain {
            deck.push(format!("GAIN= {:.4}", gain));
        }
        if let (Some(d_min), Some(d_max)) = (request.d_min, request.d_max) {
            deck.push(format!(
                "INCLUDE_RESOLUTION_RANGE= {:.2} {:.2}",
                d_max, d_min
            ));
        }
        Ok(deck)
    }
}

impl Runnable for XdsIntegrater {
    fn set_working_directory(&mut self, dir: PathBuf) {
        self.working_dir = dir;
    }

    fn working_directory(&self) -> &Path {
        &self.working_dir
    }

    fn name(&self) -> &'static str {
        "xds"
    }
}

impl ImageAware for XdsIntegrater {
    fn set_sweep(&mut self, sweep: Sweep) {
        self.sweep = Some(sweep);
    }

    fn sweep(&self) -> Option<&Sweep> {
        self.sweep.as_ref()
    }
}

impl IntegrationBackend for XdsIntegrater {
    fn integrate(&mut self, request: &IntegrateRequest) -> Result<IntegrateOutcome> {
        let deck = self.deck(request, request.lattice, "INTEGRATE")?;
        debug!("xds integrate: wedge {}", request.wedge);
        let output = run(&self.invokers, &deck)?;
        self.parser.parse_integrate(&output)
    }

    fn postrefine(
        &mut self,
        request: &IntegrateRequest,
        lattice: Lattice,
    ) -> Result<PostrefDeviations> {
        let deck = self.deck(request, lattice, "CORRECT")?;
        debug!("xds correct in {}", lattice);
        let output = run(&self.invokers, &deck)?;
        self.parser.parse_postrefine(&output)
    }
}
