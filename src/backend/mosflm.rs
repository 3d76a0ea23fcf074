//! Mosflm-family process drivers.
//!
//! These drivers own the command vocabulary of the program: they stream
//! keyworded instructions through a [`BackendInvoker`] and hand the
//! captured output to the version-matched log parser. Nothing above this
//! layer sees raw text.

use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::invoker::InvokerFactory;
use super::parse::{IndexLogParser, IntegrateLogParser, LogParser, MOSFLM_V7};
use super::traits::{
    ImageAware, IndexOutcome, IndexRequest, IndexingBackend, IntegrateOutcome, IntegrateRequest,
    IntegrationBackend, LatticeAware, PostrefDeviations, Runnable,
};
use crate::data::{Lattice, Sweep, UnitCell};
use crate::error::{ProcessError, Result};

/// Program name probed for by the factory.
pub const MOSFLM_PROGRAM: &str = "ipmosflm";

fn probe(invokers: &Arc<dyn InvokerFactory>, program: &str) -> Result<()> {
    if invokers.available(program) {
        Ok(())
    } else {
        Err(ProcessError::NotAvailable {
            backend: program.to_string(),
        })
    }
}

fn stream_geometry(
    lines: &mut Vec<String>,
    sweep: &Sweep,
    beam: (f64, f64),
    distance: f64,
    wavelength: Option<f64>,
) {
    lines.push(format!("TEMPLATE {}", sweep.template));
    lines.push(format!("DIRECTORY {}", sweep.directory));
    lines.push(format!("BEAM {:.2} {:.2}", beam.0, beam.1));
    lines.push(format!("DISTANCE {:.2}", distance));
    if let Some(w) = wavelength {
        lines.push(format!("WAVELENGTH {:.6}", w));
    }
}

fn run(
    invokers: &Arc<dyn InvokerFactory>,
    program: &str,
    commands: &[String],
) -> Result<Vec<String>> {
    let mut invoker = invokers.spawn(program)?;
    invoker.start()?;
    for command in commands {
        invoker.input(command)?;
    }
    invoker.close_wait()
}

/// Autoindexing driver for Mosflm 7.x.
pub struct MosflmIndexer {
    invokers: Arc<dyn InvokerFactory>,
    parser: LogParser,
    working_dir: PathBuf,
    sweep: Option<Sweep>,
    constraint: Option<(Lattice, Option<UnitCell>)>,
}

impl MosflmIndexer {
    pub fn new(invokers: Arc<dyn InvokerFactory>) -> Result<Self> {
        probe(&invokers, MOSFLM_PROGRAM)?;
        Ok(Self {
            invokers,
            parser: LogParser::new(MOSFLM_V7),
            working_dir: PathBuf::from("."),
            sweep: None,
            constraint: None,
        })
    }
}

impl Runnable for MosflmIndexer {
    fn set_working_directory(&mut self, dir: PathBuf) {
        self.working_dir = dir;
    }

    fn working_directory(&self) -> &Path {
        &self.working_dir
    }

    fn name(&self) -> &'static str {
        "mosflm"
    }
}

impl ImageAware for MosflmIndexer {
    fn set_sweep(&mut self, sweep: Sweep) {
        self.sweep = Some(sweep);
    }

    fn sweep(&self) -> Option<&Sweep> {
        self.sweep.as_ref()
    }
}

impl LatticeAware for MosflmIndexer {
    fn set_lattice_constraint(&mut self, lattice: Lattice, cell: Option<UnitCell>) {
        self.constraint = Some((lattice, cell));
    }

    fn lattice_constraint(&self) -> Option<(Lattice, Option<UnitCell>)> {
        self.constraint
    }
}

impl IndexingBackend for MosflmIndexer {
    fn index(&mut self, request: &IndexRequest) -> Result<IndexOutcome> {
        let sweep = self.sweep.as_ref().ok_or_else(|| ProcessError::Indexing {
            reason: "no sweep assigned to indexing backend".to_string(),
        })?;

        let mut commands = Vec::new();
        stream_geometry(
            &mut commands,
            sweep,
            request.beam_centre,
            request.distance,
            Some(request.wavelength),
        );

        if let Some((lattice, cell)) = &self.constraint {
            commands.push(format!("SYMMETRY {}", lattice.spacegroup_number()));
            if let Some(cell) = cell {
                commands.push(format!("CELL {}", cell));
            }
        }
        if request.widen_search {
            // transient estimation failure on the previous attempt
            commands.push("AUTOINDEX WIDESEARCH".to_string());
        }
        for wedge in &request.wedges {
            for image in wedge.start()..=wedge.end() {
                commands.push(format!("AUTOINDEX DPS ADD IMAGE {}", image));
            }
        }
        commands.push("MOSAIC ESTIMATE".to_string());
        commands.push("GO".to_string());

        debug!(
            "mosflm autoindex: {} wedge(s), widen={}",
            request.wedges.len(),
            request.widen_search
        );
        let output = run(&self.invokers, MOSFLM_PROGRAM, &commands)?;
        self.parser.parse_index(&output)
    }
}

/// Integration driver for Mosflm 7.x.
pub struct MosflmIntegrater {
    invokers: Arc<dyn InvokerFactory>,
    parser: LogParser,
    working_dir: PathBuf,
    sweep: Option<Sweep>,
}

impl MosflmIntegrater {
    pub fn new(invokers: Arc<dyn InvokerFactory>) -> Result<Self> {
        probe(&invokers, MOSFLM_PROGRAM)?;
        Ok(Self {
            invokers,
            parser: LogParser::new(MOSFLM_V7),
            working_dir: PathBuf::from("."),
            sweep: None,
        })
    }

    fn common_commands(&self, request: &IntegrateRequest, lattice: Lattice) -> Result<Vec<String>> {
        let sweep = self.sweep.as_ref().ok_or_else(|| ProcessError::Indexing {
            reason: "no sweep assigned to integration backend".to_string(),
        })?;

        // starting orientation matrix goes in as a file in the working
        // directory, the interchange format both pipelines share
        let mat_name = format!("integrate-{}.mat", lattice.symbol());
        request.matrix.write_to(&self.working_dir.join(&mat_name))?;

        let mut commands = Vec::new();
        stream_geometry(&mut commands, sweep, request.beam_centre, request.distance, None);
        commands.push(format!("MATRIX {}", mat_name));
        commands.push(format!("SYMMETRY {}", lattice.spacegroup_number()));
        commands.push(format!("MOSAIC {:.4}", request.mosaic));
        if let Some(gain) = request.gain {
            commands.push(format!("GAIN {:.4}", gain));
        }
        if let Some(d_min) = request.d_min {
            match request.d_max {
                Some(d_max) => commands.push(format!("RESOLUTION {:.2} {:.2}", d_min, d_max)),
                None => commands.push(format!("RESOLUTION {:.2}", d_min)),
            }
        }
        Ok(commands)
    }
}

impl Runnable for MosflmIntegrater {
    fn set_working_directory(&mut self, dir: PathBuf) {
        self.working_dir = dir;
    }

    fn working_directory(&self) -> &Path {
        &self.working_dir
    }

    fn name(&self) -> &'static str {
        "mosflm"
    }
}

impl ImageAware for MosflmIntegrater {
    fn set_sweep(&mut self, sweep: Sweep) {
        self.sweep = Some(sweep);
    }

    fn sweep(&self) -> Option<&Sweep> {
        self.sweep.as_ref()
    }
}

impl IntegrationBackend for MosflmIntegrater {
    fn integrate(&mut self, request: &IntegrateRequest) -> Result<IntegrateOutcome> {
        let mut commands = self.common_commands(request, request.lattice)?;
        commands.push(format!(
            "PROCESS {} TO {}",
            request.wedge.start(),
            request.wedge.end()
        ));
        commands.push("GO".to_string());

        debug!(
            "mosflm integrate: wedge {} lattice {}",
            request.wedge, request.lattice
        );
        let output = run(&self.invokers, MOSFLM_PROGRAM, &commands)?;
        self.parser.parse_integrate(&output)
    }

    fn postrefine(
        &mut self,
        request: &IntegrateRequest,
        lattice: Lattice,
    ) -> Result<PostrefDeviations> {
        let mut commands = self.common_commands(request, lattice)?;
        commands.push(format!(
            "POSTREF SEGMENT {} TO {}",
            request.wedge.start(),
            request.wedge.end()
        ));
        commands.push("GO".to_string());

        debug!("mosflm postrefine in {}", lattice);
        let output = run(&self.invokers, MOSFLM_PROGRAM, &commands)?;
        self.parser.parse_postrefine(&output)
    }
}
