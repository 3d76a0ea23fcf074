//! Versioned line-oriented parsers for backend output.
//!
//! Backend programs report results as text; each backend-version pair gets
//! its own parser so a vocabulary change in a new program release is a new
//! parser, never a conditional inside pipeline logic. All parsers yield the
//! same structured outcome types from `backend::traits`.

use nalgebra::Matrix3;

use super::traits::{IndexOutcome, IntegrateOutcome, PostrefDeviations};
use crate::data::{Lattice, LatticeSolution, MatFile, OrientationMatrix, Reflection, UnitCell};
use crate::error::{ProcessError, Result};

/// Parses autoindexing output into an [`IndexOutcome`].
pub trait IndexLogParser: Send + Sync {
    fn parse_index(&self, lines: &[String]) -> Result<IndexOutcome>;
}

/// Parses integration / postrefinement output.
pub trait IntegrateLogParser: Send + Sync {
    fn parse_integrate(&self, lines: &[String]) -> Result<IntegrateOutcome>;
    fn parse_postrefine(&self, lines: &[String]) -> Result<PostrefDeviations>;
}

/// The keyword vocabulary of one backend version.
///
/// Mosflm 7.x and XDS-style programs emit the same information under
/// different keywords; everything else about the line grammar is shared.
#[derive(Debug, Clone, Copy)]
pub struct Vocabulary {
    pub solution: &'static str,
    pub chosen: &'static str,
    pub mosaic: &'static str,
    pub mosaic_failed: &'static str,
    pub beam: &'static str,
    pub distance: &'static str,
    pub a_matrix: &'static str,
    pub u_matrix: &'static str,
    pub cell: &'static str,
    pub reflection: &'static str,
    pub batches: &'static str,
    pub negative_mosaic: &'static str,
    pub suggested_gain: &'static str,
    pub postref_rmsd: &'static str,
    pub postref_rms_phi: &'static str,
}

/// Mosflm 7.x vocabulary.
pub const MOSFLM_V7: Vocabulary = Vocabulary {
    solution: "SOLUTION",
    chosen: "CHOSEN",
    mosaic: "MOSAIC",
    mosaic_failed: "MOSAIC ESTIMATION FAILED",
    beam: "BEAM",
    distance: "DISTANCE",
    a_matrix: "AMATRIX",
    u_matrix: "UMATRIX",
    cell: "CELL",
    reflection: "REFLECTION",
    batches: "BATCHES",
    negative_mosaic: "NEGATIVE MOSAIC",
    suggested_gain: "GAIN SUGGESTED",
    postref_rmsd: "POSTREF RMSD",
    postref_rms_phi: "POSTREF RMSPHI",
};

/// XDS-style vocabulary (IDXREF/INTEGRATE report lines).
pub const XDS_V1: Vocabulary = Vocabulary {
    solution: "IDXREF-LATTICE",
    chosen: "IDXREF-SELECTED",
    mosaic: "IDXREF-MOSAIC",
    mosaic_failed: "IDXREF-MOSAIC-FAILURE",
    beam: "IDXREF-BEAM",
    distance: "IDXREF-DISTANCE",
    a_matrix: "IDXREF-AMAT",
    u_matrix: "IDXREF-UMAT",
    cell: "IDXREF-CELL",
    reflection: "INTEGRATE-HKL",
    batches: "INTEGRATE-BATCHES",
    negative_mosaic: "INTEGRATE-NEGATIVE-MOSAIC",
    suggested_gain: "INTEGRATE-GAIN",
    postref_rmsd: "CORRECT-RMSD",
    postref_rms_phi: "CORRECT-RMSPHI",
};

/// One parser instance bound to a backend-version vocabulary.
pub struct LogParser {
    vocab: Vocabulary,
}

impl LogParser {
    pub fn new(vocab: Vocabulary) -> Self {
        Self { vocab }
    }

    fn payload<'a>(&self, line: &'a str, keyword: &str) -> Option<&'a str> {
        let rest = line.strip_prefix(keyword)?;
        if rest.is_empty() {
            Some("")
        } else if rest.starts_with(' ') {
            Some(rest.trim())
        } else {
            None
        }
    }
}

fn floats(line: &str, payload: &str) -> Result<Vec<f64>> {
    payload
        .split_whitespace()
        .map(|tok| {
            tok.parse::<f64>().map_err(|_| ProcessError::Parse {
                line: line.to_string(),
                reason: format!("bad float {:?}", tok),
            })
        })
        .collect()
}

fn fixed<const N: usize>(line: &str, payload: &str) -> Result<[f64; N]> {
    let values = floats(line, payload)?;
    values.try_into().map_err(|v: Vec<f64>| ProcessError::Parse {
        line: line.to_string(),
        reason: format!("expected {} values, got {}", N, v.len()),
    })
}

fn matrix_from(values: [f64; 9]) -> Matrix3<f64> {
    Matrix3::new(
        values[0], values[1], values[2], values[3], values[4], values[5], values[6], values[7],
        values[8],
    )
}

impl IndexLogParser for LogParser {
    fn parse_index(&self, lines: &[String]) -> Result<IndexOutcome> {
        let v = &self.vocab;
        let mut alternates: Vec<LatticeSolution> = Vec::new();
        let mut chosen: Option<Lattice> = None;
        let mut mosaics: Vec<f64> = Vec::new();
        let mut beam: Option<(f64, f64)> = None;
        let mut distance: Option<f64> = None;
        let mut a_matrix: Option<Matrix3<f64>> = None;
        let mut u_matrix: Option<Matrix3<f64>> = None;
        let mut cell: Option<UnitCell> = None;

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if self.payload(line, v.mosaic_failed).is_some() {
                return Err(ProcessError::Indexing {
                    reason: "mosaic spread estimation failed".to_string(),
                });
            }
            if let Some(rest) = self.payload(line, v.solution) {
                let mut toks = rest.split_whitespace();
                let symbol = toks.next().ok_or_else(|| ProcessError::Parse {
                    line: line.to_string(),
                    reason: "missing lattice symbol".to_string(),
                })?;
                let lattice = Lattice::parse(symbol)?;
                let numbers = floats(line, toks.collect::<Vec<_>>().join(" ").as_str())?;
                if numbers.len() != 7 {
                    return Err(ProcessError::Parse {
                        line: line.to_string(),
                        reason: "solution needs goodness + 6 cell values".to_string(),
                    });
                }
                let cell = UnitCell::new(
                    numbers[1], numbers[2], numbers[3], numbers[4], numbers[5], numbers[6],
                );
                alternates.push(LatticeSolution::new(lattice, cell, numbers[0], 0.0));
            } else if let Some(rest) = self.payload(line, v.chosen) {
                chosen = Some(Lattice::parse(rest)?);
            } else if let Some(rest) = self.payload(line, v.a_matrix) {
                a_matrix = Some(matrix_from(fixed::<9>(line, rest)?));
            } else if let Some(rest) = self.payload(line, v.u_matrix) {
                u_matrix = Some(matrix_from(fixed::<9>(line, rest)?));
            } else if let Some(rest) = self.payload(line, v.cell) {
                let p = fixed::<6>(line, rest)?;
                cell = Some(UnitCell::from_array(p));
            } else if let Some(rest) = self.payload(line, v.beam) {
                let p = fixed::<2>(line, rest)?;
                beam = Some((p[0], p[1]));
            } else if let Some(rest) = self.payload(line, v.distance) {
                let p = fixed::<1>(line, rest)?;
                distance = Some(p[0]);
            } else if let Some(rest) = self.payload(line, v.mosaic) {
                let p = fixed::<1>(line, rest)?;
                mosaics.push(p[0]);
            }
        }

        let missing = |what: &str| ProcessError::Parse {
            line: lines.first().cloned().unwrap_or_default(),
            reason: format!("index output missing {}", what),
        };

        let chosen = chosen.ok_or_else(|| missing("chosen lattice"))?;
        let a_matrix = a_matrix.ok_or_else(|| missing("A matrix"))?;
        let u_matrix = u_matrix.ok_or_else(|| missing("U matrix"))?;
        let beam = beam.ok_or_else(|| missing("refined beam"))?;
        let distance = distance.ok_or_else(|| missing("refined distance"))?;
        if mosaics.is_empty() {
            return Err(ProcessError::Indexing {
                reason: "mosaic spread estimation failed".to_string(),
            });
        }

        let chosen_alternate = alternates
            .iter()
            .find(|s| s.lattice == chosen)
            .ok_or_else(|| missing("solution for the chosen lattice"))?;
        let cell = cell.unwrap_or(chosen_alternate.cell);
        let mosaic = mosaics.iter().sum::<f64>() / mosaics.len() as f64;

        let solution =
            LatticeSolution::new(chosen, cell, chosen_alternate.goodness_of_fit, mosaic);
        let matrix = MatFile::new(OrientationMatrix::new(a_matrix), u_matrix, cell);

        Ok(IndexOutcome {
            solution,
            alternates,
            matrix,
            refined_beam: beam,
            refined_distance: distance,
        })
    }
}

impl IntegrateLogParser for LogParser {
    fn parse_integrate(&self, lines: &[String]) -> Result<IntegrateOutcome> {
        let v = &self.vocab;
        let mut reflections: Vec<Reflection> = Vec::new();
        let mut batches: Option<(u32, u32)> = None;
        let mut refined_cell: Option<UnitCell> = None;
        let mut mosaics: Vec<f64> = Vec::new();
        let mut suggested_gain: Option<f64> = None;

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = self.payload(line, v.negative_mosaic) {
                let p = fixed::<1>(line, rest)?;
                return Err(ProcessError::NegativeMosaic { mosaic: p[0] });
            }
            if let Some(rest) = self.payload(line, v.reflection) {
                let p = fixed::<6>(line, rest)?;
                reflections.push(Reflection::new(
                    [p[0] as i32, p[1] as i32, p[2] as i32],
                    p[3] as u32,
                    p[4],
                    p[5],
                ));
            } else if let Some(rest) = self.payload(line, v.batches) {
                let p = fixed::<2>(line, rest)?;
                batches = Some((p[0] as u32, p[1] as u32));
            } else if let Some(rest) = self.payload(line, v.cell) {
                refined_cell = Some(UnitCell::from_array(fixed::<6>(line, rest)?));
            } else if let Some(rest) = self.payload(line, v.suggested_gain) {
                let p = fixed::<1>(line, rest)?;
                suggested_gain = Some(p[0]);
            } else if let Some(rest) = self.payload(line, v.mosaic) {
                let p = fixed::<1>(line, rest)?;
                mosaics.push(p[0]);
            }
        }

        let missing = |what: &str| ProcessError::Parse {
            line: lines.first().cloned().unwrap_or_default(),
            reason: format!("integrate output missing {}", what),
        };

        Ok(IntegrateOutcome {
            batches: batches.ok_or_else(|| missing("batch range"))?,
            refined_cell: refined_cell.ok_or_else(|| missing("refined cell"))?,
            reflections,
            mosaics,
            suggested_gain,
        })
    }

    fn parse_postrefine(&self, lines: &[String]) -> Result<PostrefDeviations> {
        let v = &self.vocab;
        let mut deviations = PostrefDeviations::default();

        for line in lines {
            let line = line.trim();
            if let Some(rest) = self.payload(line, v.postref_rmsd) {
                deviations.rmsd = floats(line, rest)?;
            } else if let Some(rest) = self.payload(line, v.postref_rms_phi) {
                deviations.rms_phi = floats(line, rest)?;
            }
        }

        if deviations.rmsd.is_empty() {
            return Err(ProcessError::Parse {
                line: lines.first().cloned().unwrap_or_default(),
                reason: "postrefinement output missing RMSD record".to_string(),
            });
        }
        Ok(deviations)
    }
}
