//! Unit cells and Bravais lattice bookkeeping.

use crate::error::{ProcessError, Result};

/// A crystallographic unit cell: lengths in Angstrom, angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitCell {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl UnitCell {
    pub fn new(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Self {
        Self {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
        }
    }

    /// Cell parameters as a 6-array in the conventional order.
    pub fn as_array(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.alpha, self.beta, self.gamma]
    }

    pub fn from_array(p: [f64; 6]) -> Self {
        Self::new(p[0], p[1], p[2], p[3], p[4], p[5])
    }

    /// True if every parameter agrees with `other` within `tol`.
    pub fn close_to(&self, other: &UnitCell, tol: f64) -> bool {
        self.as_array()
            .iter()
            .zip(other.as_array().iter())
            .all(|(x, y)| (x - y).abs() < tol)
    }
}

impl std::fmt::Display for UnitCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:6.2} {:6.2} {:6.2} {:6.2} {:6.2} {:6.2}",
            self.a, self.b, self.c, self.alpha, self.beta, self.gamma
        )
    }
}

/// Lattice centering type, the letter of the Bravais symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Centering {
    Primitive,
    AFace,
    BFace,
    CFace,
    BodyCentred,
    FaceCentred,
    Rhombohedral,
}

/// The fourteen Bravais lattices as two-character symbols (e.g. `mC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lattice {
    AP,
    MP,
    MC,
    OP,
    OC,
    OF,
    OI,
    TP,
    TI,
    HP,
    HR,
    CP,
    CF,
    CI,
}

impl Lattice {
    /// The two-character Bravais symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            Lattice::AP => "aP",
            Lattice::MP => "mP",
            Lattice::MC => "mC",
            Lattice::OP => "oP",
            Lattice::OC => "oC",
            Lattice::OF => "oF",
            Lattice::OI => "oI",
            Lattice::TP => "tP",
            Lattice::TI => "tI",
            Lattice::HP => "hP",
            Lattice::HR => "hR",
            Lattice::CP => "cP",
            Lattice::CF => "cF",
            Lattice::CI => "cI",
        }
    }

    pub fn parse(symbol: &str) -> Result<Self> {
        match symbol {
            "aP" => Ok(Lattice::AP),
            "mP" => Ok(Lattice::MP),
            "mC" => Ok(Lattice::MC),
            "oP" => Ok(Lattice::OP),
            "oC" => Ok(Lattice::OC),
            "oF" => Ok(Lattice::OF),
            "oI" => Ok(Lattice::OI),
            "tP" => Ok(Lattice::TP),
            "tI" => Ok(Lattice::TI),
            "hP" => Ok(Lattice::HP),
            "hR" => Ok(Lattice::HR),
            "cP" => Ok(Lattice::CP),
            "cF" => Ok(Lattice::CF),
            "cI" => Ok(Lattice::CI),
            _ => Err(ProcessError::Parse {
                line: symbol.to_string(),
                reason: "unknown Bravais symbol".to_string(),
            }),
        }
    }

    /// Reference space group number for the lattice, lowest-symmetry member
    /// of the class.
    pub fn spacegroup_number(&self) -> u32 {
        match self {
            Lattice::AP => 1,
            Lattice::MP => 3,
            Lattice::MC => 5,
            Lattice::OP => 16,
            Lattice::OC => 20,
            Lattice::OF => 22,
            Lattice::OI => 23,
            Lattice::TP => 75,
            Lattice::TI => 79,
            Lattice::HP => 143,
            Lattice::HR => 146,
            Lattice::CP => 195,
            Lattice::CF => 196,
            Lattice::CI => 197,
        }
    }

    /// Centering translations carried by the lattice.
    pub fn centering(&self) -> Centering {
        match self {
            Lattice::AP | Lattice::MP | Lattice::OP | Lattice::TP | Lattice::HP | Lattice::CP => {
                Centering::Primitive
            }
            Lattice::MC | Lattice::OC => Centering::CFace,
            Lattice::OF | Lattice::CF => Centering::FaceCentred,
            Lattice::OI | Lattice::TI | Lattice::CI => Centering::BodyCentred,
            Lattice::HR => Centering::Rhombohedral,
        }
    }

    /// True when the lattice carries no centering translations.
    pub fn is_primitive(&self) -> bool {
        self.centering() == Centering::Primitive
    }

    /// The primitive lattice of the same crystal system, i.e. the result of
    /// stripping the centering operators from the derived space group.
    pub fn primitive(&self) -> Lattice {
        match self {
            Lattice::AP => Lattice::AP,
            Lattice::MP | Lattice::MC => Lattice::MP,
            Lattice::OP | Lattice::OC | Lattice::OF | Lattice::OI => Lattice::OP,
            Lattice::TP | Lattice::TI => Lattice::TP,
            Lattice::HP | Lattice::HR => Lattice::HP,
            Lattice::CP | Lattice::CF | Lattice::CI => Lattice::CP,
        }
    }

    /// All lattices in decreasing symmetry order (space group number).
    pub fn all_by_symmetry() -> [Lattice; 14] {
        [
            Lattice::CI,
            Lattice::CF,
            Lattice::CP,
            Lattice::HR,
            Lattice::HP,
            Lattice::TI,
            Lattice::TP,
            Lattice::OI,
            Lattice::OF,
            Lattice::OC,
            Lattice::OP,
            Lattice::MC,
            Lattice::MP,
            Lattice::AP,
        ]
    }
}

impl std::fmt::Display for Lattice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A lattice assignment from autoindexing, replaced wholesale on re-index.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeSolution {
    pub lattice: Lattice,
    pub cell: UnitCell,
    /// Residual reported by the autoindexer, lower is better.
    pub goodness_of_fit: f64,
    /// Estimated mosaic spread in degrees.
    pub mosaic: f64,
}

impl LatticeSolution {
    pub fn new(lattice: Lattice, cell: UnitCell, goodness_of_fit: f64, mosaic: f64) -> Self {
        Self {
            lattice,
            cell,
            goodness_of_fit,
            mosaic,
        }
    }
}
