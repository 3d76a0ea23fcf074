//! Lattice plausibility checking.

pub mod reduce;
pub mod symmetry;
pub mod validator;

pub use validator::{validate, BeamGeometry, Verdict};
