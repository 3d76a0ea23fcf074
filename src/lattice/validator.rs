//! Pseudo-centering check on an autoindexed lattice.
//!
//! A centred solution can come out of autoindexing when the true lattice
//! is primitive: reflections the centering says must be absent are then
//! actually observed. The check maps found spots back to fractional
//! (h, k, l) through the orientation matrix, counts how many land on
//! systematically absent indices, and rejects the centred lattice when
//! the absent fraction is significant. Primitive solutions pass
//! untouched.

use log::debug;
use nalgebra::{Matrix3, Vector3};

use super::reduce::{b_matrix, cell_from_basis, decentering_transform, shorten_basis};
use super::symmetry::is_centring_absent;
use crate::data::{Lattice, MatFile, OrientationMatrix, SpotRecord, Sweep, UnitCell};
use crate::error::{ProcessError, Result};

/// Fractional distance from integer (h, k, l) inside which a spot counts
/// as indexed. Empirically calibrated, tunable.
pub const INDEX_TOLERANCE: f64 = 0.1;

/// Absent fraction below which the centred lattice is accepted. The
/// absent count is first discounted by three counting standard
/// deviations. Empirically calibrated, tunable.
pub const ABSENT_FRACTION_LIMIT: f64 = 0.008;

/// Spots weaker than this I/sigma carry no absence information and are
/// skipped.
pub const MIN_I_OVER_SIGMA: f64 = 5.0;

/// Beam and detector geometry needed to place a spot in reciprocal
/// space. Distances and beam centre in mm, pixel size in mm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamGeometry {
    pub distance: f64,
    pub wavelength: f64,
    pub beam_centre: (f64, f64),
    pub pixel_size: (f64, f64),
}

/// Outcome of the pseudo-centering check.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The centred assignment (or a primitive one) stands.
    Supported,
    /// The centred assignment is contradicted: use this primitive
    /// solution instead.
    Corrected {
        lattice: Lattice,
        cell: UnitCell,
        matrix: MatFile,
    },
}

/// Run the check for one lattice solution against the spots found on the
/// indexing images. Primitive lattices and empty spot lists are
/// supported by construction.
pub fn validate(
    lattice: Lattice,
    matrix: &MatFile,
    geometry: &BeamGeometry,
    sweep: &Sweep,
    spots: &[SpotRecord],
) -> Result<Verdict> {
    if lattice.is_primitive() {
        return Ok(Verdict::Supported);
    }

    let positions: Vec<Vector3<f64>> = spots
        .iter()
        .filter(|s| s.i_over_sigma() >= MIN_I_OVER_SIGMA)
        .map(|s| reciprocal_position(s, geometry, sweep))
        .collect();

    centering_verdict(lattice, matrix, geometry.wavelength, &positions)
}

/// The counting core: index each reciprocal-space position, tally
/// centering-absent versus present, and correct the solution when the
/// absent fraction is too high to be noise.
pub fn centering_verdict(
    lattice: Lattice,
    matrix: &MatFile,
    wavelength: f64,
    positions: &[Vector3<f64>],
) -> Result<Verdict> {
    if lattice.is_primitive() {
        return Ok(Verdict::Supported);
    }

    // reciprocal basis in 1/A, then its inverse to index positions
    let mi = matrix.a_matrix.matrix() / wavelength;
    let m = mi.try_inverse().ok_or_else(|| ProcessError::BadLattice {
        reason: format!("singular orientation matrix for {}", lattice),
    })?;

    let centering = lattice.centering();
    let mut total = 0usize;
    let mut absent = 0usize;
    let mut present = 0usize;

    for s in positions {
        let hkl = m * s;
        total += 1;

        let rounded = [
            hkl[0].round() as i32,
            hkl[1].round() as i32,
            hkl[2].round() as i32,
        ];
        if (hkl[0] - f64::from(rounded[0])).abs() > INDEX_TOLERANCE
            || (hkl[1] - f64::from(rounded[1])).abs() > INDEX_TOLERANCE
            || (hkl[2] - f64::from(rounded[2])).abs() > INDEX_TOLERANCE
        {
            continue;
        }

        if is_centring_absent(centering, rounded) {
            absent += 1;
        } else {
            present += 1;
        }
    }

    if total == 0 {
        debug!("{}: no spots usable for centering check", lattice);
        return Ok(Verdict::Supported);
    }

    let sd = (absent as f64).sqrt();
    let fraction = (absent as f64 - 3.0 * sd) / total as f64;
    debug!(
        "{}: {} spots, {} present, {} absent, fraction {:.3}",
        lattice, total, present, absent, fraction
    );

    if fraction < ABSENT_FRACTION_LIMIT {
        return Ok(Verdict::Supported);
    }

    correct_to_primitive(lattice, &m, wavelength)
}

/// Reciprocal-space position of a spot, rotated back to the zero
/// rotation datum by the rotation at the start of the spot's image.
fn reciprocal_position(spot: &SpotRecord, geometry: &BeamGeometry, sweep: &Sweep) -> Vector3<f64> {
    let xp = geometry.pixel_size.0 * spot.y - geometry.beam_centre.0;
    let yp = geometry.pixel_size.1 * spot.x - geometry.beam_centre.1;

    let d = geometry.distance;
    let scale = geometry.wavelength * (xp * xp + yp * yp + d * d).sqrt();

    let s = Vector3::new(
        d / scale - 1.0 / geometry.wavelength,
        -xp / scale,
        yp / scale,
    );

    let phi = sweep.phi_for_image(spot.frame);
    rotate_z(&s, -phi.to_radians())
}

fn rotate_z(v: &Vector3<f64>, theta: f64) -> Vector3<f64> {
    let (s, c) = theta.sin_cos();
    Vector3::new(c * v[0] - s * v[1], s * v[0] + c * v[1], v[2])
}

/// Strip the centering from the real-space basis and rebuild the matrix
/// interchange payload for the primitive solution.
fn correct_to_primitive(lattice: Lattice, m: &Matrix3<f64>, wavelength: f64) -> Result<Verdict> {
    let primitive = lattice.primitive();
    let basis = shorten_basis(&(decentering_transform(lattice.centering()) * m));
    let cell = cell_from_basis(&basis);

    let mi = basis.try_inverse().ok_or_else(|| ProcessError::BadLattice {
        reason: format!("degenerate primitive basis for {}", lattice),
    })?;

    let b = b_matrix(&cell);
    let b_inv = b.try_inverse().ok_or_else(|| ProcessError::BadLattice {
        reason: format!("degenerate cell {}", cell),
    })?;

    let matrix = MatFile::new(OrientationMatrix::new(mi * wavelength), mi * b_inv, cell);

    debug!(
        "{} rejected, corrected to {} with cell {}",
        lattice, primitive, cell
    );

    Ok(Verdict::Corrected {
        lattice: primitive,
        cell,
        matrix,
    })
}
