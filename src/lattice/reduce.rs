//! Basis manipulation for de-centering a lattice solution.
//!
//! The real-space basis lives as the rows of a 3x3 matrix (a, b, c as
//! row vectors in the lab frame). De-centering multiplies that basis by
//! the conventional centred-to-primitive transform, then a shortest
//! vector pass tidies the resulting primitive cell.

use nalgebra::{Matrix3, Vector3};

use crate::data::{Centering, UnitCell};

const RAD_TO_DEG: f64 = 180.0 / std::f64::consts::PI;
const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

/// Centred-to-primitive basis transform, rows giving the new basis
/// vectors as combinations of the old. Identity for primitive input.
pub fn decentering_transform(centering: Centering) -> Matrix3<f64> {
    match centering {
        Centering::Primitive => Matrix3::identity(),
        Centering::AFace => Matrix3::new(
            1.0, 0.0, 0.0, //
            0.0, 0.5, 0.5, //
            0.0, -0.5, 0.5,
        ),
        Centering::BFace => Matrix3::new(
            0.5, 0.0, 0.5, //
            0.0, 1.0, 0.0, //
            -0.5, 0.0, 0.5,
        ),
        Centering::CFace => Matrix3::new(
            0.5, 0.5, 0.0, //
            -0.5, 0.5, 0.0, //
            0.0, 0.0, 1.0,
        ),
        Centering::BodyCentred => Matrix3::new(
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.5, 0.5, 0.5,
        ),
        Centering::FaceCentred => Matrix3::new(
            0.0, 0.5, 0.5, //
            0.5, 0.0, 0.5, //
            0.5, 0.5, 0.0,
        ),
        Centering::Rhombohedral => Matrix3::new(
            2.0 / 3.0,
            1.0 / 3.0,
            1.0 / 3.0,
            -1.0 / 3.0,
            1.0 / 3.0,
            1.0 / 3.0,
            -1.0 / 3.0,
            -2.0 / 3.0,
            1.0 / 3.0,
        ),
    }
}

fn basis_rows(m: &Matrix3<f64>) -> [Vector3<f64>; 3] {
    [
        Vector3::new(m[(0, 0)], m[(0, 1)], m[(0, 2)]),
        Vector3::new(m[(1, 0)], m[(1, 1)], m[(1, 2)]),
        Vector3::new(m[(2, 0)], m[(2, 1)], m[(2, 2)]),
    ]
}

fn from_rows(rows: &[Vector3<f64>; 3]) -> Matrix3<f64> {
    Matrix3::new(
        rows[0][0], rows[0][1], rows[0][2], //
        rows[1][0], rows[1][1], rows[1][2], //
        rows[2][0], rows[2][1], rows[2][2],
    )
}

/// Replace each basis vector by the shortest reachable combination with
/// one other, repeated to a fixed point. Row operations only, so the
/// cell volume is preserved.
pub fn shorten_basis(basis: &Matrix3<f64>) -> Matrix3<f64> {
    let mut rows = basis_rows(basis);
    loop {
        let mut changed = false;
        for i in 0..3 {
            for j in 0..3 {
                if i == j {
                    continue;
                }
                let plus = rows[i] + rows[j];
                let minus = rows[i] - rows[j];
                let best = if plus.norm() < minus.norm() { plus } else { minus };
                if best.norm() + 1e-9 < rows[i].norm() {
                    rows[i] = best;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    // keep the basis right-handed for downstream matrix output
    if from_rows(&rows).determinant() < 0.0 {
        rows[2] = -rows[2];
    }
    from_rows(&rows)
}

/// Unit cell parameters of a real-space basis given by rows.
pub fn cell_from_basis(basis: &Matrix3<f64>) -> UnitCell {
    let [a, b, c] = basis_rows(basis);
    UnitCell::new(
        a.norm(),
        b.norm(),
        c.norm(),
        RAD_TO_DEG * b.angle(&c),
        RAD_TO_DEG * c.angle(&a),
        RAD_TO_DEG * a.angle(&b),
    )
}

/// Reciprocal-space B matrix of a unit cell, Pflugrath convention with
/// a* along x.
pub fn b_matrix(cell: &UnitCell) -> Matrix3<f64> {
    let (sa, ca) = (DEG_TO_RAD * cell.alpha).sin_cos();
    let (sb, cb) = (DEG_TO_RAD * cell.beta).sin_cos();
    let (sg, cg) = (DEG_TO_RAD * cell.gamma).sin_cos();

    let volume = cell.a
        * cell.b
        * cell.c
        * (1.0 - ca * ca - cb * cb - cg * cg + 2.0 * ca * cb * cg).sqrt();

    let a_s = cell.b * cell.c * sa / volume;
    let b_s = cell.a * cell.c * sb / volume;
    let c_s = cell.a * cell.b * sg / volume;

    let alpha_s = ((cb * cg - ca) / (sb * sg)).acos();
    let beta_s = ((ca * cg - cb) / (sa * sg)).acos();
    let gamma_s = ((ca * cb - cg) / (sa * sb)).acos();

    Matrix3::new(
        a_s,
        b_s * gamma_s.cos(),
        c_s * beta_s.cos(),
        0.0,
        b_s * gamma_s.sin(),
        -c_s * beta_s.sin() * alpha_s.cos(),
        0.0,
        0.0,
        c_s * beta_s.sin() * alpha_s.sin(),
    )
}
