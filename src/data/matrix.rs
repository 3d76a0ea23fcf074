//! Orientation matrices and the fixed-width matrix interchange file.
//!
//! The interchange format is the Mosflm matrix file: three rows of the
//! A-matrix, a misset row, three rows of the U-matrix, a six-float unit
//! cell row and one more misset row. The byte-for-byte layout matters:
//! the file round-trips between the indexing and integration pipelines
//! and the lattice validator.

use nalgebra::Matrix3;
use std::path::Path;

use super::cell::UnitCell;
use crate::error::{ProcessError, Result};

/// 3x3 matrix mapping fractional (h,k,l) into the lab reciprocal frame.
///
/// Owned by the indexing pipeline; consumers get read-only access.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationMatrix {
    m: Matrix3<f64>,
}

impl OrientationMatrix {
    pub fn new(m: Matrix3<f64>) -> Self {
        Self { m }
    }

    pub fn from_rows(r0: [f64; 3], r1: [f64; 3], r2: [f64; 3]) -> Self {
        Self {
            m: Matrix3::new(
                r0[0], r0[1], r0[2], r1[0], r1[1], r1[2], r2[0], r2[1], r2[2],
            ),
        }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.m
    }

    /// Inverse transform, lab reciprocal frame back to fractional (h,k,l).
    /// None if the matrix is singular.
    pub fn to_fractional(&self) -> Option<Matrix3<f64>> {
        self.m.try_inverse()
    }
}

/// Parsed contents of a matrix interchange file.
#[derive(Debug, Clone, PartialEq)]
pub struct MatFile {
    pub a_matrix: OrientationMatrix,
    pub u_matrix: Matrix3<f64>,
    pub cell: UnitCell,
}

const MISSET_ROW: &str = "       0.000       0.000       0.000";

fn matrix_row(v: &[f64; 3]) -> String {
    format!(" {:11.8} {:11.8} {:11.8}", v[0], v[1], v[2])
}

fn matrix_rows(m: &Matrix3<f64>) -> [String; 3] {
    [
        matrix_row(&[m[(0, 0)], m[(0, 1)], m[(0, 2)]]),
        matrix_row(&[m[(1, 0)], m[(1, 1)], m[(1, 2)]]),
        matrix_row(&[m[(2, 0)], m[(2, 1)], m[(2, 2)]]),
    ]
}

impl MatFile {
    pub fn new(a_matrix: OrientationMatrix, u_matrix: Matrix3<f64>, cell: UnitCell) -> Self {
        Self {
            a_matrix,
            u_matrix,
            cell,
        }
    }

    /// Render the fixed-width text form.
    pub fn format(&self) -> String {
        let mut out = String::new();
        for row in matrix_rows(self.a_matrix.matrix()) {
            out.push_str(&row);
            out.push('\n');
        }
        out.push_str(MISSET_ROW);
        out.push('\n');
        for row in matrix_rows(&self.u_matrix) {
            out.push_str(&row);
            out.push('\n');
        }
        out.push_str(&format!(
            " {:11.4} {:11.4} {:11.4} {:11.4} {:11.4} {:11.4}\n",
            self.cell.a, self.cell.b, self.cell.c, self.cell.alpha, self.cell.beta, self.cell.gamma
        ));
        out.push_str(MISSET_ROW);
        out.push('\n');
        out
    }

    /// Parse the fixed-width text form. Misset rows are read and ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let rows: Vec<Vec<f64>> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(parse_float_row)
            .collect::<Result<_>>()?;

        if rows.len() != 9 {
            return Err(ProcessError::Parse {
                line: text.lines().next().unwrap_or("").to_string(),
                reason: format!("matrix file has {} rows, expected 9", rows.len()),
            });
        }

        let triple = |row: &Vec<f64>| -> Result<[f64; 3]> {
            if row.len() != 3 {
                return Err(ProcessError::Parse {
                    line: format!("{:?}", row),
                    reason: "expected 3 values".to_string(),
                });
            }
            Ok([row[0], row[1], row[2]])
        };

        let a = OrientationMatrix::from_rows(triple(&rows[0])?, triple(&rows[1])?, triple(&rows[2])?);
        let u0 = triple(&rows[4])?;
        let u1 = triple(&rows[5])?;
        let u2 = triple(&rows[6])?;
        let u = Matrix3::new(
            u0[0], u0[1], u0[2], u1[0], u1[1], u1[2], u2[0], u2[1], u2[2],
        );

        if rows[7].len() != 6 {
            return Err(ProcessError::Parse {
                line: format!("{:?}", rows[7]),
                reason: "cell row must hold 6 values".to_string(),
            });
        }
        let cell = UnitCell::new(
            rows[7][0], rows[7][1], rows[7][2], rows[7][3], rows[7][4], rows[7][5],
        );

        Ok(Self::new(a, u, cell))
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.format())
            .map_err(|e| ProcessError::io(path.display().to_string(), e))
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProcessError::io(path.display().to_string(), e))?;
        Self::parse(&text)
    }
}

fn parse_float_row(line: &str) -> Result<Vec<f64>> {
    line.split_whitespace()
        .map(|tok| {
            tok.parse::<f64>().map_err(|_| ProcessError::Parse {
                line: line.to_string(),
                reason: format!("bad float {:?}", tok),
            })
        })
        .collect()
}
