//! Data structures for MX data reduction.

pub mod cell;
pub mod matrix;
pub mod reflection;
pub mod spot;
pub mod wedge;

pub use cell::{Centering, Lattice, LatticeSolution, UnitCell};
pub use matrix::{MatFile, OrientationMatrix};
pub use reflection::{sort_reflections, Reflection};
pub use spot::{parse_spot_list, SpotRecord};
pub use wedge::{ImageWedge, Sweep};
