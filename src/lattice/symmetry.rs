//! Systematic absence rules for centred lattices.

use crate::data::Centering;

/// True when `(h, k, l)` is systematically absent under the centering
/// translations alone. Rhombohedral lattices are taken in the obverse
/// hexagonal setting.
pub fn is_centring_absent(centering: Centering, hkl: [i32; 3]) -> bool {
    let [h, k, l] = hkl;
    match centering {
        Centering::Primitive => false,
        Centering::AFace => (k + l).rem_euclid(2) != 0,
        Centering::BFace => (h + l).rem_euclid(2) != 0,
        Centering::CFace => (h + k).rem_euclid(2) != 0,
        Centering::BodyCentred => (h + k + l).rem_euclid(2) != 0,
        Centering::FaceCentred => {
            let parities = [h.rem_euclid(2), k.rem_euclid(2), l.rem_euclid(2)];
            parities != [0, 0, 0] && parities != [1, 1, 1]
        }
        Centering::Rhombohedral => (-h + k + l).rem_euclid(3) != 0,
    }
}
