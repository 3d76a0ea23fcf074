//! Integrated reflection records and merge ordering.

/// One integrated reflection as emitted by an integration backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reflection {
    pub hkl: [i32; 3],
    /// Batch (image) number the reflection was measured on.
    pub batch: u32,
    pub intensity: f64,
    pub sigma: f64,
}

impl Reflection {
    pub fn new(hkl: [i32; 3], batch: u32, intensity: f64, sigma: f64) -> Self {
        Self {
            hkl,
            batch,
            intensity,
            sigma,
        }
    }

    /// Deterministic merge key.
    pub fn sort_key(&self) -> ([i32; 3], u32) {
        (self.hkl, self.batch)
    }
}

/// Sort reflections into the canonical (h, k, l, batch) order.
pub fn sort_reflections(reflections: &mut [Reflection]) {
    reflections.sort_by_key(|r| r.sort_key());
}
