//! Image wedges and sweep geometry.

use crate::error::{ProcessError, Result};

/// An inclusive range of image numbers within a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageWedge {
    start: u32,
    end: u32,
}

impl ImageWedge {
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start > end {
            return Err(ProcessError::Indexing {
                reason: format!("invalid wedge {}..{}", start, end),
            });
        }
        Ok(Self { start, end })
    }

    /// A wedge covering a single image.
    pub fn single(image: u32) -> Self {
        Self {
            start: image,
            end: image,
        }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of images covered, inclusive at both ends.
    pub fn len(&self) -> u32 {
        1 + self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, image: u32) -> bool {
        image >= self.start && image <= self.end
    }
}

impl std::fmt::Display for ImageWedge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// A contiguous run of diffraction images collected under constant
/// conditions, reduced to what indexing and integration need.
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
    /// Image filename template, e.g. `insulin_1_####.img`.
    pub template: String,
    /// Directory holding the images.
    pub directory: String,
    /// First image number in the sweep.
    pub first_image: u32,
    /// Last image number in the sweep.
    pub last_image: u32,
    /// Rotation start of the first image, degrees.
    pub phi_start: f64,
    /// Rotation width per image, degrees.
    pub phi_width: f64,
}

impl Sweep {
    pub fn new(
        template: impl Into<String>,
        directory: impl Into<String>,
        first_image: u32,
        last_image: u32,
        phi_start: f64,
        phi_width: f64,
    ) -> Result<Self> {
        if first_image > last_image {
            return Err(ProcessError::Indexing {
                reason: format!("empty sweep {}..{}", first_image, last_image),
            });
        }
        if phi_width <= 0.0 {
            return Err(ProcessError::Indexing {
                reason: format!("non-positive phi width {}", phi_width),
            });
        }
        Ok(Self {
            template: template.into(),
            directory: directory.into(),
            first_image,
            last_image,
            phi_start,
            phi_width,
        })
    }

    pub fn image_count(&self) -> u32 {
        1 + self.last_image - self.first_image
    }

    pub fn contains(&self, image: u32) -> bool {
        image >= self.first_image && image <= self.last_image
    }

    /// The whole sweep as one wedge.
    pub fn full_wedge(&self) -> ImageWedge {
        ImageWedge {
            start: self.first_image,
            end: self.last_image,
        }
    }

    /// Image number whose rotation start is closest to `degrees` past the
    /// sweep start, if the sweep extends that far.
    pub fn image_at_rotation(&self, degrees: f64) -> Option<u32> {
        let offset = (degrees / self.phi_width).round() as u32;
        let image = self.first_image + offset;
        if self.contains(image) {
            Some(image)
        } else {
            None
        }
    }

    /// Rotation angle at the start of `image`, degrees.
    pub fn phi_for_image(&self, image: u32) -> f64 {
        self.phi_start + (image as f64 - self.first_image as f64) * self.phi_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wedge_invariant() {
        assert!(ImageWedge::new(1, 90).is_ok());
        assert!(ImageWedge::new(5, 5).is_ok());
        assert!(ImageWedge::new(6, 5).is_err());
    }

    #[test]
    fn test_wedge_len() {
        assert_eq!(ImageWedge::new(1, 30).unwrap().len(), 30);
        assert_eq!(ImageWedge::single(7).len(), 1);
    }

    fn sweep_90() -> Sweep {
        Sweep::new("x_####.img", "/data", 1, 90, 0.0, 1.0).unwrap()
    }

    #[test]
    fn test_image_at_rotation() {
        let sweep = sweep_90();
        assert_eq!(sweep.image_at_rotation(0.0), Some(1));
        assert_eq!(sweep.image_at_rotation(45.0), Some(46));
        assert_eq!(sweep.image_at_rotation(89.0), Some(90));
        assert_eq!(sweep.image_at_rotation(90.0), None);
    }

    #[test]
    fn test_phi_for_image() {
        let sweep = Sweep::new("x_####.img", "/data", 10, 100, 12.0, 0.5).unwrap();
        assert!((sweep.phi_for_image(10) - 12.0).abs() < 1e-12);
        assert!((sweep.phi_for_image(12) - 13.0).abs() < 1e-12);
    }

    #[test]
    fn test_sweep_validation() {
        assert!(Sweep::new("t", "d", 5, 4, 0.0, 1.0).is_err());
        assert!(Sweep::new("t", "d", 1, 4, 0.0, 0.0).is_err());
    }
}
