//! Spot records from an external spot finder.

use crate::error::{ProcessError, Result};

/// One found spot: detector position in pixels, frame it appeared on,
/// measured intensity and sigma, optionally a pre-assigned (h,k,l).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotRecord {
    pub x: f64,
    pub y: f64,
    pub frame: u32,
    pub intensity: f64,
    pub sigma: f64,
    pub hkl: Option<[i32; 3]>,
}

impl SpotRecord {
    pub fn new(x: f64, y: f64, frame: u32, intensity: f64, sigma: f64) -> Self {
        Self {
            x,
            y,
            frame,
            intensity,
            sigma,
            hkl: None,
        }
    }

    pub fn with_hkl(mut self, hkl: [i32; 3]) -> Self {
        self.hkl = Some(hkl);
        self
    }

    /// Signal to noise; infinite when sigma is zero or negative.
    pub fn i_over_sigma(&self) -> f64 {
        if self.sigma > 0.0 {
            self.intensity / self.sigma
        } else {
            f64::INFINITY
        }
    }

    /// Parse one interchange line: `x y frame intensity [sigma] [h k l]`.
    /// Records without a sigma never fail the signal cut.
    pub fn parse(line: &str) -> Result<Self> {
        let toks: Vec<&str> = line.split_whitespace().collect();
        if !matches!(toks.len(), 4 | 5 | 7 | 8) {
            return Err(ProcessError::Parse {
                line: line.to_string(),
                reason: format!("expected 4, 5, 7 or 8 fields, got {}", toks.len()),
            });
        }
        let has_sigma = toks.len() == 5 || toks.len() == 8;

        let float = |tok: &str| -> Result<f64> {
            tok.parse().map_err(|_| ProcessError::Parse {
                line: line.to_string(),
                reason: format!("bad float {:?}", tok),
            })
        };
        let int = |tok: &str| -> Result<i32> {
            tok.parse().map_err(|_| ProcessError::Parse {
                line: line.to_string(),
                reason: format!("bad integer {:?}", tok),
            })
        };

        let sigma = if has_sigma { float(toks[4])? } else { 0.0 };
        let mut spot = SpotRecord::new(
            float(toks[0])?,
            float(toks[1])?,
            float(toks[2])? as u32,
            float(toks[3])?,
            sigma,
        );
        if toks.len() >= 7 {
            let rest = &toks[toks.len() - 3..];
            spot.hkl = Some([int(rest[0])?, int(rest[1])?, int(rest[2])?]);
        }
        Ok(spot)
    }

    /// Render the interchange line.
    pub fn format(&self) -> String {
        match self.hkl {
            Some([h, k, l]) => format!(
                "{:.2} {:.2} {} {:.2} {:.2} {} {} {}",
                self.x, self.y, self.frame, self.intensity, self.sigma, h, k, l
            ),
            None => format!(
                "{:.2} {:.2} {} {:.2} {:.2}",
                self.x, self.y, self.frame, self.intensity, self.sigma
            ),
        }
    }
}

/// Parse a whole spot list, one record per line, blank lines skipped.
pub fn parse_spot_list(text: &str) -> Result<Vec<SpotRecord>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(SpotRecord::parse)
        .collect()
}
