use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::frame::{Hsv, HsvImage, Mask};
use crate::config::{self, ConfigError};

/// Inclusive per-channel HSV bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsvBand {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvBand {
    pub fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, Hsv(px): Hsv) -> bool {
        (0..3).all(|c| px[c] >= self.lower[c] && px[c] <= self.upper[c])
    }
}

/// Calibrated range for one card color. Two bands when the hue wraps around 0/179.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorRange {
    name: String,
    primary: HsvBand,
    wrap: Option<HsvBand>,
}

impl ColorRange {
    pub fn single(name: impl Into<String>, band: HsvBand) -> Self {
        Self { name: name.into(), primary: band, wrap: None }
    }

    pub fn split(name: impl Into<String>, first: HsvBand, second: HsvBand) -> Self {
        Self { name: name.into(), primary: first, wrap: Some(second) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bands(&self) -> impl Iterator<Item = &HsvBand> {
        std::iter::once(&self.primary).chain(self.wrap.as_ref())
    }

    pub fn contains(&self, hsv: Hsv) -> bool {
        self.bands().any(|b| b.contains(hsv))
    }

    /// Membership mask of this color. Split ranges are the OR of both band masks.
    pub fn membership(&self, hsv: &HsvImage) -> Mask {
        let mut mask = band_mask(&self.primary, hsv);
        if let Some(wrap) = &self.wrap {
            mask.union(&band_mask(wrap, hsv));
        }
        mask
    }
}

fn band_mask(band: &HsvBand, hsv: &HsvImage) -> Mask {
    let mut mask = Mask::empty(hsv.width(), hsv.height());
    for y in 0..hsv.height() {
        for x in 0..hsv.width() {
            if hsv.get(x, y).is_some_and(|px| band.contains(px)) {
                mask.set(x, y, true);
            }
        }
    }
    mask
}

// On-disk shape of one entry in `hsv_ranges.json`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRange {
    Split {
        lower1: [u8; 3],
        upper1: [u8; 3],
        lower2: [u8; 3],
        upper2: [u8; 3],
    },
    Single {
        lower: [u8; 3],
        upper: [u8; 3],
    },
}

fn checked_band(color: &str, lower: [u8; 3], upper: [u8; 3]) -> Result<HsvBand, ConfigError> {
    if (0..3).any(|c| lower[c] > upper[c]) {
        return Err(ConfigError::InvalidRange {
            color: color.to_owned(),
            reason: format!("lower {lower:?} exceeds upper {upper:?}"),
        });
    }
    if lower[0] > 179 {
        return Err(ConfigError::InvalidRange {
            color: color.to_owned(),
            reason: format!("hue {} is outside 0..=179", lower[0]),
        });
    }
    Ok(HsvBand::new(lower, upper))
}

/// Parse a color range table. Entries come back sorted by color name.
pub fn parse_ranges(json: &str) -> Result<Vec<ColorRange>, ConfigError> {
    let raw: BTreeMap<String, RawRange> =
        serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            what: "color range table".into(),
            source,
        })?;
    if raw.is_empty() {
        return Err(ConfigError::NoRanges);
    }
    raw.into_iter()
        .map(|(name, r)| match r {
            RawRange::Single { lower, upper } => {
                Ok(ColorRange::single(name.clone(), checked_band(&name, lower, upper)?))
            }
            RawRange::Split { lower1, upper1, lower2, upper2 } => {
                let first = checked_band(&name, lower1, upper1)?;
                let second = checked_band(&name, lower2, upper2)?;
                Ok(ColorRange::split(name, first, second))
            }
        })
        .collect()
}

/// Load the color range table from disk.
pub fn load_ranges(path: &Path) -> Result<Vec<ColorRange>, ConfigError> {
    let ranges = parse_ranges(&config::read_file(path)?)?;
    tracing::info!(path = %path.display(), colors = ranges.len(), "color ranges loaded");
    Ok(ranges)
}
