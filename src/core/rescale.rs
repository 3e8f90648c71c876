use crate::types::{RasterError, RasterImage, RasterResult};
use regex::Regex;
use std::sync::LazyLock;

/// Landsat Collection 2 Level 2 surface reflectance scale factor
pub const LANDSAT_SR_SCALE: f64 = 0.0000275;
/// Landsat Collection 2 Level 2 surface reflectance offset
pub const LANDSAT_SR_OFFSET: f64 = -0.2;
/// Landsat Collection 2 Level 2 surface temperature scale factor (Kelvin)
pub const LANDSAT_ST_SCALE: f64 = 0.00341802;
/// Landsat Collection 2 Level 2 surface temperature offset (Kelvin)
pub const LANDSAT_ST_OFFSET: f64 = 149.0;

const LANDSAT_OPTICAL_PATTERN: &str = "SR_B.";
const LANDSAT_THERMAL_PATTERN: &str = "ST_B.*";

static LANDSAT_OPTICAL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:SR_B.)$").unwrap());
static LANDSAT_THERMAL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:ST_B.*)$").unwrap());

/// Band-name rule: a regular expression that must match the whole name
///
/// `SR_B.` selects `SR_B1`..`SR_B7` but not `SR_B10`; `ST_B.*` selects
/// `ST_B10` and any other suffix.
#[derive(Debug, Clone)]
pub struct BandMatch {
    pattern: String,
    regex: Regex,
}

impl BandMatch {
    pub fn new(pattern: &str) -> RasterResult<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            RasterError::InvalidParameter(format!("band pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Rule matching exactly one literal band name
    pub fn exact(name: &str) -> RasterResult<Self> {
        Self::new(&regex::escape(name))
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, band_name: &str) -> bool {
        self.regex.is_match(band_name)
    }
}

impl PartialEq for BandMatch {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl TryFrom<String> for BandMatch {
    type Error = RasterError;

    fn try_from(pattern: String) -> RasterResult<Self> {
        BandMatch::new(&pattern)
    }
}

/// Linear transform `value * scale + offset` for the bands a rule selects
#[derive(Debug, Clone, PartialEq)]
pub struct RescaleGroup {
    pub rule: BandMatch,
    pub scale: f64,
    pub offset: f64,
}

impl RescaleGroup {
    pub fn new(pattern: &str, scale: f64, offset: f64) -> RasterResult<Self> {
        if !scale.is_finite() || !offset.is_finite() {
            return Err(RasterError::InvalidParameter(format!(
                "rescale of '{}' needs finite scale and offset, got {} / {}",
                pattern, scale, offset
            )));
        }
        Ok(Self {
            rule: BandMatch::new(pattern)?,
            scale,
            offset,
        })
    }

    /// Optical surface reflectance bands `SR_B.`
    pub fn landsat_optical() -> Self {
        Self {
            rule: BandMatch {
                pattern: LANDSAT_OPTICAL_PATTERN.to_string(),
                regex: LANDSAT_OPTICAL_REGEX.clone(),
            },
            scale: LANDSAT_SR_SCALE,
            offset: LANDSAT_SR_OFFSET,
        }
    }

    /// Thermal surface temperature bands `ST_B.*`
    pub fn landsat_thermal() -> Self {
        Self {
            rule: BandMatch {
                pattern: LANDSAT_THERMAL_PATTERN.to_string(),
                regex: LANDSAT_THERMAL_REGEX.clone(),
            },
            scale: LANDSAT_ST_SCALE,
            offset: LANDSAT_ST_OFFSET,
        }
    }

    /// Multiply first, then add
    #[inline]
    pub fn apply_value(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }
}

/// Radiometric rescaler applying an ordered list of band groups
///
/// Each band is transformed by the first group whose rule matches it, at
/// most once, even if later groups match too.
#[derive(Debug, Clone, Default)]
pub struct BandRescaler {
    groups: Vec<RescaleGroup>,
}

impl BandRescaler {
    pub fn new(groups: Vec<RescaleGroup>) -> Self {
        Self { groups }
    }

    /// Landsat 8/9 Collection 2 Level 2 optical and thermal rescaling
    pub fn landsat_c2() -> Self {
        Self::new(vec![
            RescaleGroup::landsat_optical(),
            RescaleGroup::landsat_thermal(),
        ])
    }

    pub fn groups(&self) -> &[RescaleGroup] {
        &self.groups
    }

    /// First group selecting `band_name`
    pub fn group_for(&self, band_name: &str) -> Option<&RescaleGroup> {
        self.groups.iter().find(|g| g.rule.matches(band_name))
    }

    /// Rescale every matching band of a copy of `image`
    pub fn rescale(&self, image: &RasterImage) -> RasterResult<RasterImage> {
        self.rescale_excluding(image, &[])
    }

    /// Rescale matching bands except those named in `skip`
    pub fn rescale_excluding(
        &self,
        image: &RasterImage,
        skip: &[&str],
    ) -> RasterResult<RasterImage> {
        let mut output = image.clone();
        let mut rescaled = 0usize;

        for band in image.bands() {
            if skip.contains(&band.name()) {
                continue;
            }
            if let Some(group) = self.group_for(band.name()) {
                log::debug!(
                    "Rescaling '{}' of '{}' with {} * x + {}",
                    band.name(),
                    image.id(),
                    group.scale,
                    group.offset
                );
                output.set_band(band.map_values(|v| group.apply_value(v)))?;
                rescaled += 1;
            }
        }

        log::debug!(
            "Rescaled {} of {} bands in '{}'",
            rescaled,
            image.band_count(),
            image.id()
        );
        Ok(output)
    }
}
