//! Normalized-difference spectral indices
//!
//! Indices must be computed on raw digital numbers, before any additive
//! offset is applied to the source bands: `(a*s + o - b*s - o) / (a*s + b*s + 2o)`
//! is not `(a - b) / (a + b)` once `o != 0`.

use crate::types::{Band, BandData, RasterImage, RasterResult, ValidityMask};
use ndarray::Zip;

/// Output band name of the vegetation index
pub const NDVI: &str = "NDVI";
/// Output band name of the burn ratio
pub const NBR: &str = "NBR";

/// Definition of one `(a - b) / (a + b)` index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub band_a: String,
    pub band_b: String,
}

impl IndexSpec {
    pub fn new(
        name: impl Into<String>,
        band_a: impl Into<String>,
        band_b: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            band_a: band_a.into(),
            band_b: band_b.into(),
        }
    }

    /// Landsat 8/9 NDVI: (NIR - Red) / (NIR + Red)
    pub fn ndvi() -> Self {
        Self::new(NDVI, "SR_B5", "SR_B4")
    }

    /// Landsat 8/9 NBR: (NIR - SWIR2) / (NIR + SWIR2)
    pub fn nbr() -> Self {
        Self::new(NBR, "SR_B5", "SR_B7")
    }
}

/// Compute `(a - b) / (a + b)` into band `output` of a copy of `image`
///
/// The output pixel is invalid where either input is invalid or where
/// `a + b == 0`; no error is raised for a zero denominator. An existing band
/// named `output` is overwritten in place.
pub fn normalized_difference(
    image: &RasterImage,
    band_a: &str,
    band_b: &str,
    output: &str,
) -> RasterResult<RasterImage> {
    let a = image.require_band(band_a)?;
    let b = image.require_band(band_b)?;

    let shape = image.shape();
    let mut data = BandData::from_elem(shape, f64::NAN);
    let mut mask = ValidityMask::from_elem(shape, false);
    let mut undefined = 0usize;

    Zip::from(&mut data)
        .and(&mut mask)
        .and(a.data())
        .and(b.data())
        .and(a.mask())
        .and(b.mask())
        .for_each(|value, valid, &va, &vb, &ma, &mb| {
            if !(ma && mb) {
                return;
            }
            let sum = va + vb;
            if sum == 0.0 {
                undefined += 1;
                return;
            }
            let nd = (va - vb) / sum;
            if nd.is_finite() {
                *value = nd;
                *valid = true;
            } else {
                undefined += 1;
            }
        });

    if undefined > 0 {
        log::debug!(
            "{} of '{}': {} pixels with undefined ratio masked",
            output,
            image.id(),
            undefined
        );
    }

    let mut result = image.clone();
    result.set_band(Band::with_mask(output, data, mask)?)?;
    Ok(result)
}

/// Applies a list of index definitions to images
#[derive(Debug, Clone, Default)]
pub struct IndexCalculator {
    specs: Vec<IndexSpec>,
}

impl IndexCalculator {
    pub fn new(specs: Vec<IndexSpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[IndexSpec] {
        &self.specs
    }

    /// Names of the bands this calculator writes
    pub fn output_names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    /// Compute every index in order; later specs see earlier outputs
    pub fn compute(&self, image: &RasterImage) -> RasterResult<RasterImage> {
        let mut current = image.clone();
        for spec in &self.specs {
            current = normalized_difference(&current, &spec.band_a, &spec.band_b, &spec.name)?;
        }
        Ok(current)
    }
}
