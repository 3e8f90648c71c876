/*!
 * Quality masking for multispectral rasters
 *
 * Two kinds of masks are supported:
 * - QA bitfield decoding, where each bit of an integer band flags an
 *   independent condition (fill, cloud, cloud shadow, snow, ...)
 * - Value thresholds on a band (e.g. keep NDVI > 0)
 *
 * Landsat Collection 2 QA_PIXEL bit layout:
 *   bit 0 fill, bit 1 dilated cloud, bit 2 cirrus, bit 3 cloud,
 *   bit 4 cloud shadow, bit 5 snow, bit 6 clear, bit 7 water
 */

use crate::types::{RasterError, RasterImage, RasterResult, ValidityMask};
use ndarray::{Array2, Zip};
use num_traits::{PrimInt, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Name of the Landsat Collection 2 pixel quality band
pub const LANDSAT_QA_BAND: &str = "QA_PIXEL";

/// Landsat Collection 2 QA_PIXEL flag table
pub const LANDSAT_QA_FLAGS: [(&str, u32); 8] = [
    ("fill", 0),
    ("dilated_cloud", 1),
    ("cirrus", 2),
    ("cloud", 3),
    ("cloud_shadow", 4),
    ("snow", 5),
    ("clear", 6),
    ("water", 7),
];

/// Flags that fail a Landsat pixel by default
pub const LANDSAT_DISQUALIFYING: [&str; 6] =
    ["fill", "dilated_cloud", "cirrus", "cloud", "cloud_shadow", "snow"];

/// Decoder from a QA bitfield band to a validity mask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitFlagMask {
    flags: BTreeMap<String, u32>,
    disqualifying: BTreeSet<String>,
    disqualifying_bits: u64,
}

impl BitFlagMask {
    /// Create a decoder from a flag table; no flag disqualifies yet
    ///
    /// Bit positions must be below 32.
    pub fn new<I, S>(flags: I) -> RasterResult<Self>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut table = BTreeMap::new();
        for (name, bit) in flags {
            let name = name.into();
            if bit >= u32::BITS {
                return Err(RasterError::InvalidParameter(format!(
                    "bit position {} of flag '{}' exceeds {} bits",
                    bit,
                    name,
                    u32::BITS
                )));
            }
            table.insert(name, bit);
        }

        Ok(Self {
            flags: table,
            disqualifying: BTreeSet::new(),
            disqualifying_bits: 0,
        })
    }

    /// Replace the set of disqualifying flags
    pub fn with_disqualifying<I, S>(mut self, names: I) -> RasterResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut disqualifying = BTreeSet::new();
        let mut bits = 0u64;
        for name in names {
            let name = name.as_ref();
            let bit = self
                .flags
                .get(name)
                .ok_or_else(|| RasterError::UnknownFlag(name.to_string()))?;
            bits |= 1u64 << bit;
            disqualifying.insert(name.to_string());
        }
        self.disqualifying = disqualifying;
        self.disqualifying_bits = bits;
        Ok(self)
    }

    /// Landsat Collection 2 QA_PIXEL decoder failing fill, dilated cloud,
    /// cirrus, cloud, cloud shadow and snow
    pub fn landsat_qa_pixel() -> Self {
        let mut flags = BTreeMap::new();
        let mut disqualifying = BTreeSet::new();
        let mut bits = 0u64;
        for (name, bit) in LANDSAT_QA_FLAGS {
            flags.insert(name.to_string(), bit);
            if LANDSAT_DISQUALIFYING.contains(&name) {
                disqualifying.insert(name.to_string());
                bits |= 1u64 << bit;
            }
        }
        Self {
            flags,
            disqualifying,
            disqualifying_bits: bits,
        }
    }

    pub fn flags(&self) -> &BTreeMap<String, u32> {
        &self.flags
    }

    pub fn bit(&self, flag: &str) -> Option<u32> {
        self.flags.get(flag).copied()
    }

    pub fn disqualifying(&self) -> impl Iterator<Item = &str> {
        self.disqualifying.iter().map(|s| s.as_str())
    }

    /// OR of `1 << bit` over the disqualifying flags
    pub fn disqualifying_bits(&self) -> u64 {
        self.disqualifying_bits
    }

    /// True iff no disqualifying bit is set; negative values never pass
    pub fn is_valid_value<T: PrimInt>(&self, qa: T) -> bool {
        match qa.to_u64() {
            Some(v) => v & self.disqualifying_bits == 0,
            None => false,
        }
    }

    /// Decode an integer QA array into a validity mask
    pub fn decode<T: PrimInt>(&self, qa: &Array2<T>) -> ValidityMask {
        qa.mapv(|v| self.is_valid_value(v))
    }

    /// Decode a QA band stored in the image
    ///
    /// Pixels whose QA value is masked, negative or not integral fail.
    pub fn decode_band(&self, image: &RasterImage, qa_band: &str) -> RasterResult<ValidityMask> {
        let band = image.require_band(qa_band)?;
        image
            .grid()
            .ensure_shape(band.dim(), &format!("QA band '{}'", qa_band))?;

        let mut mask = ValidityMask::from_elem(band.dim(), false);
        Zip::from(&mut mask)
            .and(band.data())
            .and(band.mask())
            .for_each(|out, &value, &valid| {
                *out = valid
                    && value.fract() == 0.0
                    && value.to_u64().map_or(false, |v| v & self.disqualifying_bits == 0);
            });
        Ok(mask)
    }

    /// Narrow the image mask with the decoded QA band
    pub fn apply(&self, image: &RasterImage, qa_band: &str) -> RasterResult<RasterImage> {
        let mask = self.decode_band(image, qa_band)?;
        Self::narrow(image, &mask, qa_band)
    }

    /// Narrow the image mask with a QA array held outside the image
    pub fn apply_qa_array<T: PrimInt>(
        &self,
        image: &RasterImage,
        qa: &Array2<T>,
    ) -> RasterResult<RasterImage> {
        image.grid().ensure_shape(qa.dim(), "QA array")?;
        let mask = self.decode(qa);
        Self::narrow(image, &mask, "external QA")
    }

    fn narrow(image: &RasterImage, mask: &ValidityMask, source: &str) -> RasterResult<RasterImage> {
        let passing = mask.iter().filter(|&&m| m).count();
        log::debug!(
            "Quality mask from {} on '{}': {}/{} pixels pass",
            source,
            image.id(),
            passing,
            mask.len()
        );

        let mut masked = image.clone();
        masked.update_mask(mask)?;
        Ok(masked)
    }
}

impl Default for BitFlagMask {
    fn default() -> Self {
        Self::landsat_qa_pixel()
    }
}

/// Comparison operators for value-threshold masks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Comparison {
    pub fn test(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Ge => value >= threshold,
            Comparison::Lt => value < threshold,
            Comparison::Le => value <= threshold,
            Comparison::Eq => value == threshold,
            Comparison::Ne => value != threshold,
        }
    }
}

/// Mask of pixels where `band <op> threshold` holds
///
/// Pixels already invalid in the band are false. Apply the result with
/// [`RasterImage::update_mask`].
pub fn threshold_mask(
    image: &RasterImage,
    band: &str,
    comparison: Comparison,
    threshold: f64,
) -> RasterResult<ValidityMask> {
    let band = image.require_band(band)?;
    let mut mask = ValidityMask::from_elem(band.dim(), false);
    Zip::from(&mut mask)
        .and(band.data())
        .and(band.mask())
        .for_each(|out, &value, &valid| {
            *out = valid && comparison.test(value, threshold);
        });
    Ok(mask)
}
