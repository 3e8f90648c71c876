//! XML processing profiles
//!
//! A profile bundles the QA flag table, index definitions, rescale groups
//! and an optional composite section:
//!
//! ```xml
//! <profile name="landsat8_c2_l2">
//!     <qualityMask band="QA_PIXEL">
//!         <flag name="cloud" bit="3" disqualifying="true"/>
//!         <flag name="clear" bit="6"/>
//!     </qualityMask>
//!     <index name="NDVI" a="SR_B5" b="SR_B4"/>
//!     <rescale match="SR_B." scale="0.0000275" offset="-0.2"/>
//!     <composite start="2023-01-01" end="2025-01-01" months="1" reducer="median"/>
//! </profile>
//! ```
//!
//! Elements of the same kind must be adjacent.

use crate::core::composite::{BucketConfig, BucketWidth, TemporalCompositor};
use crate::core::indices::IndexSpec;
use crate::core::masking::BitFlagMask;
use crate::core::pipeline::{Pipeline, PipelineConfig, QualityMaskConfig};
use crate::core::reducer::Reducer;
use crate::core::rescale::RescaleGroup;
use crate::types::{RasterError, RasterResult};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::path::Path;

/// Bundled Landsat 8/9 Collection 2 Level 2 profile
pub const LANDSAT8_C2_L2_PROFILE: &str = include_str!("../../profiles/landsat8_c2_l2.xml");

#[derive(Debug, Deserialize)]
struct ProfileXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "qualityMask", default)]
    quality_mask: Option<QualityMaskXml>,
    #[serde(rename = "index", default)]
    indices: Vec<IndexXml>,
    #[serde(rename = "rescale", default)]
    rescale: Vec<RescaleXml>,
    #[serde(rename = "composite", default)]
    composite: Option<CompositeXml>,
}

#[derive(Debug, Deserialize)]
struct QualityMaskXml {
    #[serde(rename = "@band")]
    band: String,
    #[serde(rename = "flag", default)]
    flags: Vec<FlagXml>,
}

#[derive(Debug, Deserialize)]
struct FlagXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@bit")]
    bit: u32,
    #[serde(rename = "@disqualifying", default)]
    disqualifying: bool,
}

#[derive(Debug, Deserialize)]
struct IndexXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@a")]
    band_a: String,
    #[serde(rename = "@b")]
    band_b: String,
}

#[derive(Debug, Deserialize)]
struct RescaleXml {
    #[serde(rename = "@match")]
    pattern: String,
    #[serde(rename = "@scale")]
    scale: f64,
    #[serde(rename = "@offset")]
    offset: f64,
}

#[derive(Debug, Deserialize)]
struct CompositeXml {
    #[serde(rename = "@start")]
    start: String,
    #[serde(rename = "@end", default)]
    end: Option<String>,
    #[serde(rename = "@count", default)]
    count: Option<usize>,
    #[serde(rename = "@months", default)]
    months: Option<u32>,
    #[serde(rename = "@days", default)]
    days: Option<u32>,
    #[serde(rename = "@reducer", default)]
    reducer: Option<String>,
}

/// Composite section of a profile
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeProfile {
    pub buckets: BucketConfig,
    pub reducer: Reducer,
}

/// Parsed processing profile
#[derive(Debug, Clone)]
pub struct ProcessingProfile {
    pub name: String,
    pub pipeline: PipelineConfig,
    pub composite: Option<CompositeProfile>,
}

impl ProcessingProfile {
    /// Parse profile XML
    pub fn parse(xml_content: &str) -> RasterResult<Self> {
        let raw = from_str::<ProfileXml>(xml_content)
            .map_err(|e| RasterError::XmlParsing(format!("Failed to parse profile XML: {}", e)))?;

        let quality_mask = raw.quality_mask.map(convert_quality_mask).transpose()?;

        let indices = raw
            .indices
            .into_iter()
            .map(|i| IndexSpec::new(i.name, i.band_a, i.band_b))
            .collect();

        let rescale = raw
            .rescale
            .iter()
            .map(|r| RescaleGroup::new(&r.pattern, r.scale, r.offset))
            .collect::<RasterResult<Vec<_>>>()?;

        let composite = raw.composite.map(convert_composite).transpose()?;

        log::info!(
            "Loaded profile '{}' (QA mask: {}, composite: {})",
            raw.name,
            quality_mask.is_some(),
            composite.is_some()
        );

        Ok(Self {
            name: raw.name,
            pipeline: PipelineConfig {
                quality_mask,
                indices,
                rescale,
            },
            composite,
        })
    }

    /// Read and parse a profile file
    pub fn from_file<P: AsRef<Path>>(path: P) -> RasterResult<Self> {
        let path = path.as_ref();
        log::debug!("Reading profile {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// The bundled Landsat 8/9 Collection 2 Level 2 profile
    pub fn landsat8_c2_l2() -> RasterResult<Self> {
        Self::parse(LANDSAT8_C2_L2_PROFILE)
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.pipeline.clone())
    }

    /// Compositor for the composite section, `None` if the profile has none
    pub fn compositor(&self) -> RasterResult<Option<TemporalCompositor>> {
        self.composite
            .as_ref()
            .map(|c| TemporalCompositor::new(c.buckets.clone(), c.reducer))
            .transpose()
    }
}

fn convert_quality_mask(raw: QualityMaskXml) -> RasterResult<QualityMaskConfig> {
    // A bare <qualityMask band=".."/> uses the Landsat QA_PIXEL layout
    if raw.flags.is_empty() {
        return Ok(QualityMaskConfig {
            band: raw.band,
            flags: BitFlagMask::landsat_qa_pixel(),
        });
    }

    let disqualifying: Vec<&str> = raw
        .flags
        .iter()
        .filter(|f| f.disqualifying)
        .map(|f| f.name.as_str())
        .collect();
    let flags = BitFlagMask::new(raw.flags.iter().map(|f| (f.name.as_str(), f.bit)))?
        .with_disqualifying(disqualifying)?;

    Ok(QualityMaskConfig {
        band: raw.band,
        flags,
    })
}

fn convert_composite(raw: CompositeXml) -> RasterResult<CompositeProfile> {
    let width = match (raw.months, raw.days) {
        (Some(_), Some(_)) => {
            return Err(RasterError::Config(
                "composite width takes either months or days, not both".to_string(),
            ))
        }
        (Some(months), None) => BucketWidth::Months(months),
        (None, Some(days)) => BucketWidth::Days(days),
        (None, None) => BucketWidth::Months(1),
    };

    let start = parse_time(&raw.start)?;
    let buckets = match (raw.count, raw.end.as_deref()) {
        (Some(count), None) => BucketConfig::new(start, width, count),
        (None, Some(end)) => BucketConfig::spanning(start, parse_time(end)?, width)?,
        _ => {
            return Err(RasterError::Config(
                "composite needs exactly one of count or end".to_string(),
            ))
        }
    };

    let reducer = match raw.reducer.as_deref() {
        Some(name) => name.parse()?,
        None => Reducer::Median,
    };

    Ok(CompositeProfile { buckets, reducer })
}

/// RFC 3339 timestamp or `YYYY-MM-DD` (midnight UTC)
fn parse_time(value: &str) -> RasterResult<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| RasterError::Config(format!("invalid date '{}': {}", value, e)))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| RasterError::Config(format!("invalid date '{}'", value)))?;
    Ok(Utc.from_utc_datetime(&midnight))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_profile() {
        let profile = ProcessingProfile::landsat8_c2_l2().unwrap();
        assert_eq!(profile.name, "landsat8_c2_l2");

        let qa = profile.pipeline.quality_mask.as_ref().unwrap();
        assert_eq!(qa.band, "QA_PIXEL");
        assert_eq!(qa.flags, BitFlagMask::landsat_qa_pixel());

        assert_eq!(profile.pipeline.indices, vec![IndexSpec::ndvi(), IndexSpec::nbr()]);
        assert_eq!(profile.pipeline.rescale[0], RescaleGroup::landsat_optical());
        assert_eq!(profile.pipeline.rescale[1], RescaleGroup::landsat_thermal());

        let composite = profile.composite.as_ref().unwrap();
        assert_eq!(composite.buckets.count, 24);
        assert_eq!(composite.buckets.width, BucketWidth::Months(1));
        assert_eq!(composite.reducer, Reducer::Median);
        assert_eq!(profile.compositor().unwrap().unwrap().buckets().len(), 24);
    }

    #[test]
    fn test_minimal_profile_defaults() {
        let xml = r#"<profile name="minimal">
            <qualityMask band="QA_PIXEL"/>
            <composite start="2024-03-01T00:00:00Z" count="6" days="16" reducer="max"/>
        </profile>"#;
        let profile = ProcessingProfile::parse(xml).unwrap();

        assert!(profile.pipeline.indices.is_empty());
        assert!(profile.pipeline.rescale.is_empty());
        let composite = profile.composite.unwrap();
        assert_eq!(composite.buckets.width, BucketWidth::Days(16));
        assert_eq!(composite.buckets.count, 6);
        assert_eq!(composite.reducer, Reducer::Max);
    }

    #[test]
    fn test_profile_errors() {
        let unknown_reducer = r#"<profile name="x">
            <composite start="2024-01-01" count="2" reducer="mode"/>
        </profile>"#;
        assert!(matches!(
            ProcessingProfile::parse(unknown_reducer),
            Err(RasterError::InvalidParameter(_))
        ));

        let both_widths = r#"<profile name="x">
            <composite start="2024-01-01" count="2" months="1" days="3"/>
        </profile>"#;
        assert!(matches!(ProcessingProfile::parse(both_widths), Err(RasterError::Config(_))));

        let bad_date = r#"<profile name="x">
            <composite start="01/02/2024" count="2"/>
        </profile>"#;
        assert!(matches!(ProcessingProfile::parse(bad_date), Err(RasterError::Config(_))));

        let bad_pattern = r#"<profile name="x">
            <rescale match="SR_B(" scale="1.0" offset="0.0"/>
        </profile>"#;
        assert!(matches!(
            ProcessingProfile::parse(bad_pattern),
            Err(RasterError::InvalidParameter(_))
        ));

        assert!(matches!(
            ProcessingProfile::parse("<profile"),
            Err(RasterError::XmlParsing(_))
        ));
    }

    #[test]
    fn test_zero_count_rejected_when_building_compositor() {
        let xml = r#"<profile name="x">
            <composite start="2024-01-01" count="0"/>
        </profile>"#;
        let profile = ProcessingProfile::parse(xml).unwrap();
        assert!(matches!(
            profile.compositor(),
            Err(RasterError::InvalidBucketConfig(_))
        ));
    }
}
