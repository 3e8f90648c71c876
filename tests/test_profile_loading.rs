use anyhow::Result;
use chrono::{TimeZone, Utc};
use ndarray::Array2;
use rasterseries::core::{BucketWidth, Reducer, NBR, NDVI};
use rasterseries::io::ProcessingProfile;
use rasterseries::types::{Band, GridSpec, PropertyValue, RasterError, RasterImage};
use std::io::Write;
use tempfile::NamedTempFile;

const SEASONAL_PROFILE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<profile name="sentinel_like_seasonal">
    <qualityMask band="QA">
        <flag name="nodata" bit="0" disqualifying="true"/>
        <flag name="cloud" bit="10" disqualifying="true"/>
        <flag name="cirrus" bit="11"/>
    </qualityMask>
    <index name="NDWI" a="B3" b="B8"/>
    <rescale match="B.*" scale="0.0001" offset="0.0"/>
    <composite start="2022-03-01T00:00:00Z" count="4" months="3" reducer="max"/>
</profile>
"#;

fn landsat_scene(id: &str, month: u32, qa_value: u16) -> Result<RasterImage> {
    let time = Utc.with_ymd_and_hms(2024, month, 8, 10, 40, 0).unwrap();
    let shape = (2, 2);
    let image = RasterImage::new(id, time, GridSpec::new(2, 2).with_epsg(32633))
        .with_band(Band::new("SR_B4", Array2::from_elem(shape, 3000.0)))?
        .with_band(Band::new("SR_B5", Array2::from_elem(shape, 5000.0)))?
        .with_band(Band::new("SR_B7", Array2::from_elem(shape, 2000.0)))?
        .with_band(Band::new("ST_B10", Array2::from_elem(shape, 45000.0)))?
        .with_band(Band::from_integers("QA_PIXEL", &Array2::from_elem(shape, qa_value)))?;
    Ok(image)
}

#[test]
fn test_profile_from_file() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut file = NamedTempFile::new()?;
    file.write_all(SEASONAL_PROFILE.as_bytes())?;
    file.flush()?;

    let profile = ProcessingProfile::from_file(file.path())?;
    assert_eq!(profile.name, "sentinel_like_seasonal");

    let qa = profile.pipeline.quality_mask.as_ref().expect("quality mask section");
    assert_eq!(qa.band, "QA");
    assert_eq!(qa.flags.bit("cloud"), Some(10));
    assert_eq!(qa.flags.disqualifying_bits(), (1 << 0) | (1 << 10));
    assert!(qa.flags.is_valid_value(1u16 << 11));

    let composite = profile.composite.as_ref().expect("composite section");
    assert_eq!(composite.buckets.width, BucketWidth::Months(3));
    assert_eq!(composite.reducer, Reducer::Max);

    let compositor = profile.compositor()?.expect("compositor");
    let buckets = compositor.buckets();
    assert_eq!(buckets.len(), 4);
    assert_eq!(buckets[3].start, Utc.with_ymd_and_hms(2022, 12, 1, 0, 0, 0).unwrap());
    assert_eq!(buckets[3].end, Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap());
    Ok(())
}

#[test]
fn test_missing_profile_file() {
    let result = ProcessingProfile::from_file("/nonexistent/profile.xml");
    assert!(matches!(result, Err(RasterError::Io(_))));
}

#[test]
fn test_bundled_profile_pipeline_run() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let profile = ProcessingProfile::landsat8_c2_l2()?;
    let pipeline = profile.pipeline();
    let compositor = profile.compositor()?.expect("bundled profile composites");

    let images = vec![
        landsat_scene("LC08_clear_mar", 3, 1 << 6)?,
        landsat_scene("LC08_cloudy_mar", 3, 1 << 3)?,
        landsat_scene("LC09_water_jul", 7, 1 << 7)?,
    ];
    let report = pipeline.process_composites(&images, &compositor)?;

    assert!(report.failures.is_empty());
    assert_eq!(report.composites.len(), 24);

    let march = &report.composites[14];
    assert_eq!(march.property("image_count"), Some(&PropertyValue::Int(2)));
    // the cloudy scene is fully masked, the clear one alone contributes
    let ndvi = march.band(NDVI).expect("NDVI band");
    assert_eq!(ndvi.valid_count(), 4);
    assert!((ndvi.value(0, 0).unwrap() - 0.25).abs() < 1e-12);

    let nbr = march.band(NBR).expect("NBR band");
    assert!((nbr.value(1, 1).unwrap() - 3000.0 / 7000.0).abs() < 1e-12);

    let thermal = march.band("ST_B10").expect("thermal band");
    assert!((thermal.value(0, 1).unwrap() - (45000.0 * 0.00341802 + 149.0)).abs() < 1e-9);

    // water is not a disqualifying flag
    let july = &report.composites[18];
    assert_eq!(july.band(NDVI).unwrap().valid_count(), 4);

    let empty = &report.composites[0];
    assert_eq!(empty.property("image_count"), Some(&PropertyValue::Int(0)));
    assert_eq!(empty.band(NDVI).unwrap().valid_count(), 0);
    Ok(())
}
