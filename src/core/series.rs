//! Regional statistics and per-band time series for chart/export consumers

use crate::core::reducer::Reducer;
use crate::types::{RasterImage, RasterResult, ValidityMask};
use chrono::{DateTime, Utc};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// One observation of a band time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub time: DateTime<Utc>,
    pub image_id: String,
    /// `None` when no valid pixel lies inside the region
    pub value: Option<f64>,
    pub pixel_count: usize,
}

/// Reduce the valid pixels of `band` inside `region` (whole image if `None`)
pub fn region_reduce(
    image: &RasterImage,
    band: &str,
    region: Option<&ValidityMask>,
    reducer: Reducer,
) -> RasterResult<Option<f64>> {
    let mut values = region_values(image, band, region)?;
    Ok(reducer.reduce(&mut values))
}

fn region_values(
    image: &RasterImage,
    band: &str,
    region: Option<&ValidityMask>,
) -> RasterResult<Vec<f64>> {
    let band = image.require_band(band)?;
    if let Some(region) = region {
        image.grid().ensure_shape(region.dim(), "region mask")?;
    }

    let mut values = Vec::new();
    match region {
        Some(region) => Zip::from(band.data())
            .and(band.mask())
            .and(region)
            .for_each(|&v, &valid, &inside| {
                if valid && inside {
                    values.push(v);
                }
            }),
        None => Zip::from(band.data())
            .and(band.mask())
            .for_each(|&v, &valid| {
                if valid {
                    values.push(v);
                }
            }),
    }
    Ok(values)
}

/// Regional statistic of `band` for every image, ordered by acquisition time
pub fn time_series(
    images: &[RasterImage],
    band: &str,
    region: Option<&ValidityMask>,
    reducer: Reducer,
) -> RasterResult<Vec<SeriesPoint>> {
    let mut points = Vec::with_capacity(images.len());
    for image in images {
        let mut values = region_values(image, band, region)?;
        let pixel_count = values.len();
        points.push(SeriesPoint {
            time: image.time_start(),
            image_id: image.id().to_string(),
            value: reducer.reduce(&mut values),
            pixel_count,
        });
    }
    points.sort_by_key(|p| p.time);

    log::debug!(
        "{} series of '{}' over {} images, {} with data",
        reducer,
        band,
        points.len(),
        points.iter().filter(|p| p.value.is_some()).count()
    );
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Band, GridSpec, RasterError};
    use chrono::TimeZone;
    use ndarray::Array2;

    fn ndvi_image(id: &str, day: u32, values: Vec<f64>) -> RasterImage {
        let time = Utc.with_ymd_and_hms(2024, 4, day, 0, 0, 0).unwrap();
        RasterImage::new(id, time, GridSpec::new(2, 2))
            .with_band(Band::new("NDVI", Array2::from_shape_vec((2, 2), values).unwrap()))
            .unwrap()
    }

    #[test]
    fn test_region_mean_ignores_masked_and_outside() {
        let image = ndvi_image("a", 1, vec![0.2, 0.4, f64::NAN, 0.9]);
        let mut region = ValidityMask::from_elem((2, 2), true);
        region[[1, 1]] = false;

        let mean = region_reduce(&image, "NDVI", Some(&region), Reducer::Mean).unwrap();
        assert!((mean.unwrap() - 0.3).abs() < 1e-12);

        let whole = region_reduce(&image, "NDVI", None, Reducer::Max).unwrap();
        assert_eq!(whole, Some(0.9));
    }

    #[test]
    fn test_region_shape_checked() {
        let image = ndvi_image("a", 1, vec![0.0; 4]);
        let region = ValidityMask::from_elem((3, 3), true);
        let result = region_reduce(&image, "NDVI", Some(&region), Reducer::Mean);
        assert!(matches!(result, Err(RasterError::ShapeMismatch(_))));
    }

    #[test]
    fn test_series_sorted_with_gaps() {
        let images = vec![
            ndvi_image("late", 20, vec![0.5; 4]),
            ndvi_image("empty", 10, vec![f64::NAN; 4]),
            ndvi_image("early", 2, vec![0.1; 4]),
        ];
        let series = time_series(&images, "NDVI", None, Reducer::Mean).unwrap();

        let ids: Vec<&str> = series.iter().map(|p| p.image_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "empty", "late"]);
        assert_eq!(series[1].value, None);
        assert_eq!(series[1].pixel_count, 0);
        assert_eq!(series[2].value, Some(0.5));
    }
}
