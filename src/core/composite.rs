/*!
 * Temporal compositing of raster series
 *
 * A sequence of images is split into contiguous, equal-width, half-open
 * time buckets `[start + i*width, start + (i+1)*width)` and every bucket is
 * reduced pixel by pixel into one composite. The output always has one
 * image per bucket: buckets without observations are fully masked rather
 * than dropped, so the series stays regularly spaced.
 */

use crate::core::reducer::Reducer;
use crate::types::{Band, BandData, GridSpec, RasterError, RasterImage, RasterResult, ValidityMask};
use chrono::{DateTime, Duration, Months, Utc};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Width of one time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketWidth {
    /// Calendar months; day-of-month is clamped at month ends
    Months(u32),
    /// Fixed number of days
    Days(u32),
}

impl BucketWidth {
    fn is_zero(self) -> bool {
        matches!(self, BucketWidth::Months(0) | BucketWidth::Days(0))
    }

    /// `start + steps * width`, computed from `start` in one step
    pub fn advance(self, start: DateTime<Utc>, steps: u32) -> RasterResult<DateTime<Utc>> {
        let advanced = match self {
            BucketWidth::Months(n) => n
                .checked_mul(steps)
                .and_then(|months| start.checked_add_months(Months::new(months))),
            BucketWidth::Days(n) => {
                start.checked_add_signed(Duration::days(i64::from(n) * i64::from(steps)))
            }
        };
        advanced.ok_or_else(|| {
            RasterError::InvalidBucketConfig(format!(
                "{} steps of {:?} from {} leave the supported date range",
                steps, self, start
            ))
        })
    }
}

/// One half-open time interval of a bucket series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBucket {
    pub index: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeBucket {
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && time < self.end
    }
}

/// Regular bucket series definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub start: DateTime<Utc>,
    pub width: BucketWidth,
    pub count: usize,
}

impl BucketConfig {
    pub fn new(start: DateTime<Utc>, width: BucketWidth, count: usize) -> Self {
        Self { start, width, count }
    }

    /// `count` calendar months from `start`
    pub fn monthly(start: DateTime<Utc>, count: usize) -> Self {
        Self::new(start, BucketWidth::Months(1), count)
    }

    /// Buckets covering `[start, end)`, the count rounded to the nearest
    /// whole number of widths
    pub fn spanning(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        width: BucketWidth,
    ) -> RasterResult<Self> {
        if end <= start {
            return Err(RasterError::InvalidBucketConfig(format!(
                "end {} is not after start {}",
                end, start
            )));
        }
        if width.is_zero() {
            return Err(RasterError::InvalidBucketConfig(
                "bucket width must be positive".to_string(),
            ));
        }

        // Whole widths that fit, then the fraction of the next one
        let mut whole = 0u32;
        loop {
            let next = width.advance(start, whole + 1)?;
            if next > end {
                break;
            }
            whole += 1;
        }
        let last = width.advance(start, whole)?;
        let following = width.advance(start, whole + 1)?;
        let fraction = (end - last).num_seconds() as f64 / (following - last).num_seconds() as f64;
        let count = (whole as f64 + fraction).round() as usize;

        log::debug!(
            "Range {} .. {} spans {:.2} widths of {:?} -> {} buckets",
            start,
            end,
            whole as f64 + fraction,
            width,
            count
        );
        Ok(Self::new(start, width, count))
    }

    /// Fail with `InvalidBucketConfig` on a zero width or count
    pub fn validate(&self) -> RasterResult<()> {
        if self.count == 0 {
            return Err(RasterError::InvalidBucketConfig(
                "bucket count must be positive".to_string(),
            ));
        }
        if self.width.is_zero() {
            return Err(RasterError::InvalidBucketConfig(format!(
                "bucket width must be positive, got {:?}",
                self.width
            )));
        }
        if u32::try_from(self.count).is_err() {
            return Err(RasterError::InvalidBucketConfig(format!(
                "bucket count {} is too large",
                self.count
            )));
        }
        Ok(())
    }

    /// The `count` buckets in index order
    pub fn buckets(&self) -> RasterResult<Vec<TimeBucket>> {
        self.validate()?;
        let mut buckets = Vec::with_capacity(self.count);
        let mut start = self.start;
        for index in 0..self.count {
            let end = self.width.advance(self.start, index as u32 + 1)?;
            buckets.push(TimeBucket { index, start, end });
            start = end;
        }
        Ok(buckets)
    }
}

/// Reduces an image sequence into a regular series of composites
#[derive(Debug, Clone)]
pub struct TemporalCompositor {
    config: BucketConfig,
    reducer: Reducer,
    buckets: Vec<TimeBucket>,
}

impl TemporalCompositor {
    /// Validate the bucket configuration and build the bucket series
    pub fn new(config: BucketConfig, reducer: Reducer) -> RasterResult<Self> {
        let buckets = config.buckets()?;
        Ok(Self {
            config,
            reducer,
            buckets,
        })
    }

    /// Monthly median composites, the usual NDVI time series setup
    pub fn monthly_median(start: DateTime<Utc>, months: usize) -> RasterResult<Self> {
        Self::new(BucketConfig::monthly(start, months), Reducer::Median)
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    pub fn reducer(&self) -> Reducer {
        self.reducer
    }

    pub fn buckets(&self) -> &[TimeBucket] {
        &self.buckets
    }

    /// Bucket holding `time`, if any
    pub fn bucket_for(&self, time: DateTime<Utc>) -> Option<&TimeBucket> {
        let candidate = self.buckets.partition_point(|b| b.end <= time);
        self.buckets.get(candidate).filter(|b| b.contains(time))
    }

    /// Group images by bucket, keeping input order inside each bucket
    pub fn assign<'a>(&self, images: &'a [RasterImage]) -> Vec<Vec<&'a RasterImage>> {
        let mut members: Vec<Vec<&RasterImage>> = vec![Vec::new(); self.buckets.len()];
        let mut outside = 0usize;
        for image in images {
            match self.bucket_for(image.time_start()) {
                Some(bucket) => members[bucket.index].push(image),
                None => outside += 1,
            }
        }
        if outside > 0 {
            log::warn!(
                "{} of {} images fall outside {} .. {} and are not composited",
                outside,
                images.len(),
                self.config.start,
                self.buckets.last().map_or(self.config.start, |b| b.end)
            );
        }
        members
    }

    /// One composite per bucket, in bucket order
    ///
    /// All images must share the grid of the first one. The band set of
    /// every composite is the union of the input band names.
    pub fn composite(&self, images: &[RasterImage]) -> RasterResult<Vec<RasterImage>> {
        let grid = reference_grid(images)?.clone();
        self.composite_on(images, &grid)
    }

    /// One composite per bucket on an explicit output grid
    ///
    /// Every image must lie on `grid`. With no images at all the series is
    /// still built, every bucket empty and without bands.
    pub fn composite_on(
        &self,
        images: &[RasterImage],
        grid: &GridSpec,
    ) -> RasterResult<Vec<RasterImage>> {
        ensure_common_grid(images, grid)?;
        let band_names = union_band_names(images);
        let members = self.assign(images);

        log::info!(
            "Compositing {} images into {} {} buckets of {:?} from {}",
            images.len(),
            self.buckets.len(),
            self.reducer,
            self.config.width,
            self.config.start
        );

        #[cfg(feature = "parallel")]
        let composites: RasterResult<Vec<RasterImage>> = {
            use rayon::prelude::*;
            self.buckets
                .par_iter()
                .zip(members.par_iter())
                .map(|(bucket, sources)| self.composite_bucket(bucket, sources, grid, &band_names))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let composites: RasterResult<Vec<RasterImage>> = self
            .buckets
            .iter()
            .zip(members.iter())
            .map(|(bucket, sources)| self.composite_bucket(bucket, sources, grid, &band_names))
            .collect();

        composites
    }

    fn composite_bucket(
        &self,
        bucket: &TimeBucket,
        sources: &[&RasterImage],
        grid: &GridSpec,
        band_names: &[String],
    ) -> RasterResult<RasterImage> {
        log::debug!(
            "Bucket {} [{} .. {}): {} images",
            bucket.index,
            bucket.start,
            bucket.end,
            sources.len()
        );

        let id = format!("{}_{}", self.reducer, bucket.start.format("%Y_%m_%d"));
        let mut composite = RasterImage::new(id, bucket.start, grid.clone())
            .with_property("bucket_index", bucket.index as i64)
            .with_property("time_end", bucket.end)
            .with_property("reducer", self.reducer.name())
            .with_property("image_count", sources.len() as i64);

        for band in reduce_bands(sources, band_names, grid, self.reducer)? {
            composite.set_band(band)?;
        }
        Ok(composite)
    }
}

/// Reduce a whole sequence to a single image (e.g. the period's median)
///
/// The result's `time_start` is the earliest acquisition in the sequence.
pub fn reduce_collection(images: &[RasterImage], reducer: Reducer) -> RasterResult<RasterImage> {
    let grid = reference_grid(images)?;
    ensure_common_grid(images, grid)?;
    let band_names = union_band_names(images);
    let sources: Vec<&RasterImage> = images.iter().collect();
    let first = images
        .iter()
        .map(|i| i.time_start())
        .min()
        .ok_or_else(|| RasterError::EmptySequence("nothing to reduce".to_string()))?;
    let last = images.iter().map(|i| i.time_start()).max().unwrap_or(first);

    log::info!("Reducing {} images with {}", images.len(), reducer);

    let mut reduced = RasterImage::new(reducer.name(), first, grid.clone())
        .with_property("time_end", last)
        .with_property("reducer", reducer.name())
        .with_property("image_count", images.len() as i64);
    for band in reduce_bands(&sources, &band_names, grid, reducer)? {
        reduced.set_band(band)?;
    }
    Ok(reduced)
}

fn reference_grid(images: &[RasterImage]) -> RasterResult<&GridSpec> {
    let first = images.first().ok_or_else(|| {
        RasterError::EmptySequence("no images to take the output grid from".to_string())
    })?;
    Ok(first.grid())
}

fn ensure_common_grid(images: &[RasterImage], grid: &GridSpec) -> RasterResult<()> {
    for image in images {
        grid.ensure_same(image.grid(), &format!("image '{}'", image.id()))?;
    }
    Ok(())
}

fn union_band_names(images: &[RasterImage]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for image in images {
        for name in image.band_names() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Per band, per pixel reduction over the valid values of `sources`
///
/// A pixel without any valid contribution is invalid and holds NaN.
fn reduce_bands(
    sources: &[&RasterImage],
    band_names: &[String],
    grid: &GridSpec,
    reducer: Reducer,
) -> RasterResult<Vec<Band>> {
    let shape = grid.shape();
    let mut bands = Vec::with_capacity(band_names.len());
    let mut values: Vec<f64> = Vec::with_capacity(sources.len());

    for name in band_names {
        let inputs: Vec<&Band> = sources.iter().filter_map(|img| img.band(name)).collect();
        let mut data = BandData::from_elem(shape, f64::NAN);
        let mut mask = ValidityMask::from_elem(shape, false);

        if !inputs.is_empty() {
            Zip::indexed(&mut data)
                .and(&mut mask)
                .for_each(|(row, col), value, valid| {
                    values.clear();
                    values.extend(inputs.iter().filter_map(|band| band.value(row, col)));
                    if let Some(reduced) = reducer.reduce(&mut values) {
                        *value = reduced;
                        *valid = true;
                    }
                });
        }

        bands.push(Band::with_mask(name.as_str(), data, mask)?);
    }
    Ok(bands)
}
