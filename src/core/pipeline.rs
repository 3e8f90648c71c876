/*!
 * Per-image processing pipeline and composite series entry points
 *
 * Stage order is fixed:
 *   1. QA bitfield mask
 *   2. Normalized-difference indices on the raw digital numbers
 *   3. Radiometric rescaling of the remaining bands (index outputs are
 *      never rescaled)
 *
 * Images are independent: a failure aborts only that image and is
 * reported alongside the successful results.
 */

use crate::core::composite::{BucketConfig, TemporalCompositor};
use crate::core::indices::{IndexCalculator, IndexSpec};
use crate::core::masking::{BitFlagMask, LANDSAT_QA_BAND};
use crate::core::reducer::Reducer;
use crate::core::rescale::{BandRescaler, RescaleGroup};
use crate::types::{GridSpec, RasterError, RasterImage, RasterResult};

/// QA band to decode and the flags that disqualify a pixel
#[derive(Debug, Clone, PartialEq)]
pub struct QualityMaskConfig {
    pub band: String,
    pub flags: BitFlagMask,
}

impl QualityMaskConfig {
    /// Landsat Collection 2 QA_PIXEL with the default cloud/snow/fill flags
    pub fn landsat() -> Self {
        Self {
            band: LANDSAT_QA_BAND.to_string(),
            flags: BitFlagMask::landsat_qa_pixel(),
        }
    }
}

/// Configuration for the per-image stages
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Skip QA masking when `None`
    pub quality_mask: Option<QualityMaskConfig>,
    pub indices: Vec<IndexSpec>,
    pub rescale: Vec<RescaleGroup>,
}

impl PipelineConfig {
    /// Landsat 8/9 Collection 2 Level 2: QA_PIXEL mask, NDVI, SR/ST rescaling
    pub fn landsat_c2_ndvi() -> Self {
        Self {
            quality_mask: Some(QualityMaskConfig::landsat()),
            indices: vec![IndexSpec::ndvi()],
            rescale: BandRescaler::landsat_c2().groups().to_vec(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::landsat_c2_ndvi()
    }
}

/// Record of an image whose processing failed
#[derive(Debug)]
pub struct ImageFailure {
    /// Position of the image in the input sequence
    pub position: usize,
    pub image_id: String,
    pub error: RasterError,
}

impl ImageFailure {
    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}

/// Successfully processed images (input order) and per-image failures
#[derive(Debug, Default)]
pub struct ProcessingReport {
    pub processed: Vec<RasterImage>,
    pub failures: Vec<ImageFailure>,
}

impl ProcessingReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.processed.len() + self.failures.len()
    }
}

/// Composite series plus the images that could not be processed
#[derive(Debug)]
pub struct CompositeReport {
    pub composites: Vec<RasterImage>,
    pub failures: Vec<ImageFailure>,
}

/// Mask -> index -> rescale, applied uniformly to image sequences
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    indices: IndexCalculator,
    rescaler: BandRescaler,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let indices = IndexCalculator::new(config.indices.clone());
        let rescaler = BandRescaler::new(config.rescale.clone());
        Self {
            config,
            indices,
            rescaler,
        }
    }

    /// Pipeline with [`PipelineConfig::landsat_c2_ndvi`]
    pub fn landsat_ndvi() -> Self {
        Self::new(PipelineConfig::landsat_c2_ndvi())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage on one image
    pub fn process_image(&self, image: &RasterImage) -> RasterResult<RasterImage> {
        log::debug!("Processing image '{}' ({})", image.id(), image.time_start());

        // 1. QA mask
        let masked = match &self.config.quality_mask {
            Some(qa) => qa.flags.apply(image, &qa.band)?,
            None => image.clone(),
        };

        // 2. Indices on raw values
        let indexed = self.indices.compute(&masked)?;

        // 3. Rescale everything except the index outputs
        self.rescaler
            .rescale_excluding(&indexed, &self.indices.output_names())
    }

    /// Process images one after another
    pub fn process(&self, images: &[RasterImage]) -> ProcessingReport {
        log::info!("Processing {} images sequentially", images.len());

        let results: Vec<RasterResult<RasterImage>> =
            images.iter().map(|image| self.process_image(image)).collect();

        Self::build_report(images, results, None)
    }

    /// Process images across the rayon thread pool
    ///
    /// Produces the same report as [`Pipeline::process`].
    pub fn process_parallel(&self, images: &[RasterImage]) -> ProcessingReport {
        Self::build_report(images, self.run_parallel(images), None)
    }

    #[cfg(feature = "parallel")]
    fn run_parallel(&self, images: &[RasterImage]) -> Vec<RasterResult<RasterImage>> {
        use rayon::prelude::*;

        log::info!(
            "Processing {} images on {} threads",
            images.len(),
            rayon::current_num_threads()
        );

        images
            .par_iter()
            .map(|image| self.process_image(image))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn run_parallel(&self, images: &[RasterImage]) -> Vec<RasterResult<RasterImage>> {
        // Fallback to sequential processing if parallel feature is not available
        log::info!("Processing {} images sequentially", images.len());
        images.iter().map(|image| self.process_image(image)).collect()
    }

    /// Process images, then composite the successful ones
    ///
    /// The output grid is the grid of the first successfully processed
    /// image, or of the first input image if none succeeded. Images on any
    /// other grid are reported as `ShapeMismatch` failures and left out.
    /// Fails with `EmptySequence` only when `images` is empty.
    pub fn process_composites(
        &self,
        images: &[RasterImage],
        compositor: &TemporalCompositor,
    ) -> RasterResult<CompositeReport> {
        let results = self.run_parallel(images);

        let grid = results
            .iter()
            .find_map(|result| result.as_ref().ok())
            .or_else(|| images.first())
            .map(|image| image.grid().clone())
            .ok_or_else(|| RasterError::EmptySequence("no images to composite".to_string()))?;

        let report = Self::build_report(images, results, Some(&grid));
        let composites = compositor.composite_on(&report.processed, &grid)?;

        log::info!(
            "Built {} composites from {} of {} images",
            composites.len(),
            report.processed.len(),
            images.len()
        );

        Ok(CompositeReport {
            composites,
            failures: report.failures,
        })
    }

    /// Validate the bucket configuration before any image is processed,
    /// then process and composite
    pub fn composite_series(
        &self,
        images: &[RasterImage],
        buckets: BucketConfig,
        reducer: Reducer,
    ) -> RasterResult<CompositeReport> {
        let compositor = TemporalCompositor::new(buckets, reducer)?;
        self.process_composites(images, &compositor)
    }

    /// Split results into processed images and failure records; with a
    /// `grid`, processed images on a different grid become failures too
    fn build_report(
        images: &[RasterImage],
        results: Vec<RasterResult<RasterImage>>,
        grid: Option<&GridSpec>,
    ) -> ProcessingReport {
        let mut report = ProcessingReport::default();

        for (position, (image, result)) in images.iter().zip(results).enumerate() {
            let result = result.and_then(|processed| match grid {
                Some(grid) => grid
                    .ensure_same(processed.grid(), &format!("image '{}'", image.id()))
                    .map(|_| processed),
                None => Ok(processed),
            });

            match result {
                Ok(processed) => report.processed.push(processed),
                Err(error) => {
                    log::warn!(
                        "Image '{}' at position {} failed ({}): {}",
                        image.id(),
                        position,
                        error.kind(),
                        error
                    );
                    report.failures.push(ImageFailure {
                        position,
                        image_id: image.id().to_string(),
                        error,
                    });
                }
            }
        }

        if !report.is_complete() {
            log::warn!(
                "{} of {} images failed processing",
                report.failures.len(),
                report.total()
            );
        }
        report
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::landsat_ndvi()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::indices::NDVI;
    use crate::types::{Band, GridSpec};
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;

    fn landsat_scene(id: &str, month: u32, qa: Array2<u16>) -> RasterImage {
        let shape = qa.dim();
        let time = Utc.with_ymd_and_hms(2023, month, 12, 10, 45, 0).unwrap();
        RasterImage::new(id, time, GridSpec::new(shape.0, shape.1))
            .with_band(Band::new("SR_B4", Array2::from_elem(shape, 3000.0)))
            .unwrap()
            .with_band(Band::new("SR_B5", Array2::from_elem(shape, 5000.0)))
            .unwrap()
            .with_band(Band::new("ST_B10", Array2::from_elem(shape, 44000.0)))
            .unwrap()
            .with_band(Band::from_integers(LANDSAT_QA_BAND, &qa))
            .unwrap()
    }

    #[test]
    fn test_stage_order() {
        let mut qa = Array2::<u16>::zeros((2, 2));
        qa[[0, 1]] = 1 << 3;
        let image = landsat_scene("LC08_A", 1, qa);

        let processed = Pipeline::landsat_ndvi().process_image(&image).unwrap();

        let ndvi = processed.band(NDVI).unwrap();
        assert_abs_diff_eq!(ndvi.value(0, 0).unwrap(), 0.25, epsilon = 1e-12);
        assert_eq!(ndvi.value(0, 1), None);

        let nir = processed.band("SR_B5").unwrap();
        assert_abs_diff_eq!(nir.value(1, 1).unwrap(), 5000.0 * 0.0000275 - 0.2, epsilon = 1e-12);
        assert_eq!(nir.value(0, 1), None);

        let thermal = processed.band("ST_B10").unwrap();
        let kelvin = 44000.0 * 0.00341802 + 149.0;
        assert_abs_diff_eq!(thermal.value(0, 0).unwrap(), kelvin, epsilon = 1e-9);

        assert_eq!(processed.band_names(), vec!["SR_B4", "SR_B5", "ST_B10", "QA_PIXEL", "NDVI"]);
    }

    #[test]
    fn test_index_is_never_rescaled_even_if_pattern_matches() {
        let config = PipelineConfig {
            quality_mask: None,
            indices: vec![IndexSpec::new("SR_BX", "SR_B5", "SR_B4")],
            rescale: vec![RescaleGroup::landsat_optical()],
        };
        let image = landsat_scene("LC08_B", 2, Array2::zeros((1, 1)));
        let processed = Pipeline::new(config).process_image(&image).unwrap();

        assert_abs_diff_eq!(processed.band("SR_BX").unwrap().data()[[0, 0]], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_failures_are_isolated() {
        let good = landsat_scene("good", 1, Array2::zeros((2, 2)));
        let mut no_qa = landsat_scene("no_qa", 2, Array2::zeros((2, 2)));
        no_qa.remove_band(LANDSAT_QA_BAND);
        let mut no_red = landsat_scene("no_red", 3, Array2::zeros((2, 2)));
        no_red.remove_band("SR_B4");
        let also_good = landsat_scene("also_good", 4, Array2::zeros((2, 2)));

        let report = Pipeline::landsat_ndvi().process(&[good, no_qa, no_red, also_good]);

        assert_eq!(report.total(), 4);
        assert_eq!(report.processed.len(), 2);
        assert_eq!(report.processed[0].id(), "good");
        assert_eq!(report.processed[1].id(), "also_good");

        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].image_id, "no_qa");
        assert_eq!(report.failures[0].position, 1);
        assert_eq!(report.failures[0].kind(), "MissingBand");
        assert_eq!(report.failures[1].image_id, "no_red");
        assert_eq!(report.failures[1].kind(), "MissingBand");
    }

    #[test]
    fn test_invalid_buckets_fail_before_processing() {
        let images = vec![landsat_scene("a", 1, Array2::zeros((2, 2)))];
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();

        let result = Pipeline::landsat_ndvi().composite_series(
            &images,
            BucketConfig::monthly(start, 0),
            Reducer::Median,
        );
        assert!(matches!(result, Err(RasterError::InvalidBucketConfig(_))));
    }
}
