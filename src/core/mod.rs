//! Core raster processing modules

pub mod masking;
pub mod rescale;
pub mod indices;
pub mod reducer;
pub mod composite;
pub mod series;
pub mod pipeline;

// Re-export main types
pub use masking::{BitFlagMask, Comparison, threshold_mask, LANDSAT_QA_BAND};
pub use rescale::{BandMatch, BandRescaler, RescaleGroup};
pub use indices::{IndexCalculator, IndexSpec, normalized_difference, NBR, NDVI};
pub use reducer::Reducer;
pub use composite::{BucketConfig, BucketWidth, TemporalCompositor, TimeBucket, reduce_collection};
pub use series::{SeriesPoint, region_reduce, time_series};
pub use pipeline::{
    CompositeReport, ImageFailure, Pipeline, PipelineConfig, ProcessingReport, QualityMaskConfig,
};
