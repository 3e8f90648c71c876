//! rasterseries: quality masking, spectral indices and temporal compositing
//! for multispectral raster series
//!
//! The crate processes in-memory image sequences (Landsat 8/9 Collection 2
//! Level 2 is the reference product) in three per-image stages, QA bitfield
//! masking, normalized-difference indices on raw digital numbers, then
//! radiometric rescaling, and reduces the results into a regular series of
//! time-bucketed composites.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    Band, BandData, GeoTransform, GridSpec, PropertyValue, RasterError, RasterImage,
    RasterResult, ValidityMask,
};

pub use crate::core::{
    BitFlagMask, BandRescaler, BucketConfig, BucketWidth, IndexCalculator, IndexSpec, Pipeline,
    PipelineConfig, ProcessingReport, Reducer, RescaleGroup, TemporalCompositor,
};

pub use io::ProcessingProfile;
