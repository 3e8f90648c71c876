//! Configuration input

pub mod profile;

pub use profile::{CompositeProfile, ProcessingProfile, LANDSAT8_C2_L2_PROFILE};
