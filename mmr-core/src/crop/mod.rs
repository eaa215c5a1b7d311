//! Geometric normalization of vehicle crops.

pub mod bbox;
pub mod config;
pub mod geometry;
pub mod params;

pub use config::{CropConfig, OutputSize, PlateWindow};
pub use params::{CropInput, CropKind, CropScheme, CropSpecification};
