use serde::{Deserialize, Serialize};

use crate::{
    consts::{
        CROP_SIZE, FULL_CROP_BORDER, LP_WINDOW_ABOVE_M, LP_WINDOW_BELOW_M, LP_WINDOW_HALF_WIDTH_M,
    },
    crop::params::CropKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSize {
    pub width: u32,
    pub height: u32,
}

impl OutputSize {
    pub const fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }
}

/// Metric window around the plate center that a plate-anchored crop covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateWindow {
    pub half_width_m: f64,
    pub above_m: f64,
    pub below_m: f64,
}

impl Default for PlateWindow {
    fn default() -> Self {
        Self {
            half_width_m: LP_WINDOW_HALF_WIDTH_M,
            above_m: LP_WINDOW_ABOVE_M,
            below_m: LP_WINDOW_BELOW_M,
        }
    }
}

/// How control points are turned into a normalized crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropConfig {
    pub plate_output: OutputSize,
    pub box_output: OutputSize,
    pub plate_window: PlateWindow,
    /// Adds a border around the window; the output grows by the same ratio.
    pub full_crop: bool,
    /// Gaussian pre-filter when the crop downsamples the source.
    pub antialiasing: bool,
    /// Overrides the sigma derived from the downsampling factor.
    pub antialiasing_sigma: Option<f32>,
    /// Per-channel contrast stretch of the finished crop.
    pub color_normalization: bool,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            plate_output: OutputSize::square(CROP_SIZE),
            box_output: OutputSize::square(CROP_SIZE),
            plate_window: PlateWindow::default(),
            full_crop: false,
            antialiasing: true,
            antialiasing_sigma: None,
            color_normalization: false,
        }
    }
}

impl CropConfig {
    /// Relative border applied on each side of the window.
    pub fn border(&self) -> f64 {
        if self.full_crop { FULL_CROP_BORDER } else { 0.0 }
    }

    /// Output dimensions for a crop kind. Depends on nothing but the config.
    pub fn output_size(&self, kind: CropKind) -> OutputSize {
        let base = match kind {
            CropKind::LicensePlate => self.plate_output,
            CropKind::CarBox => self.box_output,
        };
        let grow = 1.0 + 2.0 * self.border();
        OutputSize {
            width: (base.width as f64 * grow).round() as u32,
            height: (base.height as f64 * grow).round() as u32,
        }
    }

    /// Every output size a crop from this config can have.
    pub fn output_sizes(&self) -> [OutputSize; 2] {
        [
            self.output_size(CropKind::LicensePlate),
            self.output_size(CropKind::CarBox),
        ]
    }
}
