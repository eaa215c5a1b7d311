/// Environment variable naming the engine module directory.
///
/// Overrides `module_path` from a job file when set, and is required by the
/// model-backed tests.
pub const MODULE_PATH_ENV_NAME: &str = "MMR_MODULE_PATH";

/// Number of control points of the license plate crop scheme.
///
/// The single point is the plate center in image coordinates.
pub const LP_CROP_POINTS: usize = 1;

/// Number of auxiliary values of the license plate crop scheme.
///
/// `[0]` is the plate resolution in pixels per meter, `[1]` the in-plane
/// rotation in degrees, counter-clockwise.
pub const LP_CROP_VALUES: usize = 2;

/// Minimum number of control points of the multi-point crop scheme.
pub const BOX_MIN_CROP_POINTS: usize = 2;

/// Number of auxiliary values of the multi-point crop scheme.
pub const BOX_CROP_VALUES: usize = 0;

/// Side length, in pixels, of the default normalized crop.
pub const CROP_SIZE: u32 = 224;

/// Horizontal extent of the plate-anchored window, in meters, left and right
/// of the plate center.
pub const LP_WINDOW_HALF_WIDTH_M: f64 = 1.1;

/// Extent of the plate-anchored window above the plate center, in meters.
///
/// The vehicle body sits above the plate, so the window is asymmetric.
pub const LP_WINDOW_ABOVE_M: f64 = 1.6;

/// Extent of the plate-anchored window below the plate center, in meters.
pub const LP_WINDOW_BELOW_M: f64 = 0.6;

/// Relative border added on each side when a full crop is requested.
pub const FULL_CROP_BORDER: f64 = 0.125;

/// ImageNet channel means used when a manifest does not override them.
pub const DEFAULT_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations used when a manifest does not
/// override them.
pub const DEFAULT_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Release tag of the shipped model catalog.
pub const MODEL_RELEASE: &str = "2024Q2";

/// Extension of engine model artifacts.
pub const MODEL_EXTENSION: &str = "dat";
