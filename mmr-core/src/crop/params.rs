use glam::DVec2;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ensure};

use crate::{
    consts::{BOX_CROP_VALUES, BOX_MIN_CROP_POINTS, LP_CROP_POINTS, LP_CROP_VALUES},
    crop::bbox::Bbox,
    error::*,
};

/// Crop input as it appears in job files: parallel column/row arrays plus
/// scheme-specific auxiliary values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CropInput {
    pub cols: Vec<f64>,
    pub rows: Vec<f64>,
    #[serde(default)]
    pub aux_values: Vec<f64>,
}

impl CropInput {
    pub fn to_spec(&self) -> Result<CropSpecification, MmrError> {
        CropSpecification::create(&self.cols, &self.rows, &self.aux_values)
    }
}

/// Which family of models a crop feeds: plate-anchored or vehicle-box
/// anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropKind {
    LicensePlate,
    CarBox,
}

/// Geometry decoded from the raw control points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CropScheme {
    /// One point plus scale and rotation.
    LicensePlate {
        center: DVec2,
        pixels_per_meter: f64,
        rotation_deg: f64,
    },
    /// Two points (top-left, bottom-right), or the bounding box of more than
    /// four points.
    Box(Bbox),
    /// Top-left, top-right and bottom-left corners; the fourth is implied.
    Parallelogram {
        top_left: DVec2,
        top_right: DVec2,
        bottom_left: DVec2,
    },
    /// Four corners, clockwise from the top-left.
    Quad([DVec2; 4]),
}

/// A validated, immutable set of control points.
///
/// Construction only checks cardinalities and numeric sanity; it never looks
/// at an image, so one specification can be reused across frames that share
/// camera geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct CropSpecification {
    points: Vec<DVec2>,
    aux_values: Vec<f64>,
    scheme: CropScheme,
}

impl CropSpecification {
    pub fn create(cols: &[f64], rows: &[f64], aux_values: &[f64]) -> Result<Self, MmrError> {
        ensure!(
            cols.len() == rows.len(),
            CropParamsSnafu {
                message: format!("{} columns but {} rows", cols.len(), rows.len()),
            }
        );
        ensure!(
            cols.iter().chain(rows).chain(aux_values).all(|v| v.is_finite()),
            CropParamsSnafu {
                message: "non-finite coordinate or value",
            }
        );

        let points: Vec<DVec2> = cols
            .iter()
            .zip(rows)
            .map(|(&col, &row)| DVec2::new(col, row))
            .collect();

        let scheme = match (points.len(), aux_values.len()) {
            (LP_CROP_POINTS, LP_CROP_VALUES) => {
                let pixels_per_meter = aux_values[0];
                ensure!(
                    pixels_per_meter > 0.0,
                    CropParamsSnafu {
                        message: format!("plate scale must be positive, got {pixels_per_meter}"),
                    }
                );
                CropScheme::LicensePlate {
                    center: points[0],
                    pixels_per_meter,
                    rotation_deg: aux_values[1],
                }
            }
            (n, BOX_CROP_VALUES) if n >= BOX_MIN_CROP_POINTS => Self::multi_point_scheme(&points)?,
            (n, values) => {
                return CropParamsSnafu {
                    message: format!("unsupported combination of {n} points and {values} values"),
                }
                .fail();
            }
        };

        Ok(Self {
            points,
            aux_values: aux_values.to_vec(),
            scheme,
        })
    }

    /// Plate center, resolution in pixels per meter, rotation in degrees.
    pub fn license_plate(
        center_col: f64,
        center_row: f64,
        pixels_per_meter: f64,
        rotation_deg: f64,
    ) -> Result<Self, MmrError> {
        Self::create(&[center_col], &[center_row], &[pixels_per_meter, rotation_deg])
    }

    pub fn car_box(top_left: DVec2, bottom_right: DVec2) -> Result<Self, MmrError> {
        Self::create(&[top_left.x, bottom_right.x], &[top_left.y, bottom_right.y], &[])
    }

    fn multi_point_scheme(points: &[DVec2]) -> Result<CropScheme, MmrError> {
        let scheme = match points {
            [top_left, bottom_right] => {
                let bbox = Bbox::new(*top_left, *bottom_right);
                ensure!(
                    bbox.has_area(),
                    CropParamsSnafu {
                        message: "box corners must be top-left then bottom-right",
                    }
                );
                CropScheme::Box(bbox)
            }
            [top_left, top_right, bottom_left] => {
                let cross = (*top_right - *top_left).perp_dot(*bottom_left - *top_left);
                ensure!(
                    cross.abs() > f64::EPSILON,
                    CropParamsSnafu {
                        message: "parallelogram corners are collinear",
                    }
                );
                CropScheme::Parallelogram {
                    top_left: *top_left,
                    top_right: *top_right,
                    bottom_left: *bottom_left,
                }
            }
            [a, b, c, d] => {
                let corners = [*a, *b, *c, *d];
                ensure!(
                    quad_area(&corners) > f64::EPSILON,
                    CropParamsSnafu {
                        message: "quad corners do not span an area",
                    }
                );
                CropScheme::Quad(corners)
            }
            _ => {
                let bbox = Bbox::from_points(points.iter().copied()).context(CropParamsSnafu {
                    message: "no points",
                })?;
                ensure!(
                    bbox.has_area(),
                    CropParamsSnafu {
                        message: "points do not span an area",
                    }
                );
                CropScheme::Box(bbox)
            }
        };
        Ok(scheme)
    }

    pub fn points(&self) -> &[DVec2] {
        &self.points
    }

    pub fn aux_values(&self) -> &[f64] {
        &self.aux_values
    }

    pub fn scheme(&self) -> &CropScheme {
        &self.scheme
    }

    pub fn kind(&self) -> CropKind {
        match self.scheme {
            CropScheme::LicensePlate { .. } => CropKind::LicensePlate,
            _ => CropKind::CarBox,
        }
    }

    pub fn to_input(&self) -> CropInput {
        CropInput {
            cols: self.points.iter().map(|p| p.x).collect(),
            rows: self.points.iter().map(|p| p.y).collect(),
            aux_values: self.aux_values.clone(),
        }
    }
}

/// Absolute shoelace area of a closed polygon.
fn quad_area(corners: &[DVec2; 4]) -> f64 {
    let twice: f64 = (0..4)
        .map(|i| corners[i].perp_dot(corners[(i + 1) % 4]))
        .sum();
    twice.abs() / 2.0
}
