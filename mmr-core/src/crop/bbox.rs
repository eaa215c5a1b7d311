use glam::DVec2;
use serde::Serialize;

/// An axis-aligned box in image coordinates (rows grow downwards).
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Bbox {
    /// Top-left corner.
    pub min: DVec2,
    /// Bottom-right corner.
    pub max: DVec2,
}

impl Bbox {
    pub fn new(min: DVec2, max: DVec2) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point, `None` for an empty iterator.
    ///
    /// # Example
    /// ```
    /// use glam::DVec2;
    /// use mmr_core::crop::bbox::Bbox;
    /// let bbox = Bbox::from_points([DVec2::new(4.0, 1.0), DVec2::new(1.0, 3.0)]).unwrap();
    /// assert_eq!(bbox.min, DVec2::new(1.0, 1.0));
    /// assert_eq!(bbox.max, DVec2::new(4.0, 3.0));
    /// ```
    pub fn from_points(points: impl IntoIterator<Item = DVec2>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        Some(points.fold(Self::new(first, first), |bbox, p| Self {
            min: bbox.min.min(p),
            max: bbox.max.max(p),
        }))
    }

    pub fn from_center_size(center: DVec2, size: DVec2) -> Self {
        let half_size = size / 2.0;
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn size(&self) -> DVec2 {
        self.max - self.min
    }

    pub fn center(&self) -> DVec2 {
        (self.min + self.max) / 2.0
    }

    /// Both extents strictly positive.
    pub fn has_area(&self) -> bool {
        self.width() > 0.0 && self.height() > 0.0
    }

    /// Inclusive on every edge.
    pub fn contains_point(&self, point: DVec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    /// Grows the box by `ratio` of its size on each side, keeping the center.
    pub fn expand(&self, ratio: f64) -> Self {
        let margin = self.size() * ratio;
        Self {
            min: self.min - margin,
            max: self.max + margin,
        }
    }

    /// Corners clockwise from the top-left: TL, TR, BR, BL.
    pub fn corners(&self) -> [DVec2; 4] {
        [
            self.min,
            DVec2::new(self.max.x, self.min.y),
            self.max,
            DVec2::new(self.min.x, self.max.y),
        ]
    }
}
