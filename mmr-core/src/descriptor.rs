use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::*;

/// Feature vector computed for one normalized crop.
///
/// Length and version are fixed by the model that produced it; descriptors
/// from different models are not comparable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    version: u32,
    data: Vec<f32>,
}

impl Descriptor {
    pub fn new(version: u32, data: Vec<f32>) -> Self {
        Self { version, data }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Checks the descriptor against the shape a model expects. Non-finite
    /// values are rejected as well.
    pub fn ensure_shape(&self, expected_len: usize, expected_version: u32) -> Result<(), MmrError> {
        ensure!(
            self.len() == expected_len && self.version == expected_version,
            InvalidDescriptorSnafu {
                expected: expected_len,
                expected_version,
                actual: self.len(),
                actual_version: self.version,
            }
        );
        self.ensure_finite()
    }

    pub fn ensure_finite(&self) -> Result<(), MmrError> {
        match self.data.iter().position(|v| !v.is_finite()) {
            Some(index) => NonFiniteDescriptorSnafu {
                index,
                value: self.data[index],
            }
            .fail(),
            None => Ok(()),
        }
    }

    /// Similarity of two descriptors in `[0, 1]`, 1 for identical direction.
    pub fn compare(&self, other: &Descriptor) -> Result<f32, MmrError> {
        self.ensure_finite()?;
        other.ensure_shape(self.len(), self.version)?;

        let (dot, norm_a, norm_b) = self.data.iter().zip(&other.data).fold(
            (0.0f64, 0.0f64, 0.0f64),
            |(dot, na, nb), (&a, &b)| {
                let (a, b) = (a as f64, b as f64);
                (dot + a * b, na + a * a, nb + b * b)
            },
        );

        if norm_a == 0.0 || norm_b == 0.0 {
            return Ok(0.0);
        }
        let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
        Ok(((cosine + 1.0) / 2.0).clamp(0.0, 1.0) as f32)
    }

    /// Largest absolute element-wise difference, for tolerance checks.
    pub fn max_abs_diff(&self, other: &Descriptor) -> Result<f32, MmrError> {
        other.ensure_shape(self.len(), self.version)?;
        Ok(self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max))
    }
}
