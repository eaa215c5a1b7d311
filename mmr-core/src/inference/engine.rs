use snafu::ensure;

use crate::{
    buffer::ImageBuffer,
    classify::{ClassificationResult, ClassifyConfig},
    crop::{config::CropConfig, params::CropSpecification},
    descriptor::Descriptor,
    error::*,
    inference::config::EngineConfig,
};

/// A recognition engine bound to one loaded model.
///
/// Implementations own native state and are used from one thread at a time;
/// [`EngineHandle`](crate::inference::handle::EngineHandle) enforces the
/// lifecycle around them.
pub trait InferenceEngine: Sized + Send {
    /// Loads the model. Either returns a ready engine or nothing at all.
    fn initialize(config: &EngineConfig) -> Result<Self, MmrError>;

    fn model_name(&self) -> &str;

    fn model_version(&self) -> u32;

    /// Number of values in every descriptor this model produces.
    fn descriptor_len(&self) -> usize;

    fn supports_batch(&self) -> bool {
        false
    }

    /// Cuts the normalized crop a specification describes out of `image`.
    fn crop_image(
        &mut self,
        image: &ImageBuffer,
        spec: &CropSpecification,
    ) -> Result<ImageBuffer, MmrError>;

    fn compute_descriptor(&mut self, image: &ImageBuffer) -> Result<Descriptor, MmrError>;

    /// Batched [`compute_descriptor`](Self::compute_descriptor). Engines
    /// without a batched path fail instead of looping.
    fn compute_descriptor_batch(
        &mut self,
        images: &[ImageBuffer],
    ) -> Result<Vec<Descriptor>, MmrError> {
        let _ = images;
        UnsupportedOperationSnafu {
            operation: "compute_descriptor_batch",
            model: self.model_name(),
        }
        .fail()
    }

    fn classify(
        &mut self,
        descriptor: &Descriptor,
        config: &ClassifyConfig,
    ) -> Result<ClassificationResult, MmrError>;

    /// Releases native resources.
    fn dispose(self);
}

/// Rejects images that are not a normalized crop of this engine's config.
pub fn ensure_normalized(image: &ImageBuffer, crop: &CropConfig) -> Result<(), MmrError> {
    ensure!(
        image.is_valid(),
        InvalidCropInputSnafu {
            message: "image has no pixel data",
        }
    );
    let (width, height) = image.dimensions();
    ensure!(
        crop.output_sizes()
            .iter()
            .any(|size| size.width == width && size.height == height),
        InvalidCropInputSnafu {
            message: format!("{width}x{height} image is not a normalized crop"),
        }
    );
    Ok(())
}
