use image::imageops::{self, FilterType};
use ndarray::{Array2, Array4};
use ort::{session::Session, value::TensorRef};
use snafu::{OptionExt, ResultExt, ensure};
use tracing::*;

use crate::{
    buffer::ImageBuffer,
    classify::{ClassificationResult, Classifier, ClassifyConfig},
    crop::{config::CropConfig, geometry, params::CropKind, params::CropSpecification},
    descriptor::Descriptor,
    error::*,
    inference::{
        catalog::crop_kind_of,
        config::EngineConfig,
        engine::{InferenceEngine, ensure_normalized},
        model::{ModelManifest, session_builder},
    },
};

/// Descriptor model running on ONNX Runtime.
pub struct OnnxEngine {
    session: Session,
    input_name: String,
    output_name: String,
    model_name: String,
    /// Crop kind the model was trained on, when its name is in the catalog.
    model_kind: Option<CropKind>,
    version: u32,
    input_width: u32,
    input_height: u32,
    mean: [f32; 3],
    std: [f32; 3],
    supports_batch: bool,
    crop: CropConfig,
    classifier: Classifier,
}

impl OnnxEngine {
    /// Resizes crops to the model input and packs them as a normalized NCHW
    /// tensor.
    fn preprocess(&self, images: &[ImageBuffer]) -> Array4<f32> {
        let (width, height) = (self.input_width, self.input_height);
        let mut input = Array4::zeros([images.len(), 3, height as usize, width as usize]);

        for (n, image) in images.iter().enumerate() {
            let rgb = image.to_rgb();
            let resized = if rgb.dimensions() == (width, height) {
                rgb
            } else {
                imageops::resize(&rgb, width, height, FilterType::Triangle)
            };
            for (x, y, pixel) in resized.enumerate_pixels() {
                for c in 0..3 {
                    let value = pixel[c] as f32 / 255.0;
                    input[[n, c, y as usize, x as usize]] = (value - self.mean[c]) / self.std[c];
                }
            }
        }
        input
    }

    /// Runs the graph; one descriptor row per input image.
    fn infer(&mut self, input: Array4<f32>) -> Result<Array2<f32>, MmrError> {
        let batch = input.shape()[0];
        let descriptor_len = self.descriptor_len();
        let output = self
            .session
            .run(ort::inputs![
                self.input_name.as_str() => TensorRef::from_array_view(&input).context(TensorSnafu { stage: "descriptor-input" })?
            ])
            .context(InferenceSnafu {})?;

        let tensor = output
            .get(self.output_name.as_str())
            .context(NotFoundOutputSnafu {
                output_name: self.output_name.as_str(),
            })?
            .try_extract_array::<f32>()
            .context(TensorSnafu {
                stage: "descriptor-extract",
            })?;

        debug!("descriptor output shape {:?}", tensor.shape());
        let rows = tensor
            .to_shape((batch, descriptor_len))
            .context(ShapeSnafu {
                stage: "descriptor",
            })?
            .to_owned();
        Ok(rows)
    }

    fn descriptors(&self, rows: Array2<f32>) -> Result<Vec<Descriptor>, MmrError> {
        rows.outer_iter()
            .map(|row| {
                let descriptor = Descriptor::new(self.version, row.to_vec());
                descriptor.ensure_finite()?;
                Ok(descriptor)
            })
            .collect()
    }
}

impl InferenceEngine for OnnxEngine {
    fn initialize(config: &EngineConfig) -> Result<Self, MmrError> {
        let model_path = config.resolve_model_path()?;
        let mut manifest = ModelManifest::load(&ModelManifest::path_for(&model_path))?;
        let classifier = Classifier::new(
            std::mem::take(&mut manifest.heads),
            manifest.descriptor_len,
            manifest.version,
        )?;

        let session = session_builder(config)?
            .commit_from_file(&model_path)
            .context(OrtInitSnafu { stage: "commit" })?;

        let input_name = manifest
            .input_name
            .or_else(|| session.inputs.first().map(|input| input.name.clone()))
            .unwrap_or("input".to_string());
        let output_name = manifest
            .output_name
            .or_else(|| session.outputs.first().map(|output| output.name.clone()))
            .unwrap_or("descriptor".to_string());

        debug!(
            "model `{}` v{}: {} -> {} ({} values), batch {}",
            config.model_name,
            manifest.version,
            input_name,
            output_name,
            manifest.descriptor_len,
            manifest.supports_batch
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            model_name: config.model_name.clone(),
            model_kind: crop_kind_of(&config.model_name),
            version: manifest.version,
            input_width: manifest.input_width,
            input_height: manifest.input_height,
            mean: manifest.mean,
            std: manifest.std,
            supports_batch: manifest.supports_batch,
            crop: config.crop.clone(),
            classifier,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn model_version(&self) -> u32 {
        self.version
    }

    fn descriptor_len(&self) -> usize {
        self.classifier.descriptor_len()
    }

    fn supports_batch(&self) -> bool {
        self.supports_batch
    }

    fn crop_image(
        &mut self,
        image: &ImageBuffer,
        spec: &CropSpecification,
    ) -> Result<ImageBuffer, MmrError> {
        if let Some(kind) = self.model_kind {
            ensure!(
                kind == spec.kind(),
                InvalidCropInputSnafu {
                    message: format!(
                        "model `{}` expects {:?} crops, got {:?}",
                        self.model_name,
                        kind,
                        spec.kind()
                    ),
                }
            );
        }
        geometry::normalize(image, spec, &self.crop)
    }

    fn compute_descriptor(&mut self, image: &ImageBuffer) -> Result<Descriptor, MmrError> {
        ensure_normalized(image, &self.crop)?;
        let input = self.preprocess(std::slice::from_ref(image));
        let rows = self.infer(input)?;
        self.descriptors(rows)?
            .pop()
            .context(NotFoundOutputSnafu {
                output_name: self.output_name.as_str(),
            })
    }

    fn compute_descriptor_batch(
        &mut self,
        images: &[ImageBuffer],
    ) -> Result<Vec<Descriptor>, MmrError> {
        ensure!(
            self.supports_batch,
            UnsupportedOperationSnafu {
                operation: "compute_descriptor_batch",
                model: self.model_name.as_str(),
            }
        );
        if images.is_empty() {
            return Ok(Vec::new());
        }
        for image in images {
            ensure_normalized(image, &self.crop)?;
        }

        let input = self.preprocess(images);
        let rows = self.infer(input)?;
        self.descriptors(rows)
    }

    fn classify(
        &mut self,
        descriptor: &Descriptor,
        config: &ClassifyConfig,
    ) -> Result<ClassificationResult, MmrError> {
        self.classifier.classify(descriptor, config)
    }

    fn dispose(self) {
        debug!("releasing session of `{}`", self.model_name);
        drop(self.session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consts::MODULE_PATH_ENV_NAME,
        error::ErrorKind,
        inference::{
            catalog::{ModelPrecision, MmrTask, model_file_name},
            config::ComputeMode,
        },
    };

    #[test]
    fn test_missing_module_path_fails_init() {
        let config = EngineConfig::new(
            "/nonexistent/mmr/modules",
            model_file_name(MmrTask::Vcmmct, CropKind::LicensePlate, ModelPrecision::Fast),
            ComputeMode::Cpu,
        );
        let err = OnnxEngine::initialize(&config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::EngineInit);
    }

    #[test]
    fn test_missing_manifest_fails_init() -> Result<(), Box<dyn std::error::Error>> {
        let dir = std::env::temp_dir().join("mmr-onnx-no-manifest");
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("model.onnx"), b"not a graph")?;

        let config = EngineConfig::new(&dir, "model.onnx", ComputeMode::Cpu);
        let err = OnnxEngine::initialize(&config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::EngineInit);
        Ok(())
    }

    /// Needs a module directory with the catalog model and its manifest.
    #[test]
    #[ignore]
    fn test_descriptor_batch_matches_single() -> Result<(), Box<dyn std::error::Error>> {
        let module_path = std::env::var(MODULE_PATH_ENV_NAME)?;
        let config = EngineConfig::new(
            module_path,
            model_file_name(MmrTask::Vcmmct, CropKind::LicensePlate, ModelPrecision::Fast),
            ComputeMode::Cpu,
        );
        let mut engine = OnnxEngine::initialize(&config)?;

        let data = (0..480u32 * 640 * 3).map(|i| (i % 253) as u8).collect();
        let frame = ImageBuffer::from_raw(640, 480, crate::buffer::ColorModel::Rgb, data)?;
        let crops = vec![
            engine.crop_image(&frame, &CropSpecification::license_plate(320.0, 300.0, 90.0, 0.0)?)?,
            engine.crop_image(&frame, &CropSpecification::license_plate(300.0, 320.0, 70.0, 4.0)?)?,
        ];

        let singles = crops
            .iter()
            .map(|crop| engine.compute_descriptor(crop))
            .collect::<Result<Vec<_>, _>>()?;
        match engine.compute_descriptor_batch(&crops) {
            Ok(batched) => {
                for (single, batched) in singles.iter().zip(&batched) {
                    assert!(single.max_abs_diff(batched)? < 1e-3);
                }
            }
            Err(err) => assert_eq!(err.kind(), ErrorKind::UnsupportedOperation),
        }

        let result = engine.classify(&singles[0], &ClassifyConfig::default())?;
        assert!(!result.is_empty());
        engine.dispose();
        Ok(())
    }
}
