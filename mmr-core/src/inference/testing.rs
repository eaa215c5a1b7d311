//! Deterministic in-memory engine for exercising the lifecycle without a
//! model on disk.

use snafu::ensure;
use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock, PoisonError},
};

use crate::{
    buffer::ImageBuffer,
    classify::{ClassificationResult, Classifier, ClassifyConfig, TaskHead},
    crop::{config::CropConfig, geometry, params::CropSpecification},
    descriptor::Descriptor,
    error::*,
    inference::{
        config::EngineConfig,
        engine::{InferenceEngine, ensure_normalized},
    },
};

pub const FAKE_VERSION: u32 = 3;
pub const FAKE_DESCRIPTOR_LEN: usize = 4;

/// Lifecycle events recorded per model name.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub initialized: usize,
    pub disposed: usize,
    pub crops: usize,
    pub descriptors: usize,
    pub batches: usize,
}

fn ledger() -> &'static Mutex<HashMap<String, Counts>> {
    static LEDGER: OnceLock<Mutex<HashMap<String, Counts>>> = OnceLock::new();
    LEDGER.get_or_init(Default::default)
}

fn record(model: &str, update: impl FnOnce(&mut Counts)) {
    let mut ledger = ledger().lock().unwrap_or_else(PoisonError::into_inner);
    update(ledger.entry(model.to_string()).or_default());
}

/// Counts for a model name; every test uses its own name.
pub fn counts(model: &str) -> Counts {
    let ledger = ledger().lock().unwrap_or_else(PoisonError::into_inner);
    ledger.get(model).copied().unwrap_or_default()
}

/// Config for the fake engine. `module_path` is the temp dir so path checks
/// pass; model names containing `batch` enable the batched path and names
/// containing `broken` fail to load.
pub fn fake_config(model: &str) -> EngineConfig {
    EngineConfig::new(
        std::env::temp_dir(),
        model,
        crate::inference::config::ComputeMode::Cpu,
    )
}

fn fake_heads() -> Vec<TaskHead> {
    vec![
        TaskHead {
            name: "category".to_string(),
            classes: vec!["car".to_string(), "van".to_string()],
            weights: vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0],
            bias: vec![],
        },
        TaskHead {
            name: "make".to_string(),
            classes: vec!["Skoda".to_string(), "Audi".to_string()],
            weights: vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0],
            bias: vec![],
        },
    ]
}

pub struct FakeEngine {
    model_name: String,
    batch: bool,
    crop: CropConfig,
    classifier: Classifier,
}

impl InferenceEngine for FakeEngine {
    fn initialize(config: &EngineConfig) -> Result<Self, MmrError> {
        ensure!(
            config.module_path.is_dir(),
            EngineInitSnafu {
                stage: "module-path",
                message: format!("`{}` is not a directory", config.module_path.display()),
            }
        );
        ensure!(
            !config.model_name.contains("broken"),
            EngineInitSnafu {
                stage: "model",
                message: "model failed to load",
            }
        );
        config.execution_provider()?;

        record(&config.model_name, |c| c.initialized += 1);
        Ok(Self {
            model_name: config.model_name.clone(),
            batch: config.model_name.contains("batch"),
            crop: config.crop.clone(),
            classifier: Classifier::new(fake_heads(), FAKE_DESCRIPTOR_LEN, FAKE_VERSION)?,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn model_version(&self) -> u32 {
        FAKE_VERSION
    }

    fn descriptor_len(&self) -> usize {
        self.classifier.descriptor_len()
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    fn crop_image(
        &mut self,
        image: &ImageBuffer,
        spec: &CropSpecification,
    ) -> Result<ImageBuffer, MmrError> {
        let crop = geometry::normalize(image, spec, &self.crop)?;
        record(&self.model_name, |c| c.crops += 1);
        Ok(crop)
    }

    /// Mean intensity of each quarter of the pixel data.
    fn compute_descriptor(&mut self, image: &ImageBuffer) -> Result<Descriptor, MmrError> {
        ensure_normalized(image, &self.crop)?;
        let bytes = image.as_bytes();
        let chunk = bytes.len().div_ceil(FAKE_DESCRIPTOR_LEN);
        let data = bytes
            .chunks(chunk)
            .map(|part| part.iter().map(|&v| v as f32).sum::<f32>() / (part.len() as f32 * 255.0))
            .collect();
        record(&self.model_name, |c| c.descriptors += 1);
        Ok(Descriptor::new(FAKE_VERSION, data))
    }

    fn compute_descriptor_batch(
        &mut self,
        images: &[ImageBuffer],
    ) -> Result<Vec<Descriptor>, MmrError> {
        ensure!(
            self.batch,
            UnsupportedOperationSnafu {
                operation: "compute_descriptor_batch",
                model: self.model_name.as_str(),
            }
        );
        record(&self.model_name, |c| c.batches += 1);
        images
            .iter()
            .map(|image| self.compute_descriptor(image))
            .collect()
    }

    fn classify(
        &mut self,
        descriptor: &Descriptor,
        config: &ClassifyConfig,
    ) -> Result<ClassificationResult, MmrError> {
        self.classifier.classify(descriptor, config)
    }

    fn dispose(self) {
        record(&self.model_name, |c| c.disposed += 1);
    }
}
