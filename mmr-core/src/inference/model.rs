use ort::{
    execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch},
    session::{
        Session,
        builder::{GraphOptimizationLevel, SessionBuilder},
    },
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use std::path::{Path, PathBuf};

use crate::{
    classify::TaskHead,
    consts::{CROP_SIZE, DEFAULT_MEAN, DEFAULT_STD},
    error::*,
    inference::config::{EngineConfig, OnnxProvider},
};

/// Sidecar description of an ONNX descriptor model, stored next to the
/// artifact as `<model stem>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: u32,
    #[serde(default = "default_input_size")]
    pub input_width: u32,
    #[serde(default = "default_input_size")]
    pub input_height: u32,
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],
    /// Falls back to the graph's first input.
    #[serde(default)]
    pub input_name: Option<String>,
    /// Falls back to the graph's first output.
    #[serde(default)]
    pub output_name: Option<String>,
    pub descriptor_len: usize,
    #[serde(default)]
    pub supports_batch: bool,
    pub heads: Vec<TaskHead>,
}

fn default_input_size() -> u32 {
    CROP_SIZE
}

fn default_mean() -> [f32; 3] {
    DEFAULT_MEAN
}

fn default_std() -> [f32; 3] {
    DEFAULT_STD
}

impl ModelManifest {
    pub fn path_for(model_path: &Path) -> PathBuf {
        model_path.with_extension("json")
    }

    pub fn load(path: &Path) -> Result<Self, MmrError> {
        let path_str = path.display().to_string();
        let text = std::fs::read_to_string(path).context(ManifestReadSnafu {
            path: path_str.as_str(),
        })?;
        let manifest: Self = serde_json::from_str(&text).context(ManifestSnafu {
            path: path_str.as_str(),
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), MmrError> {
        ensure!(
            self.descriptor_len > 0 && self.input_width > 0 && self.input_height > 0,
            EngineInitSnafu {
                stage: "manifest",
                message: "descriptor length and input size must be positive",
            }
        );
        ensure!(
            self.std.iter().all(|s| *s > 0.0),
            EngineInitSnafu {
                stage: "manifest",
                message: "channel std must be positive",
            }
        );
        Ok(())
    }
}

fn execution_providers(provider: OnnxProvider, device_id: i32) -> Vec<ExecutionProviderDispatch> {
    let mut providers = Vec::with_capacity(2);
    match provider {
        #[cfg(feature = "cuda")]
        OnnxProvider::Cuda => {
            use ort::execution_providers::CUDAExecutionProvider;
            providers.push(
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            );
        }
        #[cfg(feature = "tensorrt")]
        OnnxProvider::TensorRt => {
            use ort::execution_providers::TensorRTExecutionProvider;
            providers.push(
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            );
        }
        #[cfg(all(feature = "coreml", target_os = "macos"))]
        OnnxProvider::CoreMl => {
            use ort::execution_providers::CoreMLExecutionProvider;
            use ort::execution_providers::coreml::*;
            providers.push(
                CoreMLExecutionProvider::default()
                    .with_model_format(CoreMLModelFormat::MLProgram)
                    .build(),
            );
        }
        _ => {
            let _ = device_id;
        }
    }
    // CPU last so unsupported graph nodes still have somewhere to run.
    providers.push(CPUExecutionProvider::default().build());
    providers
}

/// Session builder for an engine config.
pub fn session_builder(config: &EngineConfig) -> Result<SessionBuilder, MmrError> {
    let provider = config.execution_provider()?;
    let session_builder = Session::builder()
        .context(OrtInitSnafu { stage: "builder" })?
        .with_execution_providers(execution_providers(provider, config.gpu_device_id))
        .context(OrtInitSnafu { stage: "provider" })?
        .with_optimization_level(GraphOptimizationLevel::Level1)
        .context(OrtInitSnafu {
            stage: "optimization",
        })?
        .with_intra_threads(config.threads())
        .context(OrtInitSnafu {
            stage: "intra-threads",
        })?;

    Ok(session_builder)
}
