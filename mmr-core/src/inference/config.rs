use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use std::{
    path::{Path, PathBuf},
    thread,
};
use tracing::*;

use crate::{consts::MODULE_PATH_ENV_NAME, crop::config::CropConfig, error::*};

/// Where inference runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeMode {
    #[default]
    Cpu,
    Accelerated,
}

/// ONNX Runtime execution provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnnxProvider {
    Cpu,
    Cuda,
    TensorRt,
    CoreMl,
}

impl OnnxProvider {
    /// Accelerator compiled into this build, preferred in that order.
    pub fn accelerated() -> Option<Self> {
        [Self::Cuda, Self::TensorRt, Self::CoreMl]
            .into_iter()
            .find(|provider| provider.is_available())
    }

    pub fn is_available(self) -> bool {
        match self {
            Self::Cpu => true,
            Self::Cuda => cfg!(feature = "cuda"),
            Self::TensorRt => cfg!(feature = "tensorrt"),
            Self::CoreMl => cfg!(all(feature = "coreml", target_os = "macos")),
        }
    }
}

/// Engine initialization parameters. Immutable once a handle is built from
/// it; new options get defaults so existing job files keep working.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct EngineConfig {
    /// Directory holding model artifacts.
    pub module_path: PathBuf,
    /// Artifact file name inside `module_path`.
    pub model_name: String,
    #[builder(default)]
    #[serde(default)]
    pub compute_mode: ComputeMode,
    #[builder(default)]
    #[serde(default)]
    pub gpu_device_id: i32,
    /// `0` or `1` run single-threaded, negative values use 90% of the
    /// available cores.
    #[builder(default = "1")]
    #[serde(default = "default_num_threads")]
    pub num_threads: i32,
    /// Forces a provider instead of deriving one from `compute_mode`.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub onnx_provider: Option<OnnxProvider>,
    #[builder(default)]
    #[serde(default)]
    pub crop: CropConfig,
}

fn default_num_threads() -> i32 {
    1
}

impl EngineConfig {
    pub fn new(
        module_path: impl Into<PathBuf>,
        model_name: impl Into<String>,
        compute_mode: ComputeMode,
    ) -> Self {
        Self {
            module_path: module_path.into(),
            model_name: model_name.into(),
            compute_mode,
            gpu_device_id: 0,
            num_threads: default_num_threads(),
            onnx_provider: None,
            crop: CropConfig::default(),
        }
    }

    /// Module directory named by `MMR_MODULE_PATH`.
    pub fn module_path_from_env() -> Result<PathBuf, MmrError> {
        std::env::var(MODULE_PATH_ENV_NAME)
            .map(PathBuf::from)
            .context(EnvNotFoundSnafu {
                name: MODULE_PATH_ENV_NAME,
            })
    }

    /// Replaces `module_path` when `MMR_MODULE_PATH` is set.
    pub fn with_env_module_path(mut self) -> Self {
        if let Ok(path) = Self::module_path_from_env() {
            debug!("module path overridden from env: {}", path.display());
            self.module_path = path;
        }
        self
    }

    pub fn model_path(&self) -> PathBuf {
        self.module_path.join(&self.model_name)
    }

    /// Model artifact path, checked to exist.
    pub fn resolve_model_path(&self) -> Result<PathBuf, MmrError> {
        ensure!(
            self.module_path.is_dir(),
            EngineInitSnafu {
                stage: "module-path",
                message: format!("`{}` is not a directory", self.module_path.display()),
            }
        );
        let model_path = self.model_path();
        ensure!(
            model_path.is_file(),
            EngineInitSnafu {
                stage: "model",
                message: format!("model artifact `{}` not found", model_path.display()),
            }
        );
        Ok(model_path)
    }

    /// Provider this config runs on in the current build.
    ///
    /// An explicit provider must be compiled in. `Accelerated` without any
    /// accelerator falls back to the CPU.
    pub fn execution_provider(&self) -> Result<OnnxProvider, MmrError> {
        if let Some(provider) = self.onnx_provider {
            ensure!(
                provider.is_available(),
                EngineInitSnafu {
                    stage: "provider",
                    message: format!("{provider:?} is not available in this build"),
                }
            );
            return Ok(provider);
        }

        Ok(match self.compute_mode {
            ComputeMode::Cpu => OnnxProvider::Cpu,
            ComputeMode::Accelerated => OnnxProvider::accelerated().unwrap_or_else(|| {
                warn!("no accelerator compiled in, running `{}` on CPU", self.model_name);
                OnnxProvider::Cpu
            }),
        })
    }

    /// Intra-op thread count handed to the runtime.
    pub fn threads(&self) -> usize {
        if self.num_threads >= 0 {
            return (self.num_threads as usize).max(1);
        }
        let cores = thread::available_parallelism().map_or(1, |n| n.get());
        ((cores as f64 * 0.9) as usize).max(1)
    }

    pub fn model_stem(&self) -> &str {
        Path::new(&self.model_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.model_name)
    }
}
