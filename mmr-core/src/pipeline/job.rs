use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use tracing::*;

use crate::{
    buffer::ImageBuffer, classify::ClassifyConfig, crop::params::CropInput, error::*,
    inference::config::EngineConfig,
};

/// Where a frame comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageSource {
    /// Headerless planar YCbCr 4:2:0 frame.
    Raw {
        raw_ycbcr420: PathBuf,
        width: u32,
        height: u32,
    },
    /// Any encoded image file.
    File(PathBuf),
}

impl ImageSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Raw { raw_ycbcr420, .. } => raw_ycbcr420,
            Self::File(path) => path,
        }
    }

    fn path_mut(&mut self) -> &mut PathBuf {
        match self {
            Self::Raw { raw_ycbcr420, .. } => raw_ycbcr420,
            Self::File(path) => path,
        }
    }

    pub fn load(&self) -> Result<ImageBuffer, MmrError> {
        match self {
            Self::Raw {
                raw_ycbcr420,
                width,
                height,
            } => ImageBuffer::load_ycbcr420(raw_ycbcr420, *width, *height),
            Self::File(path) => ImageBuffer::load(path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    pub image: ImageSource,
    pub crop: CropInput,
}

/// How descriptors are computed for a multi-frame job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorMode {
    /// One engine call per frame.
    #[default]
    Single,
    /// One batched call; fails when the model has no batched path.
    Batch,
}

/// A recognition job as read from a JSON file.
///
/// Relative paths are resolved against the job file's directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub engine: EngineConfig,
    pub inputs: Vec<JobInput>,
    #[serde(default)]
    pub classify: ClassifyConfig,
    #[serde(default)]
    pub mode: DescriptorMode,
    /// Directory for the normalized crops, written as PNG.
    #[serde(default)]
    pub save_crops: Option<PathBuf>,
}

impl PipelineJob {
    /// Reads a job file; `MMR_MODULE_PATH` overrides its module path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MmrError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();
        let text = std::fs::read_to_string(path).context(IoReadSnafu { path: &path_str })?;
        let mut job: Self = serde_json::from_str(&text).context(JobParseSnafu { path: &path_str })?;

        if let Some(base) = path.parent() {
            job.resolve_paths(base);
        }
        job.engine = job.engine.with_env_module_path();
        info!(
            "job `{}`: {} input(s), model `{}`",
            path_str,
            job.inputs.len(),
            job.engine.model_name
        );
        Ok(job)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.engine.module_path);
        for input in &mut self.inputs {
            resolve(input.image.path_mut());
        }
        if let Some(dir) = self.save_crops.as_mut() {
            resolve(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{classify::TopScores, error::ErrorKind, inference::config::ComputeMode};

    const JOB: &str = r#"{
        "engine": {
            "module_path": "modules",
            "model_name": "MMR_VCMMCT_FAST_2024Q2.dat",
            "compute_mode": "cpu"
        },
        "inputs": [
            {
                "image": "frames/car_cz.jpg",
                "crop": {"cols": [475.0], "rows": [573.0], "aux_values": [257.7, 2.0]}
            },
            {
                "image": {"raw_ycbcr420": "/data/frame.yuv", "width": 1920, "height": 1080},
                "crop": {"cols": [282, 754], "rows": [142, 640]}
            }
        ],
        "classify": {"top_scores": {"top": 3}},
        "mode": "batch"
    }"#;

    #[test]
    fn test_parse_job() -> Result<(), Box<dyn std::error::Error>> {
        let mut job: PipelineJob = serde_json::from_str(JOB)?;
        assert_eq!(job.engine.compute_mode, ComputeMode::Cpu);
        assert_eq!(job.mode, DescriptorMode::Batch);
        assert_eq!(job.classify.top_scores, TopScores::Top(3));
        assert!(matches!(job.inputs[0].image, ImageSource::File(_)));
        assert!(matches!(
            job.inputs[1].image,
            ImageSource::Raw { width: 1920, height: 1080, .. }
        ));

        job.resolve_paths(Path::new("/jobs"));
        assert_eq!(job.engine.module_path, PathBuf::from("/jobs/modules"));
        assert_eq!(job.inputs[0].image.path(), Path::new("/jobs/frames/car_cz.jpg"));
        assert_eq!(job.inputs[1].image.path(), Path::new("/data/frame.yuv"));
        Ok(())
    }

    #[test]
    fn test_load_errors_are_config() -> Result<(), Box<dyn std::error::Error>> {
        let missing = PipelineJob::load("/nonexistent/job.json").unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Config);

        let path = std::env::temp_dir().join("mmr-job-invalid.json");
        std::fs::write(&path, r#"{"engine": {}}"#)?;
        assert_eq!(PipelineJob::load(&path).unwrap_err().kind(), ErrorKind::Config);
        Ok(())
    }
}
