use serde::Serialize;
use snafu::Snafu;
use std::fmt;

use crate::error::{ErrorKind, MmrError};

/// Stages of one pipeline run, in the only order they can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Uninitialized,
    ImageLoaded,
    EngineReady,
    CropSpecReady,
    Cropped,
    DescriptorComputed,
    Classified,
    Disposed,
}

impl PipelineState {
    /// What has to succeed to reach this state.
    pub fn operation(self) -> &'static str {
        match self {
            Self::Uninitialized => "start",
            Self::ImageLoaded => "load image",
            Self::EngineReady => "initialize engine",
            Self::CropSpecReady => "create crop specification",
            Self::Cropped => "crop image",
            Self::DescriptorComputed => "compute descriptor",
            Self::Classified => "classify",
            Self::Disposed => "dispose engine",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::ImageLoaded => "image_loaded",
            Self::EngineReady => "engine_ready",
            Self::CropSpecReady => "crop_spec_ready",
            Self::Cropped => "cropped",
            Self::DescriptorComputed => "descriptor_computed",
            Self::Classified => "classified",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// A failed pipeline run: the state it could not reach and why.
#[derive(Debug, Snafu)]
#[snafu(display(
    "{} failed (last reached `{}`): {}",
    stage.operation(),
    reached,
    source
))]
pub struct PipelineError {
    pub stage: PipelineState,
    pub reached: PipelineState,
    pub source: MmrError,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}
