pub mod buffer;
pub mod classify;
pub mod consts;
pub mod crop;
pub mod descriptor;
pub mod error;
pub mod inference;
pub mod pipeline;

// Re-export commonly used types
pub use buffer::{ColorModel, ImageBuffer};
pub use classify::{ClassificationResult, ClassifyConfig, TopScores};
pub use crop::{CropConfig, CropInput, CropSpecification};
pub use descriptor::Descriptor;
pub use error::{ErrorKind, MmrError};
pub use inference::{ComputeMode, EngineConfig, EngineHandle, InferenceEngine, OnnxEngine, SharedEngine};
pub use pipeline::{PipelineJob, PipelineOrchestrator, PipelineReport, PipelineState};
