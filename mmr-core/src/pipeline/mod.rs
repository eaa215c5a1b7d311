pub mod job;
pub mod orchestrator;
pub mod state;
pub mod timing;

pub use job::{DescriptorMode, ImageSource, JobInput, PipelineJob};
pub use orchestrator::{FrameReport, PipelineOrchestrator, PipelineReport};
pub use state::{PipelineError, PipelineState};
pub use timing::{DescriptorTiming, StageTimings};
