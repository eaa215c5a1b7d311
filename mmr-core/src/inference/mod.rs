pub mod catalog;
pub mod config;
pub mod engine;
pub mod handle;
pub mod model;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ComputeMode, EngineConfig, EngineConfigBuilder, OnnxProvider};
pub use engine::InferenceEngine;
pub use handle::{EngineHandle, SharedEngine};
pub use session::OnnxEngine;
