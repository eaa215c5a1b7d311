use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MmrError {
    #[snafu(display("Open image `{}` error: {}", path, source))]
    ImageOpen {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Decode image `{}` error: {}", path, source))]
    ImageDecode {
        source: image::ImageError,
        path: String,
    },
    #[snafu(display("Image `{}` is empty", path))]
    EmptyImage { path: String },
    #[snafu(display("Image `{}` has unsupported color model {}", path, color))]
    UnsupportedColorModel { path: String, color: String },
    #[snafu(display(
        "Raw image `{}` size mismatch: expected {} bytes, got {}",
        path,
        expected,
        actual
    ))]
    RawImageSize {
        path: String,
        expected: usize,
        actual: usize,
    },
    #[snafu(display("Engine init stage `{}` error: {}", stage, message))]
    EngineInit { stage: String, message: String },
    #[snafu(display("Ort Session init stage `{}` error: {}", stage, source))]
    OrtInit {
        source: ort::error::Error,
        stage: String,
    },
    #[snafu(display("Read model manifest `{}` error: {}", path, source))]
    ManifestRead {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Model manifest `{}` error: {}", path, source))]
    Manifest {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Invalid crop parameters: {}", message))]
    CropParams { message: String },
    #[snafu(display("Invalid crop input: {}", message))]
    InvalidCropInput { message: String },
    #[snafu(display("Operation `{}` is not supported by model `{}`", operation, model))]
    UnsupportedOperation { operation: String, model: String },
    #[snafu(display(
        "Invalid descriptor: expected {} values (version {}), got {} (version {})",
        expected,
        expected_version,
        actual,
        actual_version
    ))]
    InvalidDescriptor {
        expected: usize,
        expected_version: u32,
        actual: usize,
        actual_version: u32,
    },
    #[snafu(display("Invalid descriptor: value {} at index {} is not finite", value, index))]
    NonFiniteDescriptor { index: usize, value: f32 },
    #[snafu(display("Engine handle already disposed, `{}` rejected", operation))]
    DisposedHandle { operation: String },
    #[snafu(display("Build Tensor for `{}` error: {}", stage, source))]
    Tensor {
        source: ort::error::Error,
        stage: String,
    },
    #[snafu(display("Onnx Inference error: {}", source))]
    Inference { source: ort::error::Error },
    #[snafu(display("Onnx Output can not found {}", output_name))]
    NotFoundOutput { output_name: String },
    #[snafu(display("Ndarray Shape error at stage `{}`: {}", stage, source))]
    Shape {
        source: ndarray::ShapeError,
        stage: String,
    },
    #[snafu(display("Image Write error: {}", source))]
    ImageWrite {
        source: image::ImageError,
        path: String,
    },
    #[snafu(display("Read `{}` error: {}", path, source))]
    IoRead {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Parse job `{}` error: {}", path, source))]
    JobParse {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Job has no inputs"))]
    JobEmpty {},
    #[snafu(display("Create output directory `{}` error: {}", path, source))]
    OutputDir {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Environment `{}` Not Found, error {}", name, source))]
    EnvNotFound {
        source: std::env::VarError,
        name: String,
    },
}

/// Coarse classification callers branch on instead of matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ImageLoad,
    EngineInit,
    CropParams,
    InvalidCropInput,
    UnsupportedOperation,
    InvalidDescriptor,
    DisposedHandle,
    Runtime,
    Config,
}

impl MmrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MmrError::ImageOpen { .. }
            | MmrError::ImageDecode { .. }
            | MmrError::EmptyImage { .. }
            | MmrError::UnsupportedColorModel { .. }
            | MmrError::RawImageSize { .. } => ErrorKind::ImageLoad,
            MmrError::EngineInit { .. }
            | MmrError::OrtInit { .. }
            | MmrError::ManifestRead { .. }
            | MmrError::Manifest { .. } => ErrorKind::EngineInit,
            MmrError::CropParams { .. } => ErrorKind::CropParams,
            MmrError::InvalidCropInput { .. } => ErrorKind::InvalidCropInput,
            MmrError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            MmrError::InvalidDescriptor { .. } | MmrError::NonFiniteDescriptor { .. } => {
                ErrorKind::InvalidDescriptor
            }
            MmrError::DisposedHandle { .. } => ErrorKind::DisposedHandle,
            MmrError::Tensor { .. }
            | MmrError::Inference { .. }
            | MmrError::NotFoundOutput { .. }
            | MmrError::Shape { .. }
            | MmrError::ImageWrite { .. } => ErrorKind::Runtime,
            MmrError::IoRead { .. }
            | MmrError::JobParse { .. }
            | MmrError::JobEmpty { .. }
            | MmrError::OutputDir { .. }
            | MmrError::EnvNotFound { .. } => ErrorKind::Config,
        }
    }

    /// Fatal for the configuration that produced it; retrying without a
    /// different config is pointless.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::EngineInit
    }

    /// Misuse of the API rather than a runtime condition.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidDescriptor | ErrorKind::DisposedHandle
        )
    }
}
