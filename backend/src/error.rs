use thiserror::Error;

/// Failures while turning uploaded bytes into a model input tensor.
/// All of these are caller mistakes and map to 400 at the route boundary.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Image dimensions too small. Minimum size is {min}x{min} pixels, got {width}x{height}")]
    TooSmall { width: u32, height: u32, min: u32 },
    #[error("Image dimensions too large. Maximum size is {max}x{max} pixels, got {width}x{height}")]
    TooLarge { width: u32, height: u32, max: u32 },
}

/// Failures inside the classifier service; map to 500 at the route boundary.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Model not loaded")]
    NotLoaded,
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("Model execution failed: {0}")]
    Model(#[from] tch::TchError),
    #[error("Unexpected model output: {0}")]
    Output(String),
}
