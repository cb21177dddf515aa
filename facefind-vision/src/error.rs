use thiserror::Error;

/// Failures raised while turning image bytes into embeddings.
#[derive(Debug, Error)]
pub enum VisionError {
    /// Payload rejected before decoding (absent or implausibly small).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Bytes are not a recognizable image.
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    /// The face detection/embedding backend failed for the whole image.
    #[error("face model failure: {0}")]
    Model(String),
}

impl VisionError {
    pub(crate) fn model(err: anyhow::Error) -> Self {
        VisionError::Model(format!("{err:#}"))
    }
}
