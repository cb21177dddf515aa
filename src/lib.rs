pub mod config;
pub mod error;
pub mod fetch;
pub mod input;
pub mod matcher;
pub mod search;
pub mod storage;

pub use error::{Error, Result};

// Re-export vision types for convenience
pub use facefind_vision::{
    Detection, Embedding, Extractor, ExtractorConfig, FaceModel, OnnxFaceModel,
};
