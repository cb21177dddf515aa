pub mod error;
pub mod extract;
pub mod face;
pub mod onnx;
pub mod session;
pub mod sface;
pub mod yunet;

// Re-export commonly used types
pub use error::VisionError;
pub use extract::{Extractor, ExtractorConfig};
pub use face::{Detection, Embedding, FaceModel};
pub use onnx::OnnxFaceModel;
