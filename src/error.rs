use facefind_vision::VisionError;
use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure a match or search request can end in.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing input, detected before any processing.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("cannot decode image: {0}")]
    Decode(String),
    /// The reference image produced no usable face.
    #[error("no faces detected in reference image")]
    NoFaceDetected,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// Stored embeddings were produced by another model than the extractor's.
    #[error("embedding model mismatch: collection uses {stored}, extractor uses {current}")]
    ModelMismatch { stored: String, current: String },
    /// Storage fetch, network request or face model failed.
    #[error("external resource failed: {0}")]
    ExternalResource(String),
    #[error("collection {0} not found")]
    CollectionNotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::Decode(_) => "decode",
            Error::NoFaceDetected => "no_face_detected",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::ModelMismatch { .. } => "model_mismatch",
            Error::ExternalResource(_) => "external_resource",
            Error::CollectionNotFound(_) => "collection_not_found",
            Error::Storage(_) => "storage",
        }
    }

    /// HTTP-style status for callers that expose results over a request API.
    pub fn status(&self) -> u16 {
        match self {
            Error::InvalidInput(_) | Error::Decode(_) | Error::NoFaceDetected => 400,
            Error::CollectionNotFound(_) => 404,
            Error::DimensionMismatch { .. } | Error::ModelMismatch { .. } => 409,
            Error::ExternalResource(_) => 502,
            Error::Storage(_) => 500,
        }
    }
}

impl From<VisionError> for Error {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::InvalidInput(msg) => Error::InvalidInput(msg),
            VisionError::Decode(e) => Error::Decode(e.to_string()),
            VisionError::Model(msg) => Error::ExternalResource(msg),
        }
    }
}

impl From<postcard::Error> for Error {
    fn from(err: postcard::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Structured failure document printed by the binary.
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub error: String,
    pub kind: &'static str,
    pub code: u16,
}

impl From<&anyhow::Error> for ErrorReport {
    fn from(err: &anyhow::Error) -> Self {
        let (kind, code) = match err.downcast_ref::<Error>() {
            Some(e) => (e.kind(), e.status()),
            None => ("internal", 500),
        };
        Self {
            error: format!("{err:#}"),
            kind,
            code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn vision_errors_map_to_kinds() {
        let err: Error = VisionError::InvalidInput("too small".into()).into();
        assert_eq!(err.kind(), "invalid_input");
        assert_eq!(err.status(), 400);

        let err: Error = VisionError::Model("session crashed".into()).into();
        assert_eq!(err.kind(), "external_resource");
        assert_eq!(err.status(), 502);
    }

    #[test]
    fn report_sees_through_context() {
        let err = Err::<(), _>(Error::CollectionNotFound("507f1f77bcf86cd799439011".into()))
            .context("loading collection")
            .unwrap_err();
        let report = ErrorReport::from(&err);
        assert_eq!(report.kind, "collection_not_found");
        assert_eq!(report.code, 404);
        assert!(report.error.starts_with("loading collection: "));
        assert!(report.error.contains("507f1f77bcf86cd799439011"));
    }

    #[test]
    fn untyped_errors_are_internal() {
        let err = anyhow::anyhow!("parsing config");
        let report = ErrorReport::from(&err);
        assert_eq!(report.kind, "internal");
        assert_eq!(report.code, 500);
    }
}
