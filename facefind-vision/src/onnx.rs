use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{Detection, Embedding, FaceModel};
use crate::{session, sface, yunet};

/// YuNet detector + SFace recognizer running on ONNX Runtime.
pub struct OnnxFaceModel {
    detector: Session,
    recognizer: Session,
    score_threshold: f32,
    nms_threshold: f32,
}

impl OnnxFaceModel {
    /// Identifier stamped on every embedding this backend produces.
    pub const MODEL_ID: &'static str = "sface-2021dec";

    pub fn load(
        detector: &Path,
        recognizer: &Path,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self> {
        Ok(Self {
            detector: session::load_session(detector).context("loading face detector")?,
            recognizer: session::load_session(recognizer)
                .context("loading face recognizer")?,
            score_threshold,
            nms_threshold,
        })
    }
}

impl FaceModel for OnnxFaceModel {
    fn model_id(&self) -> &str {
        Self::MODEL_ID
    }

    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        yunet::detect(
            &mut self.detector,
            img,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")
    }

    fn embed(&mut self, img: &DynamicImage, detection: &Detection) -> Result<Embedding> {
        let face_img =
            sface::align_face(img, detection, sface::FACE_SIZE).context("aligning face")?;
        sface::encode_face(&mut self.recognizer, &face_img).context("encoding face")
    }
}
