use std::fmt;

use image::{DynamicImage, GenericImageView};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::VisionError;
use crate::face::{Detection, Embedding, FaceModel};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Payloads shorter than this are rejected without decoding.
    pub min_input_bytes: usize,
    /// Minimum width and height, in pixels, of a usable face crop.
    pub min_face_size: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_input_bytes: 1024,
            min_face_size: 40,
        }
    }
}

/// Why a detection was dropped before embedding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    EmptyBox { w: f32, h: f32 },
    NegativeOrigin { x: f32, y: f32 },
    TooSmall { w: f32, h: f32 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::EmptyBox { w, h } => write!(f, "non-positive box size {w}x{h}"),
            Rejection::NegativeOrigin { x, y } => write!(f, "negative box origin ({x}, {y})"),
            Rejection::TooSmall { w, h } => write!(f, "face crop too small: {w:.0}x{h:.0}"),
        }
    }
}

/// Turns image bytes into zero or more face embeddings using a [`FaceModel`].
pub struct Extractor<M> {
    model: M,
    config: ExtractorConfig,
}

impl<M: FaceModel> Extractor<M> {
    pub fn new(model: M, config: ExtractorConfig) -> Self {
        Self { model, config }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Decode `bytes` and embed every usable face, in detection order.
    ///
    /// An image without usable faces yields an empty vector.
    pub fn extract(&mut self, bytes: &[u8]) -> Result<Vec<Embedding>, VisionError> {
        check_payload(bytes, self.config.min_input_bytes)?;
        let img = image::load_from_memory(bytes)?;
        self.extract_image(&img)
    }

    pub fn extract_image(&mut self, img: &DynamicImage) -> Result<Vec<Embedding>, VisionError> {
        let detections = self.model.detect(img).map_err(VisionError::model)?;
        let (width, height) = img.dimensions();
        debug!(
            "{} raw detection(s) in {}x{} image",
            detections.len(),
            width,
            height
        );

        let mut embeddings = Vec::with_capacity(detections.len());
        for (idx, detection) in detections.iter().enumerate() {
            if let Err(reason) =
                validate_detection(detection, width, height, self.config.min_face_size)
            {
                warn!("skipping detection {}: {}", idx, reason);
                continue;
            }
            match self.model.embed(img, detection) {
                Ok(embedding) => embeddings.push(embedding),
                Err(e) => warn!("embedding failed for detection {}: {:#}", idx, e),
            }
        }
        Ok(embeddings)
    }
}

fn check_payload(bytes: &[u8], min_len: usize) -> Result<(), VisionError> {
    if bytes.is_empty() {
        return Err(VisionError::InvalidInput("image payload is empty".into()));
    }
    if bytes.len() < min_len {
        return Err(VisionError::InvalidInput(format!(
            "image payload too small: {} bytes, need at least {}",
            bytes.len(),
            min_len
        )));
    }
    Ok(())
}

/// Check a detection box against the image it came from.
///
/// The crop is clamped to the image bounds before the size floor applies.
pub fn validate_detection(
    detection: &Detection,
    img_width: u32,
    img_height: u32,
    min_face_size: u32,
) -> Result<(), Rejection> {
    let [x, y, w, h] = detection.bbox;
    if !(w > 0.0 && h > 0.0) {
        return Err(Rejection::EmptyBox { w, h });
    }
    if !(x >= 0.0 && y >= 0.0) {
        return Err(Rejection::NegativeOrigin { x, y });
    }

    let crop_w = (x + w).min(img_width as f32) - x;
    let crop_h = (y + h).min(img_height as f32) - y;
    let floor = min_face_size as f32;
    if crop_w < floor || crop_h < floor {
        return Err(Rejection::TooSmall {
            w: crop_w.max(0.0),
            h: crop_h.max(0.0),
        });
    }
    Ok(())
}
