//! YuNet face detector: letterbox preprocessing and output decoding.
//!
//! The network takes a `[1, 3, 640, 640]` BGR tensor with values in `[0, 255]`
//! and emits twelve tensors, four per stride (8, 16, 32), in the order
//! `cls_8, cls_16, cls_32, obj_*, bbox_*, kps_*`:
//! - cls / obj: `[1, H*W, 1]`, already passed through a sigmoid
//! - bbox: `[1, H*W, 4]`, (dx, dy, log w, log h) in stride units
//! - kps: `[1, H*W, 10]`, five landmark offsets in stride units
//!
//! Decoding is anchor-free: a grid cell `(row, col)` predicts a center at
//! `((col + dx) * stride, (row + dy) * stride)`.

use anyhow::{bail, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::face::{nms, Detection};
use crate::session::bgr_tensor;

pub const INPUT_SIZE: u32 = 640;
const STRIDES: [usize; 3] = [8, 16, 32];

/// Placement of the resized source image on the square detector canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    pub fn fit(src_width: u32, src_height: u32, target: u32) -> Self {
        let scale = target as f32 / src_width.max(src_height) as f32;
        let width = ((src_width as f32 * scale) as u32).clamp(1, target);
        let height = ((src_height as f32 * scale) as u32).clamp(1, target);
        Self {
            scale,
            width,
            height,
            offset_x: (target - width) / 2,
            offset_y: (target - height) / 2,
        }
    }

    /// Map a detection from canvas pixels back to source-image pixels.
    pub fn unmap(&self, d: &Detection) -> Detection {
        let (ox, oy) = (self.offset_x as f32, self.offset_y as f32);
        let mut landmarks = d.landmarks;
        for point in landmarks.chunks_exact_mut(2) {
            point[0] = (point[0] - ox) / self.scale;
            point[1] = (point[1] - oy) / self.scale;
        }
        Detection {
            bbox: [
                (d.bbox[0] - ox) / self.scale,
                (d.bbox[1] - oy) / self.scale,
                d.bbox[2] / self.scale,
                d.bbox[3] / self.scale,
            ],
            score: d.score,
            landmarks,
        }
    }
}

/// Resize `img` onto a black square canvas and lay it out as a BGR NCHW tensor.
pub fn preprocess(img: &DynamicImage, target: u32) -> Result<(Array4<f32>, Letterbox)> {
    let (src_width, src_height) = img.dimensions();
    if src_width == 0 || src_height == 0 {
        bail!("cannot run detector on an empty {}x{} image", src_width, src_height);
    }
    let letterbox = Letterbox::fit(src_width, src_height, target);

    let resized = img.resize_exact(letterbox.width, letterbox.height, FilterType::Triangle);
    let mut canvas = DynamicImage::new_rgb8(target, target);
    image::imageops::overlay(
        &mut canvas,
        &resized,
        letterbox.offset_x as i64,
        letterbox.offset_y as i64,
    );

    Ok((bgr_tensor(&canvas.to_rgb8()), letterbox))
}

/// Run the detector and return faces in source-image coordinates, best first.
pub fn detect(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (input, letterbox) = preprocess(img, INPUT_SIZE)?;
    let input_tensor = Value::from_array(input)?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut tensors: Vec<(Vec<i64>, Vec<f32>)> = Vec::with_capacity(12);
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        tensors.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let views: Vec<(&[i64], &[f32])> = tensors
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let detections: Vec<Detection> = decode(&views, INPUT_SIZE as usize, score_threshold)?
        .iter()
        .map(|d| letterbox.unmap(d))
        .collect();
    log::debug!("yunet: {} candidate(s) above {}", detections.len(), score_threshold);

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Decode raw YuNet outputs into canvas-pixel detections scoring at least
/// `score_threshold`.
pub fn decode(
    outputs: &[(&[i64], &[f32])],
    input_size: usize,
    score_threshold: f32,
) -> Result<Vec<Detection>> {
    if outputs.len() < 4 * STRIDES.len() {
        bail!("expected {} YuNet outputs, got {}", 4 * STRIDES.len(), outputs.len());
    }

    let mut detections = Vec::new();
    for (level, &stride) in STRIDES.iter().enumerate() {
        let cols = input_size / stride;
        let cells = cols * cols;
        let cls = tensor(outputs, level, cells, 1)?;
        let obj = tensor(outputs, level + 3, cells, 1)?;
        let bbox = tensor(outputs, level + 6, cells, 4)?;
        let kps = tensor(outputs, level + 9, cells, 10)?;
        let stride = stride as f32;

        for idx in 0..cells {
            let score = (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();
            if score < score_threshold {
                continue;
            }
            let row = (idx / cols) as f32;
            let col = (idx % cols) as f32;

            let b = &bbox[idx * 4..idx * 4 + 4];
            let cx = (col + b[0]) * stride;
            let cy = (row + b[1]) * stride;
            let w = b[2].exp() * stride;
            let h = b[3].exp() * stride;

            let mut landmarks = [0.0f32; 10];
            for (k, pair) in kps[idx * 10..idx * 10 + 10].chunks_exact(2).enumerate() {
                landmarks[k * 2] = (col + pair[0]) * stride;
                landmarks[k * 2 + 1] = (row + pair[1]) * stride;
            }

            detections.push(Detection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }
    Ok(detections)
}

fn tensor<'a>(
    outputs: &[(&[i64], &'a [f32])],
    index: usize,
    cells: usize,
    width: usize,
) -> Result<&'a [f32]> {
    let (shape, data) = outputs[index];
    let expected = [1, cells as i64, width as i64];
    if shape != expected.as_slice() || data.len() != cells * width {
        bail!(
            "unexpected YuNet output {}: shape {:?}, expected {:?}",
            index,
            shape,
            expected
        );
    }
    Ok(data)
}
