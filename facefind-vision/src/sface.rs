use anyhow::{bail, Result};
use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage};
use ort::{session::Session, value::Value};

use crate::face::{Detection, Embedding};
use crate::session::bgr_tensor;

/// Side of the square crop SFace consumes.
pub const FACE_SIZE: u32 = 112;

// ArcFace reference eye centers in a 112x112 crop
const REF_LEFT_EYE: (f32, f32) = (38.2946, 51.6963);
const REF_RIGHT_EYE: (f32, f32) = (73.5318, 51.5014);

/// Rotate, scale and crop the face so its eyes land on the reference
/// positions of a `size`x`size` crop. Pixels outside the source stay black.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let lm = &detection.landmarks;
    let left_eye = (lm[0], lm[1]);
    let right_eye = (lm[2], lm[3]);

    let (dx, dy) = (right_eye.0 - left_eye.0, right_eye.1 - left_eye.1);
    let eye_dist = dx.hypot(dy);
    if !(eye_dist > f32::EPSILON) {
        bail!("degenerate eye landmarks {:?} {:?}", left_eye, right_eye);
    }

    let unit = size as f32 / FACE_SIZE as f32;
    let ref_dist =
        (REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).hypot(REF_RIGHT_EYE.1 - REF_LEFT_EYE.1) * unit;
    let scale = ref_dist / eye_dist;
    let (sin, cos) = dy.atan2(dx).sin_cos();

    let src_center = (
        (left_eye.0 + right_eye.0) / 2.0,
        (left_eye.1 + right_eye.1) / 2.0,
    );
    let dst_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * unit,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * unit,
    );

    let src = img.to_rgb8();
    let mut output = RgbImage::new(size, size);
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        // inverse mapping: output pixel back into the source image
        let ox = x as f32 - dst_center.0;
        let oy = y as f32 - dst_center.1;
        let sx = (cos * ox - sin * oy) / scale + src_center.0;
        let sy = (sin * ox + cos * oy) / scale + src_center.1;
        if let Some(sampled) = sample_bilinear(&src, sx, sy) {
            *pixel = sampled;
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    if !(x >= 0.0 && y >= 0.0 && x <= (w - 1) as f32 && y <= (h - 1) as f32) {
        return None;
    }

    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let p00 = img.get_pixel(x0, y0).0;
    let p10 = img.get_pixel(x1, y0).0;
    let p01 = img.get_pixel(x0, y1).0;
    let p11 = img.get_pixel(x1, y1).0;

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

/// Encode an aligned face crop into an L2-normalized embedding.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let face_rgb = face_img
        .resize_exact(FACE_SIZE, FACE_SIZE, FilterType::Triangle)
        .to_rgb8();
    let input_tensor = Value::from_array(bgr_tensor(&face_rgb))?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting shape [1, 128]
    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if dim == 0 || data.len() < dim {
        bail!("unexpected recognizer output shape {:?}", &shape[..]);
    }

    Ok(Embedding::from(data[..dim].to_vec()).normalized())
}
