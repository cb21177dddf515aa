use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::Array4;
#[allow(unused_imports)]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

/// Load an ONNX model from disk.
pub fn load_session(path: &Path) -> Result<Session> {
    if !path.exists() {
        anyhow::bail!("model file not found: {}", path.display());
    }
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load model {}", path.display()))
}

/// Lay out an RGB image as a `[1, 3, H, W]` BGR tensor with values in `[0, 255]`.
pub fn bgr_tensor(img: &RgbImage) -> Array4<f32> {
    let (width, height) = img.dimensions();
    let mut input = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in img.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let (x, y) = (x as usize, y as usize);
        input[[0, 0, y, x]] = b as f32;
        input[[0, 1, y, x]] = g as f32;
        input[[0, 2, y, x]] = r as f32;
    }
    input
}
