use anyhow::Result;
use image::DynamicImage;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// A face found by the detector, in source-image pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// Face embedding produced by a recognition model.
///
/// On the wire an embedding is a plain list of numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    /// `r · c`. `None` when the dimensionalities differ.
    pub fn inner_product(&self, other: &Embedding) -> Option<f32> {
        (self.dim() == other.dim()).then(|| self.vector.dot(&other.vector))
    }

    /// `||r - c||₂`. `None` when the dimensionalities differ.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        (self.dim() == other.dim()).then(|| {
            (&self.vector - &other.vector)
                .mapv(|d| d * d)
                .sum()
                .sqrt()
        })
    }

    /// Scale to unit L2 norm. Zero vectors are left untouched.
    pub fn normalized(mut self) -> Self {
        let norm = self.vector.dot(&self.vector).sqrt();
        if norm > 0.0 {
            self.vector.mapv_inplace(|x| x / norm);
        }
        self
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from(values),
        }
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.vector.to_vec()
    }
}

/// External face detection + embedding capability.
///
/// Implementations own whatever inference state they need; both steps take
/// `&mut self` since ONNX sessions run mutably.
pub trait FaceModel {
    /// Identifier of the embedding model. Embeddings from different ids are
    /// never compared.
    fn model_id(&self) -> &str;

    /// Find faces in `img`, in detection order.
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>>;

    /// Compute the embedding of one detected face.
    fn embed(&mut self, img: &DynamicImage, detection: &Detection) -> Result<Embedding>;
}

/// Apply non-maximum suppression to remove overlapping detections
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);

        // No overlap
        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(compute_iou(&a, &c), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let detections = vec![
            det([12.0, 12.0, 20.0, 20.0], 0.8),
            det([10.0, 10.0, 20.0, 20.0], 0.9),
            det([100.0, 100.0, 20.0, 20.0], 0.85),
        ];

        let result = nms(&detections, 0.3);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.85);
    }

    #[test]
    fn test_embedding_metrics() {
        let a = Embedding::from(vec![1.0, 0.0]);
        let b = Embedding::from(vec![0.0, 1.0]);
        assert_eq!(a.inner_product(&a), Some(1.0));
        assert_eq!(a.inner_product(&b), Some(0.0));
        let d = a.euclidean_distance(&b).unwrap();
        assert!((d - 2f32.sqrt()).abs() < 1e-6);

        let c = Embedding::from(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.inner_product(&c), None);
        assert_eq!(a.euclidean_distance(&c), None);
    }

    #[test]
    fn test_normalized() {
        let e = Embedding::from(vec![3.0, 4.0]).normalized();
        assert!((e.vector[0] - 0.6).abs() < 1e-6);
        assert!((e.vector[1] - 0.8).abs() < 1e-6);

        let zero = Embedding::from(vec![0.0, 0.0]).normalized();
        assert_eq!(zero.vector.to_vec(), vec![0.0, 0.0]);
    }
}
