//! UltraFace (RFB-320) face detector via ONNX Runtime.
//!
//! The model emits per-prior face scores and normalized corner boxes; we
//! threshold, run NMS, and keep the single most confident face.

use crate::frame::{self, Frame};
use crate::types::FaceBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

use crate::engine::{EngineError, ModelLoadError};

// --- Named constants (no magic numbers) ---
const ULTRAFACE_INPUT_WIDTH: usize = 320;
const ULTRAFACE_INPUT_HEIGHT: usize = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.3;

pub const DETECTOR_MODEL_FILE: &str = "version-RFB-320.onnx";

/// UltraFace-based single-face detector.
pub struct FaceDetector {
    session: Session,
    score_threshold: f32,
    /// Output positions of (scores, boxes).
    output_indices: (usize, usize),
}

impl FaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &Path, score_threshold: f32) -> Result<Self, ModelLoadError> {
        if !model_path.exists() {
            return Err(ModelLoadError::NotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 2 {
            return Err(ModelLoadError::Failed(format!(
                "UltraFace model requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }
        let output_indices = discover_output_indices(&output_names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?output_indices,
            score_threshold,
            "loaded UltraFace detector"
        );

        Ok(Self {
            session,
            score_threshold,
            output_indices,
        })
    }

    /// Detect the most confident face in a grayscale frame.
    pub fn detect(&mut self, frame: &Frame) -> Result<Option<FaceBox>, EngineError> {
        let input = preprocess(frame);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (score_idx, box_idx) = self.output_indices;
        let (_, scores) = outputs[score_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[box_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = decode(scores, boxes, frame.width, frame.height, self.score_threshold);
        let kept = nms(candidates, ULTRAFACE_NMS_THRESHOLD);
        tracing::debug!(faces = kept.len(), "UltraFace detections after NMS");

        Ok(kept.into_iter().next())
    }
}

/// Resize to the model input and normalize into a NCHW tensor.
fn preprocess(frame: &Frame) -> Array4<f32> {
    let resized = frame::resize_bilinear(
        &frame.data,
        frame.width as usize,
        frame.height as usize,
        ULTRAFACE_INPUT_WIDTH,
        ULTRAFACE_INPUT_HEIGHT,
    );

    let mut tensor =
        Array4::<f32>::zeros((1, 3, ULTRAFACE_INPUT_HEIGHT, ULTRAFACE_INPUT_WIDTH));
    for y in 0..ULTRAFACE_INPUT_HEIGHT {
        for x in 0..ULTRAFACE_INPUT_WIDTH {
            let normalized = (resized[y * ULTRAFACE_INPUT_WIDTH + x] as f32 - ULTRAFACE_MEAN)
                / ULTRAFACE_STD;
            // Grayscale → 3-channel: replicate Y → [R=Y, G=Y, B=Y]
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }
    tensor
}

/// Find the "scores" and "boxes" outputs by name, falling back to (0, 1).
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let scores = names.iter().position(|n| n == "scores");
    let boxes = names.iter().position(|n| n == "boxes");
    match (scores, boxes) {
        (Some(s), Some(b)) => (s, b),
        _ => {
            tracing::info!(?names, "UltraFace: output names not recognized, using positional mapping");
            (0, 1)
        }
    }
}

/// Turn raw priors into pixel-space boxes above `threshold`.
///
/// `scores` is [N, 2] (background, face); `boxes` is [N, 4] normalized corners.
fn decode(scores: &[f32], boxes: &[f32], width: u32, height: u32, threshold: f32) -> Vec<FaceBox> {
    let w = width as f32;
    let h = height as f32;
    let priors = (scores.len() / 2).min(boxes.len() / 4);

    let mut detections = Vec::new();
    for i in 0..priors {
        let score = scores[i * 2 + 1];
        if score <= threshold {
            continue;
        }
        let x1 = boxes[i * 4].clamp(0.0, 1.0) * w;
        let y1 = boxes[i * 4 + 1].clamp(0.0, 1.0) * h;
        let x2 = boxes[i * 4 + 2].clamp(0.0, 1.0) * w;
        let y2 = boxes[i * 4 + 3].clamp(0.0, 1.0) * h;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        detections.push(FaceBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }
    detections
}

/// Non-Maximum Suppression: remove overlapping detections, most confident first.
fn nms(mut detections: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Compute Intersection-over-Union between two boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceBox {
        FaceBox { x, y, width: w, height: h, confidence: conf }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_box(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_box(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_box(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_most_confident_first() {
        let detections = vec![
            make_box(5.0, 5.0, 100.0, 100.0, 0.8),
            make_box(0.0, 0.0, 100.0, 100.0, 0.9),
            make_box(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.3);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_decode_scales_and_thresholds() {
        // Two priors: one below threshold, one face covering the center quarter.
        let scores = [0.9, 0.1, 0.2, 0.8];
        let boxes = [0.0, 0.0, 1.0, 1.0, 0.25, 0.25, 0.75, 0.75];
        let dets = decode(&scores, &boxes, 640, 480, 0.5);
        assert_eq!(dets.len(), 1);
        let d = dets[0];
        assert!((d.x - 160.0).abs() < 1e-3);
        assert!((d.y - 120.0).abs() < 1e-3);
        assert!((d.width - 320.0).abs() < 1e-3);
        assert!((d.height - 240.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_skips_degenerate_boxes() {
        let scores = [0.0, 0.99];
        let boxes = [0.5, 0.5, 0.4, 0.9];
        assert!(decode(&scores, &boxes, 100, 100, 0.5).is_empty());
    }

    #[test]
    fn test_discover_output_indices() {
        let named: Vec<String> = ["boxes", "scores"].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_output_indices(&named), (1, 0));

        let generic: Vec<String> = ["460", "461"].iter().map(|s| s.to_string()).collect();
        assert_eq!(discover_output_indices(&generic), (0, 1));
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let frame = Frame::new(vec![127u8; 64 * 48], 64, 48, 0).unwrap();
        let tensor = preprocess(&frame);
        assert_eq!(tensor.shape(), &[1, 3, ULTRAFACE_INPUT_HEIGHT, ULTRAFACE_INPUT_WIDTH]);
        assert!(tensor.iter().all(|&v| v.abs() < 1e-6));
    }
}
