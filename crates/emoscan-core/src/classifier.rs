//! FER+ facial expression classifier via ONNX Runtime.
//!
//! Takes a 64x64 grayscale face crop (raw 0–255 values, no normalization)
//! and produces eight logits. We softmax all eight and report the seven
//! labels we support; `contempt` is dropped, so scores may not sum to 1.

use crate::engine::{EngineError, ModelLoadError};
use crate::frame;
use crate::types::EmotionScores;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const FERPLUS_INPUT_SIZE: usize = 64;
const FERPLUS_CLASSES: usize = 8;

pub const CLASSIFIER_MODEL_FILE: &str = "emotion-ferplus-8.onnx";

/// FER+ expression classifier.
pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    /// Load the FER+ ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, ModelLoadError> {
        if !model_path.exists() {
            return Err(ModelLoadError::NotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FER+ classifier"
        );

        Ok(Self { session })
    }

    /// Score a grayscale face crop of `width` x `height` pixels.
    pub fn classify(
        &mut self,
        face: &[u8],
        width: usize,
        height: usize,
    ) -> Result<EmotionScores, EngineError> {
        let input = preprocess(face, width, height);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::InferenceFailed(format!("expression logits: {e}")))?;

        if logits.len() != FERPLUS_CLASSES {
            return Err(EngineError::InferenceFailed(format!(
                "expected {FERPLUS_CLASSES} expression logits, got {}",
                logits.len()
            )));
        }

        Ok(scores_from_logits(logits))
    }
}

fn preprocess(face: &[u8], width: usize, height: usize) -> Array4<f32> {
    let size = FERPLUS_INPUT_SIZE;
    let resized = frame::resize_bilinear(face, width, height, size, size);
    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
    for y in 0..size {
        for x in 0..size {
            tensor[[0, 0, y, x]] = resized[y * size + x] as f32;
        }
    }
    tensor
}

/// Softmax over the eight FER+ logits, mapped onto our seven labels.
///
/// FER+ order: neutral, happiness, surprise, sadness, anger, disgust, fear, contempt.
fn scores_from_logits(logits: &[f32]) -> EmotionScores {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    let p = |i: usize| if sum > 0.0 { exps[i] / sum } else { 0.0 };

    EmotionScores {
        neutral: p(0),
        happy: p(1),
        surprised: p(2),
        sad: p(3),
        angry: p(4),
        disgusted: p(5),
        fearful: p(6),
    }
}
