//! ONNX Runtime implementation of the model capabilities.

use crate::classifier::{ExpressionClassifier, CLASSIFIER_MODEL_FILE};
use crate::detector::{FaceDetector, DETECTOR_MODEL_FILE};
use crate::engine::{EmotionEngine, EngineError, ModelLoadError, ModelProvider};
use crate::frame::{self, Frame};
use crate::types::FaceResult;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Smallest frame edge we will hand to the detector.
const MIN_FRAME_EDGE: u32 = 32;

/// Loads the UltraFace detector and FER+ classifier from a model directory.
#[derive(Debug, Clone)]
pub struct OnnxModelProvider {
    detection_threshold: f32,
}

impl OnnxModelProvider {
    pub fn new(detection_threshold: f32) -> Self {
        Self { detection_threshold }
    }
}

impl ModelProvider for OnnxModelProvider {
    type Engine = OnnxEmotionEngine;

    async fn load_models(&self, model_base: &str) -> Result<OnnxEmotionEngine, ModelLoadError> {
        let dir = PathBuf::from(model_base);
        let threshold = self.detection_threshold;

        let models = tokio::task::spawn_blocking(move || -> Result<Models, ModelLoadError> {
            let detector = FaceDetector::load(&dir.join(DETECTOR_MODEL_FILE), threshold)?;
            let classifier = ExpressionClassifier::load(&dir.join(CLASSIFIER_MODEL_FILE))?;
            Ok(Models { detector, classifier })
        })
        .await
        .map_err(|e| ModelLoadError::Failed(format!("model loader task failed: {e}")))??;

        Ok(OnnxEmotionEngine {
            models: Arc::new(Mutex::new(models)),
        })
    }
}

struct Models {
    detector: FaceDetector,
    classifier: ExpressionClassifier,
}

impl Models {
    fn analyze(&mut self, frame: &Frame) -> Result<Option<FaceResult>, EngineError> {
        let Some(face) = self.detector.detect(frame)? else {
            return Ok(None);
        };

        let Some((crop, w, h)) = frame::crop(frame, face.x, face.y, face.width, face.height) else {
            tracing::debug!(?face, "face box outside frame bounds");
            return Ok(None);
        };

        let scores = self.classifier.classify(&crop, w, h)?;
        Ok(Some(FaceResult { face, scores }))
    }
}

/// Detector + classifier pair. Inference runs on the blocking pool.
#[derive(Clone)]
pub struct OnnxEmotionEngine {
    models: Arc<Mutex<Models>>,
}

impl EmotionEngine for OnnxEmotionEngine {
    async fn detect(&self, frame: &Frame) -> Result<Option<FaceResult>, EngineError> {
        if frame.width < MIN_FRAME_EDGE || frame.height < MIN_FRAME_EDGE {
            return Err(EngineError::FrameTooSmall(frame.width, frame.height));
        }

        let models = Arc::clone(&self.models);
        let frame = frame.clone();

        tokio::task::spawn_blocking(move || {
            let mut models = models
                .lock()
                .map_err(|_| EngineError::InferenceFailed("model lock poisoned".into()))?;
            models.analyze(&frame)
        })
        .await
        .map_err(|e| EngineError::InferenceFailed(format!("inference task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_models_fail_with_not_found() {
        let provider = OnnxModelProvider::new(0.5);
        let err = provider
            .load_models("/nonexistent/emoscan-models")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ModelLoadError::NotFound(ref p) if p.contains(DETECTOR_MODEL_FILE)));
    }
}
