//! Capability traits for the external expression model.
//!
//! The model is a black box: a provider loads it once and hands back an
//! engine, and the engine turns one frame into at most one [`FaceResult`].

use crate::frame::Frame;
use crate::types::FaceResult;
use std::future::Future;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model file not found: {0}")]
    NotFound(String),
    #[error("model load failed: {0}")]
    Failed(String),
    #[cfg(feature = "onnx")]
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame too small for analysis: {0}x{1}")]
    FrameTooSmall(u32, u32),
    #[cfg(feature = "onnx")]
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Loads the expression model. Completes once; the returned engine is the
/// only way to run a scan.
pub trait ModelProvider {
    type Engine: EmotionEngine + 'static;

    /// Load all models found under `model_base`.
    fn load_models(
        &self,
        model_base: &str,
    ) -> impl Future<Output = Result<Self::Engine, ModelLoadError>>;
}

/// Single-frame face and expression inference.
pub trait EmotionEngine {
    /// Analyze one still frame. `Ok(None)` means no face was found.
    fn detect(&self, frame: &Frame) -> impl Future<Output = Result<Option<FaceResult>, EngineError>>;
}
