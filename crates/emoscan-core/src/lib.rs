//! emoscan-core: Emotion scan domain types and the expression model engine.
//!
//! The model itself is an opaque capability behind [`ModelProvider`] and
//! [`EmotionEngine`]. With the `onnx` feature (default) an UltraFace detector
//! plus FER+ classifier implement it via ONNX Runtime.

#[cfg(feature = "onnx")]
pub mod classifier;
#[cfg(feature = "onnx")]
pub mod detector;
pub mod display;
pub mod engine;
pub mod frame;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod types;

pub use engine::{EmotionEngine, EngineError, ModelLoadError, ModelProvider};
pub use frame::Frame;
#[cfg(feature = "onnx")]
pub use onnx::{OnnxEmotionEngine, OnnxModelProvider};
pub use types::{Emotion, EmotionScores, FaceBox, FaceResult, QualityTier, ScanResult};

/// Default model directory: `$XDG_DATA_HOME/emoscan/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("emoscan/models")
}
