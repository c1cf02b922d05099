use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the seven expression labels reported by the classifier.
///
/// Declaration order is the fixed label order used for tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Surprised,
    Fearful,
    Disgusted,
    Neutral,
}

impl Emotion {
    /// All labels in fixed order.
    pub const ALL: [Emotion; 7] = [
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Surprised,
        Emotion::Fearful,
        Emotion::Disgusted,
        Emotion::Neutral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Surprised => "surprised",
            Emotion::Fearful => "fearful",
            Emotion::Disgusted => "disgusted",
            Emotion::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-label expression scores in [0, 1]. The seven values need not sum to 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionScores {
    pub happy: f32,
    pub sad: f32,
    pub angry: f32,
    pub surprised: f32,
    pub fearful: f32,
    pub disgusted: f32,
    pub neutral: f32,
}

impl EmotionScores {
    pub fn get(&self, emotion: Emotion) -> f32 {
        match emotion {
            Emotion::Happy => self.happy,
            Emotion::Sad => self.sad,
            Emotion::Angry => self.angry,
            Emotion::Surprised => self.surprised,
            Emotion::Fearful => self.fearful,
            Emotion::Disgusted => self.disgusted,
            Emotion::Neutral => self.neutral,
        }
    }

    /// Scores paired with their labels, in fixed label order.
    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        Emotion::ALL.iter().map(move |&e| (e, self.get(e)))
    }

    /// The label with the highest score. Ties go to the earliest label in
    /// fixed order; NaN scores never win.
    pub fn dominant(&self) -> (Emotion, f32) {
        let mut best = (Emotion::Happy, f32::NEG_INFINITY);
        for (emotion, score) in self.iter() {
            if score > best.1 {
                best = (emotion, score);
            }
        }
        if best.1 == f32::NEG_INFINITY {
            // Every score was NaN.
            return (Emotion::Happy, 0.0);
        }
        best
    }

    /// All labels sorted by score, highest first. Equal scores keep fixed order.
    pub fn ranked(&self) -> Vec<(Emotion, f32)> {
        let mut pairs: Vec<(Emotion, f32)> = self.iter().collect();
        pairs.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        pairs
    }
}

/// Face bounding box in source-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence for this box.
    pub confidence: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// A single detected face with its expression scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceResult {
    pub face: FaceBox,
    pub scores: EmotionScores,
}

/// Coarse capture quality derived from how much of the frame the face fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Poor,
    Good,
    Excellent,
}

impl QualityTier {
    const EXCELLENT_RATIO: f32 = 0.15;
    const GOOD_RATIO: f32 = 0.08;

    /// Bucket a face-to-frame area ratio. Monotonic non-decreasing in `ratio`.
    pub fn from_ratio(ratio: f32) -> Self {
        if ratio > Self::EXCELLENT_RATIO {
            QualityTier::Excellent
        } else if ratio > Self::GOOD_RATIO {
            QualityTier::Good
        } else {
            QualityTier::Poor
        }
    }

    pub fn from_areas(face_width: f32, face_height: f32, frame_width: u32, frame_height: u32) -> Self {
        let frame_area = frame_width as f32 * frame_height as f32;
        if frame_area <= 0.0 {
            return QualityTier::Poor;
        }
        Self::from_ratio(face_width.max(0.0) * face_height.max(0.0) / frame_area)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityTier::Excellent => "excellent",
            QualityTier::Good => "good",
            QualityTier::Poor => "poor",
        }
    }
}

/// Outcome of one successful scan. Replaced, never mutated, by the next scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub emotion: Emotion,
    /// Score of the dominant emotion (0–1).
    pub confidence: f32,
    pub scores: EmotionScores,
    pub timestamp: DateTime<Utc>,
    pub face_width: f32,
    pub face_height: f32,
    pub quality: QualityTier,
}

impl ScanResult {
    /// Build a result from a detection against a frame of the given size.
    pub fn from_face(
        face: &FaceResult,
        frame_width: u32,
        frame_height: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let (emotion, confidence) = face.scores.dominant();
        Self {
            emotion,
            confidence,
            scores: face.scores,
            timestamp,
            face_width: face.face.width,
            face_height: face.face.height,
            quality: QualityTier::from_areas(
                face.face.width,
                face.face.height,
                frame_width,
                frame_height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(values: [f32; 7]) -> EmotionScores {
        EmotionScores {
            happy: values[0],
            sad: values[1],
            angry: values[2],
            surprised: values[3],
            fearful: values[4],
            disgusted: values[5],
            neutral: values[6],
        }
    }

    fn face(width: f32, height: f32, s: EmotionScores) -> FaceResult {
        FaceResult {
            face: FaceBox { x: 0.0, y: 0.0, width, height, confidence: 0.9 },
            scores: s,
        }
    }

    #[test]
    fn test_dominant_picks_max() {
        let s = scores([0.1, 0.2, 0.05, 0.6, 0.01, 0.01, 0.03]);
        assert_eq!(s.dominant(), (Emotion::Surprised, 0.6));
    }

    #[test]
    fn test_dominant_tie_goes_to_fixed_order() {
        let s = scores([0.1, 0.4, 0.0, 0.0, 0.0, 0.0, 0.4]);
        assert_eq!(s.dominant().0, Emotion::Sad);

        let all_equal = scores([0.2; 7]);
        assert_eq!(all_equal.dominant().0, Emotion::Happy);
    }

    #[test]
    fn test_dominant_ignores_nan() {
        let s = scores([f32::NAN, 0.3, 0.0, 0.0, 0.0, 0.0, 0.1]);
        assert_eq!(s.dominant(), (Emotion::Sad, 0.3));
    }

    #[test]
    fn test_ranked_descending_and_stable() {
        let s = scores([0.1, 0.5, 0.1, 0.0, 0.0, 0.0, 0.3]);
        let ranked: Vec<Emotion> = s.ranked().into_iter().map(|(e, _)| e).collect();
        assert_eq!(ranked[0], Emotion::Sad);
        assert_eq!(ranked[1], Emotion::Neutral);
        // happy and angry tie at 0.1; happy comes first in fixed order
        assert_eq!(ranked[2], Emotion::Happy);
        assert_eq!(ranked[3], Emotion::Angry);
    }

    #[test]
    fn test_quality_tier_thresholds() {
        assert_eq!(QualityTier::from_ratio(0.20), QualityTier::Excellent);
        assert_eq!(QualityTier::from_ratio(0.10), QualityTier::Good);
        assert_eq!(QualityTier::from_ratio(0.05), QualityTier::Poor);
        // Boundaries are exclusive
        assert_eq!(QualityTier::from_ratio(0.15), QualityTier::Good);
        assert_eq!(QualityTier::from_ratio(0.08), QualityTier::Poor);
    }

    #[test]
    fn test_quality_tier_monotonic() {
        let mut prev = QualityTier::Poor;
        for i in 0..=100 {
            let tier = QualityTier::from_ratio(i as f32 / 100.0);
            assert!(tier >= prev, "tier decreased at ratio {}", i as f32 / 100.0);
            prev = tier;
        }
    }

    #[test]
    fn test_quality_tier_zero_frame() {
        assert_eq!(QualityTier::from_areas(100.0, 100.0, 0, 720), QualityTier::Poor);
    }

    #[test]
    fn test_scan_result_from_face() {
        let s = scores([0.82, 0.04, 0.02, 0.05, 0.01, 0.01, 0.05]);
        let result = ScanResult::from_face(&face(200.0, 200.0, s), 1280, 720, Utc::now());
        assert_eq!(result.emotion, Emotion::Happy);
        assert!((result.confidence - 0.82).abs() < 1e-6);
        // 40000 / 921600 ≈ 0.043
        assert_eq!(result.quality, QualityTier::Poor);
        assert_eq!(result.scores, s);
    }

    #[test]
    fn test_scan_result_large_face_is_excellent() {
        let s = scores([0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.9]);
        let result = ScanResult::from_face(&face(500.0, 400.0, s), 1280, 720, Utc::now());
        assert_eq!(result.emotion, Emotion::Neutral);
        assert_eq!(result.quality, QualityTier::Excellent);
    }

    #[test]
    fn test_scores_serialize_as_label_map() {
        let s = scores([0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.5]);
        let json = serde_json::to_value(s).unwrap();
        assert_eq!(json["happy"], 0.5);
        assert_eq!(json["neutral"], 0.5);
        assert_eq!(serde_json::to_value(Emotion::Surprised).unwrap(), "surprised");
    }
}
