//! Human-facing text for scan results: titles, greetings, percentages.

use crate::types::{Emotion, QualityTier, ScanResult};
use chrono::Local;

impl Emotion {
    /// Capitalized label, e.g. "Happy".
    pub fn title(self) -> &'static str {
        match self {
            Emotion::Happy => "Happy",
            Emotion::Sad => "Sad",
            Emotion::Angry => "Angry",
            Emotion::Surprised => "Surprised",
            Emotion::Fearful => "Fearful",
            Emotion::Disgusted => "Disgusted",
            Emotion::Neutral => "Neutral",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Emotion::Happy => "😊",
            Emotion::Sad => "😢",
            Emotion::Angry => "😠",
            Emotion::Surprised => "😲",
            Emotion::Fearful => "😨",
            Emotion::Disgusted => "🤢",
            Emotion::Neutral => "😐",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Emotion::Happy => "Feeling joyful and positive",
            Emotion::Sad => "Feeling down or melancholic",
            Emotion::Angry => "Feeling frustrated or irritated",
            Emotion::Surprised => "Feeling shocked or amazed",
            Emotion::Fearful => "Feeling worried or anxious",
            Emotion::Disgusted => "Feeling repulsed or averse",
            Emotion::Neutral => "Feeling calm and composed",
        }
    }
}

impl QualityTier {
    pub fn label(self) -> &'static str {
        match self {
            QualityTier::Excellent => "Excellent",
            QualityTier::Good => "Good",
            QualityTier::Poor => "Poor",
        }
    }
}

/// Personalized one-line reaction to the dominant emotion.
pub fn greeting(emotion: Emotion, name: &str) -> String {
    match emotion {
        Emotion::Happy => format!("{name}, you're radiating joy!"),
        Emotion::Sad => format!("{name}, I'm here for you"),
        Emotion::Angry => format!("{name}, take a deep breath"),
        Emotion::Surprised => format!("Wow {name}, what a surprise!"),
        Emotion::Fearful => format!("{name}, you're safe here"),
        Emotion::Disgusted => format!("{name}, something's not right?"),
        Emotion::Neutral => format!("{name}, feeling calm"),
    }
}

/// Round a 0–1 score to a whole percentage.
pub fn percent(score: f32) -> u32 {
    (score.clamp(0.0, 1.0) * 100.0).round() as u32
}

impl ScanResult {
    pub fn confidence_percent(&self) -> u32 {
        percent(self.confidence)
    }

    /// Face box size, e.g. "200x180px".
    pub fn face_size_label(&self) -> String {
        format!(
            "{}x{}px",
            self.face_width.round() as i64,
            self.face_height.round() as i64
        )
    }

    /// All emotions ranked highest first, for the breakdown view.
    pub fn breakdown(&self) -> Vec<(Emotion, f32)> {
        self.scores.ranked()
    }

    /// Scan time in the local timezone.
    pub fn local_time_label(&self) -> String {
        self.timestamp
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    /// Multi-line report as shown after a scan.
    pub fn render(&self, name: &str) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {}: {}\n",
            self.emotion.emoji(),
            self.emotion.title(),
            self.emotion.description()
        ));
        out.push_str(&format!("Confidence: {}%\n", self.confidence_percent()));
        out.push_str(&format!("{}\n\n", greeting(self.emotion, name)));
        out.push_str("Emotion breakdown:\n");
        for (emotion, score) in self.breakdown() {
            out.push_str(&format!(
                "  {} {:<10} {:>3}%\n",
                emotion.emoji(),
                emotion.title(),
                percent(score)
            ));
        }
        out.push_str(&format!("\nScan time: {}\n", self.local_time_label()));
        out.push_str(&format!("Face size: {}\n", self.face_size_label()));
        out.push_str(&format!("Quality:   {}", self.quality.label()));
        out
    }
}
