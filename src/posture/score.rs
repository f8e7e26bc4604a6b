use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostureStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl PostureStatus {
    /// Fixed bands: >=90 excellent, >=75 good, >=60 fair, else poor.
    pub fn from_score(score: u8) -> Self {
        match score {
            90.. => Self::Excellent,
            75..=89 => Self::Good,
            60..=74 => Self::Fair,
            _ => Self::Poor,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Fair => "FAIR",
            Self::Poor => "POOR",
        }
    }
}

impl std::fmt::Display for PostureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyAngles {
    /// Degrees between head and vertical at the neck, 180 is upright.
    pub neck: f32,
    /// Degrees between torso and vertical at the hips, 180 is upright.
    pub spine: f32,
    /// Shoulder height difference scaled to approximate degrees.
    pub shoulder_alignment: f32,
}

/// Qualitative assessment returned by a posture analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureAssessment {
    pub score: u8,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostureScore {
    pub timestamp: DateTime<Utc>,
    pub score: u8,
    pub status: PostureStatus,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub angles: BodyAngles,
}

impl PostureScore {
    pub fn new(assessment: PostureAssessment, angles: BodyAngles) -> Self {
        let score = assessment.score.min(100);
        Self {
            timestamp: Utc::now(),
            score,
            status: PostureStatus::from_score(score),
            issues: assessment.issues,
            recommendations: assessment.recommendations,
            angles,
        }
    }

    pub fn is_bad(&self, threshold: u8) -> bool {
        self.score < threshold
    }
}
