pub mod analyzer;
pub mod angles;
pub mod score;
pub mod tracker;

pub use analyzer::{
    parse_assessment, AnalysisError, LlmConfig, LlmPostureService, PostureAnalysisService,
    PostureAnalyzer,
};
pub use angles::{body_angles, fallback_assessment, posture_label};
pub use score::{BodyAngles, PostureAssessment, PostureScore, PostureStatus};
pub use tracker::{PostureStateTracker, SustainedPosture, TrackerConfig, TrackingState};
