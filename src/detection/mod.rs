pub mod classifier;
pub mod fusion;
pub mod pipeline;
pub mod rules;
pub mod window;

pub use classifier::{
    ClassifierAdapter, FallDetectionResult, InferenceError, SequenceClassifier,
    DEFAULT_ALARM_THRESHOLD, DEFAULT_FALLBACK_PROBABILITY,
};
pub use fusion::{
    FallVerdictPolicy, FusionError, FusionResult, ProbabilityFusion, DEFAULT_FUSION_THRESHOLD,
    DEFAULT_MODEL_WEIGHT, DEFAULT_RULE_WEIGHT,
};
pub use pipeline::{FallPipeline, WindowVerdict};
pub use rules::{RuleBreakdown, RuleScorer, StillnessVerticalityScorer};
pub use window::{
    KeypointWindow, ReadMode, WindowError, WindowTensor, DEFAULT_KEYPOINT_DIMS,
    DEFAULT_WINDOW_FRAMES,
};
