use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::classifier::{ClassifierAdapter, FallDetectionResult};
use super::fusion::{FallVerdictPolicy, FusionResult, ProbabilityFusion};
use super::rules::RuleScorer;
use super::window::WindowTensor;

/// Both alarm paths evaluated over one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowVerdict {
    pub classifier: FallDetectionResult,
    pub rule_score: f32,
    pub fusion: FusionResult,
    pub escalate: bool,
}

#[derive(Clone)]
pub struct FallPipeline {
    classifier: ClassifierAdapter,
    rules: Arc<dyn RuleScorer>,
    fusion: ProbabilityFusion,
    policy: FallVerdictPolicy,
}

impl FallPipeline {
    pub fn new(
        classifier: ClassifierAdapter,
        rules: Arc<dyn RuleScorer>,
        fusion: ProbabilityFusion,
        policy: FallVerdictPolicy,
    ) -> Self {
        Self {
            classifier,
            rules,
            fusion,
            policy,
        }
    }

    pub fn policy(&self) -> FallVerdictPolicy {
        self.policy
    }

    /// Runs the classifier synchronously; call off the frame path.
    pub fn evaluate(&self, window: &WindowTensor) -> WindowVerdict {
        let classifier = self.classifier.detect(window);
        let rule_score = self.rules.score(window).clamp(0.0, 1.0);
        let fusion = self.fusion.evaluate(classifier.probability, rule_score);
        let escalate = self.policy.decide(fusion.is_fall, classifier.is_fall);

        if escalate {
            info!(
                p_model = classifier.probability,
                p_rule = rule_score,
                p_final = fusion.final_probability,
                classifier_alarm = classifier.is_fall,
                fusion_alarm = fusion.is_fall,
                policy = ?self.policy,
                "fall verdict"
            );
        } else {
            debug!(
                p_model = classifier.probability,
                p_rule = rule_score,
                p_final = fusion.final_probability,
                "no fall"
            );
        }

        WindowVerdict {
            classifier,
            rule_score,
            fusion,
            escalate,
        }
    }
}

impl std::fmt::Debug for FallPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallPipeline")
            .field("classifier", &self.classifier)
            .field("fusion", &self.fusion)
            .field("policy", &self.policy)
            .finish()
    }
}
