use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_MODEL_WEIGHT: f32 = 0.7;
pub const DEFAULT_RULE_WEIGHT: f32 = 0.3;
pub const DEFAULT_FUSION_THRESHOLD: f32 = 0.5;

const WEIGHT_TOLERANCE: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FusionError {
    #[error("fusion weights must each lie in [0, 1] and sum to 1 (model {model_weight}, rule {rule_weight})")]
    InvalidConfiguration { model_weight: f32, rule_weight: f32 },
    #[error("fusion threshold {0} outside [0, 1]")]
    InvalidThreshold(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionResult {
    pub final_probability: f32,
    pub is_fall: bool,
    pub threshold: f32,
}

/// Weighted blend of the classifier probability and the rule score.
#[derive(Debug, Clone, Copy)]
pub struct ProbabilityFusion {
    model_weight: f32,
    rule_weight: f32,
    threshold: f32,
}

impl ProbabilityFusion {
    pub fn new(model_weight: f32, rule_weight: f32, threshold: f32) -> Result<Self, FusionError> {
        let in_unit = |w: f32| (0.0..=1.0).contains(&w);
        if !in_unit(model_weight)
            || !in_unit(rule_weight)
            || ((model_weight + rule_weight) - 1.0).abs() > WEIGHT_TOLERANCE
        {
            return Err(FusionError::InvalidConfiguration {
                model_weight,
                rule_weight,
            });
        }
        if !in_unit(threshold) {
            return Err(FusionError::InvalidThreshold(threshold));
        }
        Ok(Self {
            model_weight,
            rule_weight,
            threshold,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn fuse(&self, p_model: f32, p_rule: f32) -> f32 {
        let p_final = (self.model_weight * p_model + self.rule_weight * p_rule).clamp(0.0, 1.0);
        debug!(p_model, p_rule, p_final, "probabilities fused");
        p_final
    }

    pub fn is_fall_detected(&self, p_final: f32) -> bool {
        p_final >= self.threshold
    }

    pub fn detect_fall(&self, p_model: f32, p_rule: f32) -> bool {
        self.is_fall_detected(self.fuse(p_model, p_rule))
    }

    pub fn evaluate(&self, p_model: f32, p_rule: f32) -> FusionResult {
        let final_probability = self.fuse(p_model, p_rule);
        FusionResult {
            final_probability,
            is_fall: self.is_fall_detected(final_probability),
            threshold: self.threshold,
        }
    }
}

impl Default for ProbabilityFusion {
    fn default() -> Self {
        Self {
            model_weight: DEFAULT_MODEL_WEIGHT,
            rule_weight: DEFAULT_RULE_WEIGHT,
            threshold: DEFAULT_FUSION_THRESHOLD,
        }
    }
}

/// Which alarm path is allowed to start an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallVerdictPolicy {
    /// Combined evidence only (threshold 0.5 by default).
    Fusion,
    /// Raw classifier only (strict threshold 0.85 by default).
    Classifier,
    /// Either path escalates independently.
    #[default]
    Either,
}

impl FallVerdictPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fusion" => Some(Self::Fusion),
            "classifier" | "model" => Some(Self::Classifier),
            "either" | "any" => Some(Self::Either),
            _ => None,
        }
    }

    pub fn decide(self, fusion_fall: bool, classifier_fall: bool) -> bool {
        match self {
            Self::Fusion => fusion_fall,
            Self::Classifier => classifier_fall,
            Self::Either => fusion_fall || classifier_fall,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn default_weights() {
        let fusion = ProbabilityFusion::default();
        assert!(approx(fusion.fuse(1.0, 0.0), 0.7));
        assert!(approx(fusion.fuse(0.0, 1.0), 0.3));
    }

    #[test]
    fn output_is_clamped() {
        let fusion = ProbabilityFusion::default();
        assert_eq!(fusion.fuse(3.0, 2.0), 1.0);
        assert_eq!(fusion.fuse(-1.0, -0.5), 0.0);
    }

    #[test]
    fn weights_must_sum_to_one() {
        let err = ProbabilityFusion::new(0.6, 0.3, 0.5).unwrap_err();
        assert!(matches!(err, FusionError::InvalidConfiguration { .. }));
        assert!(ProbabilityFusion::new(0.5, 0.5, 0.5).is_ok());
        assert!(ProbabilityFusion::new(1.2, -0.2, 0.5).is_err());
        assert_eq!(
            ProbabilityFusion::new(0.7, 0.3, 1.5).unwrap_err(),
            FusionError::InvalidThreshold(1.5)
        );
    }

    #[test]
    fn threshold_is_inclusive() {
        let fusion = ProbabilityFusion::new(0.5, 0.5, 0.5).unwrap();
        assert!(fusion.detect_fall(0.5, 0.5));
        assert!(!fusion.detect_fall(0.4, 0.5));

        let result = fusion.evaluate(1.0, 0.0);
        assert!(result.is_fall);
        assert_eq!(result.threshold, 0.5);
    }

    #[test]
    fn verdict_policies() {
        assert!(FallVerdictPolicy::Either.decide(false, true));
        assert!(FallVerdictPolicy::Either.decide(true, false));
        assert!(!FallVerdictPolicy::Fusion.decide(false, true));
        assert!(!FallVerdictPolicy::Classifier.decide(true, false));
        assert_eq!(FallVerdictPolicy::parse("model"), Some(FallVerdictPolicy::Classifier));
    }
}
