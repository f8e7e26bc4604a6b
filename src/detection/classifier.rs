use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::window::WindowTensor;

pub const DEFAULT_ALARM_THRESHOLD: f32 = 0.85;
pub const DEFAULT_FALLBACK_PROBABILITY: f32 = 0.01;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference engine failed: {0}")]
    Engine(String),
    #[error("unexpected input shape {actual:?}, engine expects {expected:?}")]
    Shape {
        expected: [usize; 3],
        actual: [usize; 3],
    },
    #[error("engine returned a non-finite probability")]
    NonFinite,
}

/// Opaque sequence model: `[1][T][D]` window in, fall probability out.
///
/// Loading and closing the underlying engine belongs to the host application.
pub trait SequenceClassifier: Send + Sync {
    fn predict(&self, window: &WindowTensor) -> Result<f32, InferenceError>;

    fn name(&self) -> &str {
        "sequence-classifier"
    }
}

/// Result of the raw classifier alarm path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallDetectionResult {
    pub probability: f32,
    pub is_fall: bool,
    pub threshold: f32,
}

impl FallDetectionResult {
    pub fn percent(&self) -> u32 {
        (self.probability * 100.0) as u32
    }

    pub fn status_label(&self) -> &'static str {
        if self.is_fall {
            "FALL DETECTED"
        } else {
            "NO FALL"
        }
    }
}

impl std::fmt::Display for FallDetectionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}% ({}, threshold {}%)",
            self.percent(),
            self.status_label(),
            (self.threshold * 100.0) as u32
        )
    }
}

/// Wraps an engine so a failed inference never reaches the monitoring loop.
#[derive(Clone)]
pub struct ClassifierAdapter {
    engine: Arc<dyn SequenceClassifier>,
    alarm_threshold: f32,
    fallback_probability: f32,
}

impl ClassifierAdapter {
    pub fn new(engine: Arc<dyn SequenceClassifier>) -> Self {
        Self {
            engine,
            alarm_threshold: DEFAULT_ALARM_THRESHOLD,
            fallback_probability: DEFAULT_FALLBACK_PROBABILITY,
        }
    }

    pub fn with_alarm_threshold(mut self, threshold: f32) -> Self {
        self.alarm_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_fallback_probability(mut self, probability: f32) -> Self {
        self.fallback_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn alarm_threshold(&self) -> f32 {
        self.alarm_threshold
    }

    /// Probability in `[0, 1]`; engine failures yield the fallback value.
    pub fn predict(&self, window: &WindowTensor) -> f32 {
        let started = Instant::now();
        let outcome = self.engine.predict(window).and_then(|p| {
            if p.is_finite() {
                Ok(p)
            } else {
                Err(InferenceError::NonFinite)
            }
        });

        match outcome {
            Ok(probability) => {
                let probability = probability.clamp(0.0, 1.0);
                debug!(
                    engine = self.engine.name(),
                    probability,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "inference completed"
                );
                probability
            }
            Err(err) => {
                warn!(
                    engine = self.engine.name(),
                    error = %err,
                    fallback = self.fallback_probability,
                    "inference failed, using fallback probability"
                );
                self.fallback_probability
            }
        }
    }

    /// Strict `probability > threshold`, matching the standalone alarm.
    pub fn is_alarm(&self, probability: f32) -> bool {
        probability > self.alarm_threshold
    }

    pub fn detect(&self, window: &WindowTensor) -> FallDetectionResult {
        let probability = self.predict(window);
        FallDetectionResult {
            probability,
            is_fall: self.is_alarm(probability),
            threshold: self.alarm_threshold,
        }
    }
}

impl std::fmt::Debug for ClassifierAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierAdapter")
            .field("engine", &self.engine.name())
            .field("alarm_threshold", &self.alarm_threshold)
            .field("fallback_probability", &self.fallback_probability)
            .finish()
    }
}
