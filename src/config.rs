use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detection::{
    FallVerdictPolicy, FusionError, ProbabilityFusion, ReadMode, DEFAULT_ALARM_THRESHOLD,
    DEFAULT_FALLBACK_PROBABILITY, DEFAULT_FUSION_THRESHOLD, DEFAULT_KEYPOINT_DIMS,
    DEFAULT_MODEL_WEIGHT, DEFAULT_RULE_WEIGHT, DEFAULT_WINDOW_FRAMES,
};
use crate::emergency::EscalationConfig;
use crate::posture::tracker::{
    TrackerConfig, DEFAULT_BAD_THRESHOLD, DEFAULT_SUSTAINED_SECS, DEFAULT_TICK_SECS,
};
use crate::posture::LlmConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub window_frames: usize,
    pub keypoint_dims: usize,
    pub read_mode: ReadMode,
    pub model_weight: f32,
    pub rule_weight: f32,
    pub fusion_threshold: f32,
    pub classifier_alarm_threshold: f32,
    pub verdict_policy: FallVerdictPolicy,
    pub fallback_probability: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_frames: DEFAULT_WINDOW_FRAMES,
            keypoint_dims: DEFAULT_KEYPOINT_DIMS,
            read_mode: ReadMode::default(),
            model_weight: DEFAULT_MODEL_WEIGHT,
            rule_weight: DEFAULT_RULE_WEIGHT,
            fusion_threshold: DEFAULT_FUSION_THRESHOLD,
            classifier_alarm_threshold: DEFAULT_ALARM_THRESHOLD,
            verdict_policy: FallVerdictPolicy::default(),
            fallback_probability: DEFAULT_FALLBACK_PROBABILITY,
        }
    }
}

impl DetectionConfig {
    pub fn fusion(&self) -> Result<ProbabilityFusion, FusionError> {
        ProbabilityFusion::new(self.model_weight, self.rule_weight, self.fusion_threshold)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostureConfig {
    pub analysis_interval_secs: u64,
    pub bad_threshold: u8,
    pub sustained_duration_secs: u64,
}

impl Default for PostureConfig {
    fn default() -> Self {
        Self {
            analysis_interval_secs: DEFAULT_TICK_SECS,
            bad_threshold: DEFAULT_BAD_THRESHOLD,
            sustained_duration_secs: DEFAULT_SUSTAINED_SECS,
        }
    }
}

impl PostureConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_secs.max(1))
    }

    pub fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            bad_threshold: self.bad_threshold,
            sustained_duration: Duration::from_secs(self.sustained_duration_secs),
            tick_period: self.interval(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub detection: DetectionConfig,
    pub posture: PostureConfig,
    pub escalation: EscalationConfig,
    pub settings_path: PathBuf,
    pub llm: LlmConfig,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = DetectionConfig::default();
        let detection = DetectionConfig {
            window_frames: env_parse("WINDOW_FRAMES").unwrap_or(defaults.window_frames),
            keypoint_dims: env_parse("KEYPOINT_DIMS").unwrap_or(defaults.keypoint_dims),
            read_mode: std::env::var("WINDOW_READ_MODE")
                .ok()
                .and_then(|v| ReadMode::parse(&v))
                .unwrap_or(defaults.read_mode),
            model_weight: env_parse("FUSION_MODEL_WEIGHT").unwrap_or(defaults.model_weight),
            rule_weight: env_parse("FUSION_RULE_WEIGHT").unwrap_or(defaults.rule_weight),
            fusion_threshold: env_parse("FUSION_THRESHOLD").unwrap_or(defaults.fusion_threshold),
            classifier_alarm_threshold: env_parse("CLASSIFIER_ALARM_THRESHOLD")
                .unwrap_or(defaults.classifier_alarm_threshold),
            verdict_policy: std::env::var("FALL_VERDICT_POLICY")
                .ok()
                .and_then(|v| FallVerdictPolicy::parse(&v))
                .unwrap_or(defaults.verdict_policy),
            fallback_probability: env_parse("CLASSIFIER_FALLBACK_PROBABILITY")
                .unwrap_or(defaults.fallback_probability),
        };

        let defaults = PostureConfig::default();
        let posture = PostureConfig {
            analysis_interval_secs: env_parse("POSTURE_INTERVAL_SECS")
                .unwrap_or(defaults.analysis_interval_secs),
            bad_threshold: env_parse("POSTURE_BAD_THRESHOLD").unwrap_or(defaults.bad_threshold),
            sustained_duration_secs: env_parse("POSTURE_SUSTAINED_SECS")
                .unwrap_or(defaults.sustained_duration_secs),
        };

        let defaults = EscalationConfig::default();
        let escalation = EscalationConfig {
            location_timeout_secs: env_parse("LOCATION_TIMEOUT_SECS")
                .unwrap_or(defaults.location_timeout_secs),
            ..defaults
        };

        let settings_path = std::env::var("SETTINGS_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_settings_path);

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            detection,
            posture,
            escalation,
            settings_path,
            llm: LlmConfig::from_env(),
            log_level,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            posture: PostureConfig::default(),
            escalation: EscalationConfig::default(),
            settings_path: default_settings_path(),
            llm: LlmConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fall-sentinel")
        .join("settings.json")
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}
