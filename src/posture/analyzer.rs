use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::angles::{
    body_angles, fallback_assessment, posture_label, IDEAL_NECK_MAX, IDEAL_NECK_MIN,
    IDEAL_SHOULDER_ALIGNMENT_MAX, IDEAL_SPINE_MAX, IDEAL_SPINE_MIN,
};
use super::score::{BodyAngles, PostureAssessment, PostureScore};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_MS: u64 = 20_000;
const MAX_RETRIES: usize = 2;
const BASE_BACKOFF_MS: u64 = 200;
const DEFAULT_PARSED_SCORE: u8 = 75;
const MAX_LIST_ITEMS: usize = 3;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis service not configured: {0}")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty response")]
    EmptyResponse,
}

/// Qualitative posture feedback from body angles, typically a cloud text model.
pub trait PostureAnalysisService: Send + Sync {
    fn assess<'a>(
        &'a self,
        angles: &'a BodyAngles,
        label: &'a str,
    ) -> BoxFuture<'a, Result<PostureAssessment, AnalysisError>>;
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_endpoint: String,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let api_key = env_string("LLM_API_KEY");
        let model = env_string("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_endpoint = normalize_endpoint(
            env_string("LLM_API_ENDPOINT").unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
        );
        let timeout = Duration::from_millis(
            env_string("LLM_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_MS),
        );
        Self {
            api_key,
            model,
            api_endpoint,
            timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        self.api_key.as_deref().is_some_and(|v| !v.trim().is_empty())
            && !self.model.trim().is_empty()
            && !self.api_endpoint.trim().is_empty()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible chat completion client for posture feedback.
#[derive(Clone)]
pub struct LlmPostureService {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmPostureService {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    pub fn is_available(&self) -> bool {
        self.config.is_available()
    }

    async fn complete(&self, prompt: String) -> Result<String, AnalysisError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or(AnalysisError::NotConfigured("LLM_API_KEY"))?;

        let url = format!(
            "{}/chat/completions",
            self.config.api_endpoint.trim_end_matches('/')
        );
        let payload = serde_json::json!({
            "model": self.config.model,
            "messages": [ChatMessage { role: "user".into(), content: prompt }],
            "temperature": 0.7,
            "max_tokens": 500,
            "stream": false
        });

        let mut last_error = None;
        for retry in 0..=MAX_RETRIES {
            let err = match self.client.post(&url).bearer_auth(api_key).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let bytes = resp.bytes().await?;
                    let parsed: ChatResponse = serde_json::from_slice(&bytes)?;
                    return parsed
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or(AnalysisError::EmptyResponse);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    if !is_retryable(status) {
                        return Err(AnalysisError::HttpStatus { status, body });
                    }
                    AnalysisError::HttpStatus { status, body }
                }
                Err(e) => AnalysisError::Request(e),
            };

            if retry < MAX_RETRIES {
                warn!(retry, error = %err, "posture analysis request failed, retrying");
                sleep(Duration::from_millis(BASE_BACKOFF_MS * (1 << retry))).await;
            }
            last_error = Some(err);
        }
        Err(last_error.unwrap_or(AnalysisError::EmptyResponse))
    }
}

impl PostureAnalysisService for LlmPostureService {
    fn assess<'a>(
        &'a self,
        angles: &'a BodyAngles,
        label: &'a str,
    ) -> BoxFuture<'a, Result<PostureAssessment, AnalysisError>> {
        Box::pin(async move {
            let text = self.complete(build_prompt(angles, label)).await?;
            debug!(len = text.len(), "posture analysis response received");
            Ok(parse_assessment(&text))
        })
    }
}

fn build_prompt(angles: &BodyAngles, label: &str) -> String {
    format!(
        "You are a posture analysis expert for elderly care.\n\
         \n\
         Current posture measurements:\n\
         - Neck angle: {neck}° (ideal: {IDEAL_NECK_MIN}-{IDEAL_NECK_MAX}°)\n\
         - Spine angle: {spine}° (ideal: {IDEAL_SPINE_MIN}-{IDEAL_SPINE_MAX}°)\n\
         - Shoulder alignment: {shoulder}° (ideal: <{IDEAL_SHOULDER_ALIGNMENT_MAX}°)\n\
         - Detected state: {label}\n\
         \n\
         Analyze this posture and provide:\n\
         1. Overall posture score (0-100)\n\
         2. List of specific issues (max 3, comma-separated)\n\
         3. Actionable recommendations (max 3, numbered list)\n\
         \n\
         Keep recommendations simple and actionable for elderly users.\n\
         \n\
         Format your response EXACTLY as:\n\
         SCORE: [number]\n\
         ISSUES: [issue1, issue2, issue3]\n\
         RECOMMENDATIONS:\n\
         1. [recommendation1]\n\
         2. [recommendation2]\n\
         3. [recommendation3]",
        neck = angles.neck as i32,
        spine = angles.spine as i32,
        shoulder = angles.shoulder_alignment as i32,
    )
}

/// Parses the `SCORE:` / `ISSUES:` / `RECOMMENDATIONS:` reply format.
pub fn parse_assessment(text: &str) -> PostureAssessment {
    let mut score = DEFAULT_PARSED_SCORE;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    let mut in_recommendations = false;

    for line in text.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("SCORE:") {
            let digits: String = rest.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            score = digits
                .parse::<u32>()
                .map(|v| v.min(100) as u8)
                .unwrap_or(DEFAULT_PARSED_SCORE);
        } else if let Some(rest) = line.strip_prefix("ISSUES:") {
            issues = rest
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        } else if line.starts_with("RECOMMENDATIONS:") {
            in_recommendations = true;
        } else if in_recommendations {
            if let Some(item) = strip_numbering(line) {
                recommendations.push(item.to_string());
            }
        }
    }

    issues.truncate(MAX_LIST_ITEMS);
    recommendations.truncate(MAX_LIST_ITEMS);
    PostureAssessment {
        score,
        issues,
        recommendations,
    }
}

fn strip_numbering(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = line[digits..].strip_prefix('.')?.trim();
    (!rest.is_empty()).then_some(rest)
}

/// Angle extraction plus remote assessment with deterministic fallback, so the
/// tracker always receives a score.
#[derive(Clone, Default)]
pub struct PostureAnalyzer {
    service: Option<Arc<dyn PostureAnalysisService>>,
}

impl PostureAnalyzer {
    pub fn new(service: Option<Arc<dyn PostureAnalysisService>>) -> Self {
        Self { service }
    }

    pub fn offline() -> Self {
        Self { service: None }
    }

    pub async fn analyze(&self, frame: &[f32]) -> Option<PostureScore> {
        let Some(angles) = body_angles(frame) else {
            debug!(len = frame.len(), "frame too short for posture analysis");
            return None;
        };
        let label = posture_label(&angles);
        debug!(
            neck = angles.neck,
            spine = angles.spine,
            shoulder = angles.shoulder_alignment,
            label,
            "body angles computed"
        );

        let assessment = match &self.service {
            Some(service) => match service.assess(&angles, label).await {
                Ok(assessment) => assessment,
                Err(err) => {
                    warn!(error = %err, "posture analysis service failed, using fallback scoring");
                    fallback_assessment(&angles)
                }
            },
            None => fallback_assessment(&angles),
        };

        let score = PostureScore::new(assessment, angles);
        info!(score = score.score, status = %score.status, "posture analyzed");
        Some(score)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn normalize_endpoint(endpoint: String) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") || trimmed.contains("/v1/") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

fn is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}
