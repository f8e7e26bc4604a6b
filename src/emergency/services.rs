//! Side-effecting capabilities used during escalation.
//!
//! All of them are best-effort: callers log failures and carry on.

use futures::future::{self, BoxFuture};
use thiserror::Error;
use tracing::info;

use super::message::{AlertDraft, Location};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} unavailable: {reason}")]
    Unavailable {
        service: &'static str,
        reason: String,
    },
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location unavailable: {0}")]
    Unavailable(String),
    #[error("location lookup timed out")]
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HapticPattern {
    /// Per-second countdown tick.
    Short,
    /// Countdown finished or cancelled.
    Long,
}

pub trait Haptics: Send + Sync {
    fn pulse(&self, pattern: HapticPattern, duration_ms: u64) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    Flush,
    Add,
}

pub trait SpeechEngine: Send + Sync {
    fn speak(&self, text: &str, mode: QueueMode) -> Result<(), ServiceError>;
    fn stop(&self);
}

pub trait LocationProvider: Send + Sync {
    fn has_permission(&self) -> bool;
    /// Single best-effort lookup of the last known fix.
    fn last_location(&self) -> BoxFuture<'_, Result<Option<Location>, LocationError>>;
}

/// Hands a draft to the user for confirmation. Never sends on its own.
pub trait MessageComposer: Send + Sync {
    fn compose(&self, draft: &AlertDraft) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHaptics;

impl Haptics for LoggingHaptics {
    fn pulse(&self, pattern: HapticPattern, duration_ms: u64) -> Result<(), ServiceError> {
        tracing::trace!(?pattern, duration_ms, "haptic pulse");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSpeech;

impl SpeechEngine for LoggingSpeech {
    fn speak(&self, text: &str, mode: QueueMode) -> Result<(), ServiceError> {
        info!(?mode, text, "speak");
        Ok(())
    }

    fn stop(&self) {
        tracing::debug!("speech stopped");
    }
}

/// Location provider for hosts without positioning.
#[derive(Debug, Clone, Default)]
pub struct FixedLocation {
    pub permission: bool,
    pub location: Option<Location>,
}

impl LocationProvider for FixedLocation {
    fn has_permission(&self) -> bool {
        self.permission
    }

    fn last_location(&self) -> BoxFuture<'_, Result<Option<Location>, LocationError>> {
        Box::pin(future::ready(Ok(self.location)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingComposer;

impl MessageComposer for LoggingComposer {
    fn compose(&self, draft: &AlertDraft) -> Result<(), ServiceError> {
        info!(
            recipients = %draft.recipient_list(),
            uri = %draft.sms_uri(),
            "alert message ready for confirmation"
        );
        Ok(())
    }
}
