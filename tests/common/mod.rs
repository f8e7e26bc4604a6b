#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use fall_sentinel::detection::{InferenceError, RuleScorer, SequenceClassifier, WindowTensor};
use fall_sentinel::emergency::{
    AlertDraft, AlertSettings, ComposeOutcome, CountdownObserver, EmergencyContact,
    EscalationServices, HapticPattern, Haptics, Location, LocationError, LocationProvider,
    MessageComposer, QueueMode, ServiceError, SpeechEngine,
};

#[derive(Default)]
pub struct RecordingHaptics {
    pub pulses: Mutex<Vec<(HapticPattern, u64)>>,
}

impl RecordingHaptics {
    pub fn count(&self, pattern: HapticPattern) -> usize {
        self.pulses.lock().iter().filter(|(p, _)| *p == pattern).count()
    }
}

impl Haptics for RecordingHaptics {
    fn pulse(&self, pattern: HapticPattern, duration_ms: u64) -> Result<(), ServiceError> {
        self.pulses.lock().push((pattern, duration_ms));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSpeech {
    pub spoken: Mutex<Vec<String>>,
    pub modes: Mutex<Vec<QueueMode>>,
    pub stops: AtomicUsize,
    pub broken: bool,
}

impl SpeechEngine for RecordingSpeech {
    fn speak(&self, text: &str, mode: QueueMode) -> Result<(), ServiceError> {
        if self.broken {
            return Err(ServiceError::Unavailable {
                service: "speech",
                reason: "engine not initialised".into(),
            });
        }
        self.spoken.lock().push(text.to_string());
        self.modes.lock().push(mode);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct ScriptedLocation {
    pub permission: bool,
    pub result: Result<Option<Location>, LocationError>,
    pub delay: Duration,
    pub lookups: AtomicUsize,
}

impl ScriptedLocation {
    pub fn ok(location: Location) -> Self {
        Self::with(true, Ok(Some(location)))
    }

    pub fn with(permission: bool, result: Result<Option<Location>, LocationError>) -> Self {
        Self {
            permission,
            result,
            delay: Duration::ZERO,
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl LocationProvider for ScriptedLocation {
    fn has_permission(&self) -> bool {
        self.permission
    }

    fn last_location(&self) -> BoxFuture<'_, Result<Option<Location>, LocationError>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result.clone()
        })
    }
}

#[derive(Default)]
pub struct RecordingComposer {
    pub drafts: Mutex<Vec<AlertDraft>>,
}

impl MessageComposer for RecordingComposer {
    fn compose(&self, draft: &AlertDraft) -> Result<(), ServiceError> {
        self.drafts.lock().push(draft.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub ticks: Mutex<Vec<u32>>,
    pub timeouts: AtomicUsize,
    pub cancels: AtomicUsize,
    pub alerts: Mutex<Vec<ComposeOutcome>>,
}

impl CountdownObserver for RecordingObserver {
    fn on_tick(&self, remaining: u32) {
        self.ticks.lock().push(remaining);
    }

    fn on_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn on_alert(&self, outcome: &ComposeOutcome) {
        self.alerts.lock().push(outcome.clone());
    }
}

pub struct Fakes {
    pub haptics: Arc<RecordingHaptics>,
    pub speech: Arc<RecordingSpeech>,
    pub location: Arc<ScriptedLocation>,
    pub composer: Arc<RecordingComposer>,
    pub observer: Arc<RecordingObserver>,
}

impl Fakes {
    pub fn new(location: ScriptedLocation) -> Self {
        Self {
            haptics: Arc::default(),
            speech: Arc::default(),
            location: Arc::new(location),
            composer: Arc::default(),
            observer: Arc::default(),
        }
    }

    pub fn services(&self) -> EscalationServices {
        EscalationServices {
            haptics: self.haptics.clone(),
            speech: self.speech.clone(),
            location: self.location.clone(),
            composer: self.composer.clone(),
        }
    }

    pub fn ticks(&self) -> Vec<u32> {
        self.observer.ticks.lock().clone()
    }

    pub fn drafts(&self) -> Vec<AlertDraft> {
        self.composer.drafts.lock().clone()
    }
}

pub fn home() -> Location {
    Location {
        latitude: 40.712_8,
        longitude: -74.006,
        accuracy_m: 8.0,
    }
}

pub fn settings_with_contacts(count: usize) -> AlertSettings {
    AlertSettings {
        contacts: (0..count)
            .map(|i| EmergencyContact::new(format!("Contact {i}"), format!("555-010{i}")))
            .collect(),
        user_name: "Ada".into(),
        ..AlertSettings::default()
    }
}

/// Classifier returning one fixed probability.
pub struct FixedClassifier(pub f32);

impl SequenceClassifier for FixedClassifier {
    fn predict(&self, _window: &WindowTensor) -> Result<f32, InferenceError> {
        Ok(self.0)
    }
}

pub struct FailingClassifier;

impl SequenceClassifier for FailingClassifier {
    fn predict(&self, _window: &WindowTensor) -> Result<f32, InferenceError> {
        Err(InferenceError::Engine("interpreter closed".into()))
    }
}

pub struct FixedRule(pub f32);

impl RuleScorer for FixedRule {
    fn score(&self, _window: &WindowTensor) -> f32 {
        self.0
    }
}
