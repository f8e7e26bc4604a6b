//! Cancellable countdown that escalates a detected fall into a drafted alert.
//!
//! One countdown runs per escalation at a time. Ticks are checked against the
//! run id under the state lock. A timed-out run keeps composing its alert even
//! if a new countdown starts; `cancel` withdraws the current run's alert and
//! `stop` withdraws every pending one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use super::message::{compose_draft, AlertDraft, LocationField};
use super::services::{
    FixedLocation, HapticPattern, Haptics, LocationError, LocationProvider, LoggingComposer,
    LoggingHaptics, LoggingSpeech, MessageComposer, QueueMode, SpeechEngine,
};
use super::settings::{AlertSettings, SettingsStore};

pub const START_ANNOUNCEMENT: &str = "A fall is detected. Are you okay?";
pub const REMINDER: &str = "Please tap I'm okay if you are fine.";
pub const FINAL_WARNING: &str = "No response detected. Preparing emergency message.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub location_timeout_secs: u64,
    pub short_pulse_ms: u64,
    pub long_pulse_ms: u64,
    pub reminder_every_secs: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            location_timeout_secs: 10,
            short_pulse_ms: 80,
            long_pulse_ms: 300,
            reminder_every_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "remaining", rename_all = "snake_case")]
pub enum CountdownState {
    Idle,
    Running(u32),
    Completed,
    Cancelled,
}

impl CountdownState {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlertsDisabled,
    NoRecipients,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlertsDisabled => f.write_str("SMS alerts disabled"),
            Self::NoRecipients => f.write_str("no emergency contacts"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComposeOutcome {
    Composed(AlertDraft),
    Skipped(SkipReason),
}

/// Receives countdown progress.
///
/// Callbacks run while the escalation holds its state lock, which is what
/// keeps them from racing a concurrent `cancel`. They must not call back into
/// the escalation synchronously.
pub trait CountdownObserver: Send + Sync {
    fn on_tick(&self, _remaining: u32) {}
    fn on_timeout(&self) {}
    fn on_cancel(&self) {}
    fn on_alert(&self, _outcome: &ComposeOutcome) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CountdownObserver for NoopObserver {}

#[derive(Clone)]
pub struct EscalationServices {
    pub haptics: Arc<dyn Haptics>,
    pub speech: Arc<dyn SpeechEngine>,
    pub location: Arc<dyn LocationProvider>,
    pub composer: Arc<dyn MessageComposer>,
}

impl EscalationServices {
    /// Collaborators that only log, for hosts without devices.
    pub fn logging() -> Self {
        Self {
            haptics: Arc::new(LoggingHaptics),
            speech: Arc::new(LoggingSpeech),
            location: Arc::new(FixedLocation::default()),
            composer: Arc::new(LoggingComposer),
        }
    }
}

struct RunState {
    state: CountdownState,
    run_id: u64,
    closed: bool,
    ticker: Option<JoinHandle<()>>,
    /// Alerts being composed, keyed by the run that timed out. A result is
    /// only reported while its entry is still here.
    pending: HashMap<u64, JoinHandle<()>>,
}

impl RunState {
    fn release_ticker(&mut self) {
        if let Some(task) = self.ticker.take() {
            task.abort();
        }
    }

    fn withdraw(&mut self, run_id: u64) -> bool {
        match self.pending.remove(&run_id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    fn withdraw_all(&mut self) -> usize {
        let withdrawn = self.pending.len();
        for (_, task) in self.pending.drain() {
            task.abort();
        }
        withdrawn
    }

    fn release_tasks(&mut self) {
        self.release_ticker();
        self.withdraw_all();
    }
}

struct Shared {
    config: EscalationConfig,
    services: EscalationServices,
    settings: Arc<dyn SettingsStore>,
    observer: Arc<dyn CountdownObserver>,
    run: Mutex<RunState>,
}

pub struct EmergencyEscalation {
    shared: Arc<Shared>,
}

impl EmergencyEscalation {
    pub fn new(
        config: EscalationConfig,
        services: EscalationServices,
        settings: Arc<dyn SettingsStore>,
        observer: Arc<dyn CountdownObserver>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                services,
                settings,
                observer,
                run: Mutex::new(RunState {
                    state: CountdownState::Idle,
                    run_id: 0,
                    closed: false,
                    ticker: None,
                    pending: HashMap::new(),
                }),
            }),
        }
    }

    pub fn state(&self) -> CountdownState {
        self.shared.run.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state().is_running()
    }

    pub fn settings(&self) -> AlertSettings {
        self.shared.settings.load()
    }

    /// Starts with the duration from the current alert settings.
    pub fn start_from_settings(&self) -> bool {
        let duration = self.shared.settings.load().timer_duration_secs;
        self.start(duration)
    }

    /// Returns false without side effects when a countdown is already running,
    /// the escalation is closed, or there is no runtime to drive it.
    ///
    /// An alert still being composed for an earlier timed-out run keeps going.
    pub fn start(&self, duration_secs: u32) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime available, countdown not started");
            return false;
        };

        let mut run = self.shared.run.lock();
        if run.closed {
            info!("escalation closed, start ignored");
            return false;
        }
        if run.state.is_running() {
            info!(state = ?run.state, "countdown already running, start ignored");
            return false;
        }

        run.release_ticker();
        run.pending.retain(|_, task| !task.is_finished());
        run.run_id += 1;
        run.state = CountdownState::Running(duration_secs);
        let run_id = run.run_id;
        info!(run_id, duration_secs, "emergency countdown started");

        self.shared.say(START_ANNOUNCEMENT, QueueMode::Flush);

        let shared = Arc::clone(&self.shared);
        run.ticker = Some(runtime.spawn(
            countdown(shared, run_id, duration_secs).instrument(tracing::Span::current()),
        ));
        true
    }

    /// The user confirmed they are fine. Also withdraws the alert of the
    /// latest run if it timed out and is still being composed.
    pub fn cancel(&self) {
        self.halt(CountdownState::Cancelled);
    }

    /// Tears down any countdown and pending alert. The escalation can be
    /// started again afterwards.
    pub fn stop(&self) {
        self.halt(CountdownState::Idle);
    }

    /// Stops like [`stop`](Self::stop) and refuses every later `start`.
    pub fn close(&self) {
        self.shared.run.lock().closed = true;
        self.halt(CountdownState::Idle);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.run.lock().closed
    }

    fn halt(&self, target: CountdownState) {
        let shared = &self.shared;
        let mut run = shared.run.lock();
        run.release_ticker();
        let current = run.run_id;
        let withdrawn = if target == CountdownState::Idle {
            run.withdraw_all()
        } else {
            usize::from(run.withdraw(current))
        };
        if withdrawn > 0 {
            info!(withdrawn, "pending emergency message withdrawn");
        }

        match run.state {
            CountdownState::Running(remaining) => {
                shared.services.speech.stop();
                shared.pulse(HapticPattern::Long);
                shared.observer.on_cancel();
                run.state = target;
                info!(remaining, state = ?target, "emergency countdown cancelled");
            }
            state => {
                debug!(?state, "no countdown running");
                if target == CountdownState::Idle {
                    run.state = CountdownState::Idle;
                }
            }
        }
    }
}

impl Drop for EmergencyEscalation {
    fn drop(&mut self) {
        self.shared.run.lock().release_tasks();
    }
}

impl std::fmt::Debug for EmergencyEscalation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyEscalation")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish()
    }
}

async fn countdown(shared: Arc<Shared>, run_id: u64, duration_secs: u32) {
    let period = Duration::from_secs(1);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for remaining in (0..duration_secs).rev() {
        ticker.tick().await;
        if !shared.tick(run_id, remaining) {
            return;
        }
    }
    shared.finish(run_id);
}

async fn compose_alert(shared: Arc<Shared>, run_id: u64) {
    let settings = shared.settings.load();
    let recipients: Vec<String> = settings.recipients().into_iter().map(String::from).collect();

    let skip = if !settings.sms_enabled {
        Some(SkipReason::AlertsDisabled)
    } else if recipients.is_empty() {
        Some(SkipReason::NoRecipients)
    } else {
        None
    };
    if let Some(reason) = skip {
        shared.report(run_id, ComposeOutcome::Skipped(reason));
        return;
    }

    let location = shared.locate(&settings).await;
    let draft = compose_draft(recipients, &settings.user_name, &Local::now(), &location);
    shared.report(run_id, ComposeOutcome::Composed(draft));
}

impl Shared {
    fn say(&self, text: &str, mode: QueueMode) {
        if let Err(err) = self.services.speech.speak(text, mode) {
            warn!(error = %err, "speech failed");
        }
    }

    fn pulse(&self, pattern: HapticPattern) {
        let duration_ms = match pattern {
            HapticPattern::Short => self.config.short_pulse_ms,
            HapticPattern::Long => self.config.long_pulse_ms,
        };
        if let Err(err) = self.services.haptics.pulse(pattern, duration_ms) {
            warn!(error = %err, "haptic pulse failed");
        }
    }

    fn tick(&self, run_id: u64, remaining: u32) -> bool {
        let mut run = self.run.lock();
        if run.run_id != run_id || !run.state.is_running() {
            return false;
        }
        run.state = CountdownState::Running(remaining);
        debug!(remaining, "countdown tick");

        self.pulse(HapticPattern::Short);
        self.observer.on_tick(remaining);
        let every = self.config.reminder_every_secs.max(1);
        if remaining > 0 && remaining % every == 0 {
            self.say(REMINDER, QueueMode::Add);
        }
        true
    }

    fn finish(self: &Arc<Self>, run_id: u64) {
        let mut run = self.run.lock();
        if run.run_id != run_id || !run.state.is_running() {
            return;
        }
        run.state = CountdownState::Completed;
        run.ticker = None;
        warn!(run_id, "no response to fall alert, escalating");

        self.say(FINAL_WARNING, QueueMode::Add);
        self.pulse(HapticPattern::Long);
        let task = tokio::spawn(
            compose_alert(Arc::clone(self), run_id).instrument(tracing::Span::current()),
        );
        run.pending.insert(run_id, task);
        self.observer.on_timeout();
    }

    async fn locate(&self, settings: &AlertSettings) -> LocationField {
        if !settings.gps_enabled {
            debug!("location disabled in settings");
            return LocationField::Disabled;
        }
        if !self.services.location.has_permission() {
            info!("location permission missing");
            return LocationField::PermissionMissing;
        }

        let limit = Duration::from_secs(self.config.location_timeout_secs);
        let result = match tokio::time::timeout(limit, self.services.location.last_location()).await
        {
            Ok(result) => result,
            Err(_) => Err(LocationError::TimedOut),
        };
        if let Err(err) = &result {
            warn!(error = %err, "location lookup failed");
        }
        LocationField::from_lookup(result)
    }

    fn report(&self, run_id: u64, outcome: ComposeOutcome) {
        let mut run = self.run.lock();
        if run.pending.remove(&run_id).is_none() {
            debug!(run_id, "alert withdrawn before composition, result discarded");
            return;
        }

        match &outcome {
            ComposeOutcome::Skipped(reason) => {
                info!(%reason, "emergency message skipped");
            }
            ComposeOutcome::Composed(draft) => {
                info!(
                    recipients = draft.recipients.len(),
                    "emergency message composed"
                );
                if let Err(err) = self.services.composer.compose(draft) {
                    warn!(error = %err, "message composer failed");
                }
            }
        }
        self.observer.on_alert(&outcome);
    }
}
