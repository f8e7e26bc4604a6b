//! One monitoring run: frames in, fall verdicts and posture events out.
//!
//! The frame path only appends to the window and wakes the inference worker.
//! Inference, posture analysis and the countdown each run on their own task,
//! all inside the session's tracing span.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::config::Config;
use crate::core::{
    AlertComposedPayload, AlertSkippedPayload, CountdownTickPayload, EventBus, EventEnvelope,
    FallDetectedPayload, MonitoringEvent, SessionEndedPayload, SessionPayload,
    SustainedPosturePayload,
};
use crate::detection::{
    ClassifierAdapter, FallPipeline, FusionError, KeypointWindow, ReadMode, RuleScorer,
    SequenceClassifier, StillnessVerticalityScorer, WindowError, WindowVerdict,
};
use crate::emergency::{
    ComposeOutcome, CountdownObserver, CountdownState, EmergencyEscalation, EscalationServices,
    SettingsStore,
};
use crate::fps::FpsMeter;
use crate::posture::{PostureAnalyzer, PostureStateTracker, SustainedPosture};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Fusion(#[from] FusionError),
    #[error("monitoring requires a running Tokio runtime")]
    NoRuntime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub fall_count: u32,
}

impl SessionSummary {
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }

    pub fn has_falls(&self) -> bool {
        self.fall_count > 0
    }
}

/// Collaborators a session is wired with.
pub struct SessionDeps {
    pub classifier: Arc<dyn SequenceClassifier>,
    pub rules: Arc<dyn RuleScorer>,
    pub analyzer: PostureAnalyzer,
    pub services: EscalationServices,
    pub settings: Arc<dyn SettingsStore>,
    pub events: Arc<EventBus>,
    pub observer: Option<Arc<dyn CountdownObserver>>,
}

impl SessionDeps {
    pub fn new(classifier: Arc<dyn SequenceClassifier>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            classifier,
            rules: Arc::new(StillnessVerticalityScorer),
            analyzer: PostureAnalyzer::offline(),
            services: EscalationServices::logging(),
            settings,
            events: Arc::new(EventBus::new()),
            observer: None,
        }
    }

    pub fn with_rules(mut self, rules: Arc<dyn RuleScorer>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_analyzer(mut self, analyzer: PostureAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_services(mut self, services: EscalationServices) -> Self {
        self.services = services;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn CountdownObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// Publishes countdown progress on the event bus and forwards it to an
/// optional host observer.
struct SessionObserver {
    session_id: String,
    events: Arc<EventBus>,
    forward: Option<Arc<dyn CountdownObserver>>,
}

impl CountdownObserver for SessionObserver {
    fn on_tick(&self, remaining: u32) {
        self.events
            .publish(MonitoringEvent::CountdownTick(CountdownTickPayload {
                session_id: self.session_id.clone(),
                remaining,
            }));
        if let Some(forward) = &self.forward {
            forward.on_tick(remaining);
        }
    }

    fn on_timeout(&self) {
        self.events
            .publish(MonitoringEvent::CountdownTimeout(SessionPayload::now(&self.session_id)));
        if let Some(forward) = &self.forward {
            forward.on_timeout();
        }
    }

    fn on_cancel(&self) {
        self.events.publish(MonitoringEvent::CountdownCancelled(SessionPayload::now(
            &self.session_id,
        )));
        if let Some(forward) = &self.forward {
            forward.on_cancel();
        }
    }

    fn on_alert(&self, outcome: &ComposeOutcome) {
        let event = match outcome {
            ComposeOutcome::Composed(draft) => MonitoringEvent::AlertComposed(AlertComposedPayload {
                session_id: self.session_id.clone(),
                recipients: draft.recipients.clone(),
                body: draft.body.clone(),
                timestamp: Utc::now(),
            }),
            ComposeOutcome::Skipped(reason) => MonitoringEvent::AlertSkipped(AlertSkippedPayload {
                session_id: self.session_id.clone(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            }),
        };
        self.events.publish(event);
        if let Some(forward) = &self.forward {
            forward.on_alert(outcome);
        }
    }
}

struct Detector {
    session_id: String,
    pipeline: FallPipeline,
    window: Arc<KeypointWindow>,
    read_mode: ReadMode,
    escalation: Arc<EmergencyEscalation>,
    events: Arc<EventBus>,
    fall_count: Arc<AtomicU32>,
    /// Set while consecutive windows keep reporting the same fall.
    latched: AtomicBool,
}

impl Detector {
    fn handle(&self, verdict: WindowVerdict) {
        if self.escalation.is_closed() {
            debug!("session stopped, verdict dropped");
            return;
        }
        if !verdict.escalate {
            if self.latched.swap(false, Ordering::SeqCst) {
                debug!("fall condition cleared");
            }
            return;
        }
        if self.latched.swap(true, Ordering::SeqCst) {
            debug!("fall already reported for this episode");
            return;
        }

        let falls = self.fall_count.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(
            falls,
            probability = verdict.fusion.final_probability,
            "fall detected"
        );
        self.events
            .publish(MonitoringEvent::FallDetected(FallDetectedPayload {
                session_id: self.session_id.clone(),
                model_probability: verdict.classifier.probability,
                rule_score: verdict.rule_score,
                fused_probability: verdict.fusion.final_probability,
                classifier_alarm: verdict.classifier.is_fall,
                fusion_alarm: verdict.fusion.is_fall,
                timestamp: Utc::now(),
            }));
        self.escalation.start_from_settings();
    }
}

async fn run_inference(detector: Arc<Detector>, wake: Arc<Notify>) {
    loop {
        wake.notified().await;

        let tensor = match detector.window.read(detector.read_mode) {
            Ok(tensor) => tensor,
            Err(err) => {
                debug!(error = %err, "window not ready for inference");
                continue;
            }
        };

        let pipeline = detector.pipeline.clone();
        let span = Span::current();
        let verdict =
            tokio::task::spawn_blocking(move || span.in_scope(|| pipeline.evaluate(&tensor))).await;
        match verdict {
            Ok(verdict) => detector.handle(verdict),
            Err(err) => warn!(error = %err, "inference task failed"),
        }
    }
}

struct PostureLoop {
    session_id: String,
    window: Arc<KeypointWindow>,
    analyzer: PostureAnalyzer,
    tracker: Arc<Mutex<PostureStateTracker>>,
    events: Arc<EventBus>,
    started_at: DateTime<Utc>,
    epoch: Instant,
}

impl PostureLoop {
    /// Wall-clock time derived from the runtime clock, so dwell tracking
    /// follows the same time source as the analysis interval.
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.epoch.elapsed()).unwrap_or_default();
        self.started_at + elapsed
    }

    fn publish(&self, sustained: SustainedPosture) {
        let posture = sustained.posture;
        self.events
            .publish(MonitoringEvent::SustainedBadPosture(SustainedPosturePayload {
                session_id: self.session_id.clone(),
                score: posture.score,
                status: posture.status.to_string(),
                duration_secs: sustained.duration_secs,
                issues: posture.issues,
                timestamp: posture.timestamp,
            }));
    }
}

async fn run_posture(ctx: Arc<PostureLoop>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let Some(frame) = ctx.window.latest_frame() else {
            debug!("no frame yet for posture analysis");
            continue;
        };
        let Some(mut score) = ctx.analyzer.analyze(&frame).await else {
            continue;
        };
        score.timestamp = ctx.now();

        let sustained = ctx.tracker.lock().observe(score);
        if let Some(sustained) = sustained {
            ctx.publish(sustained);
        }
    }
}

pub struct MonitoringSession {
    id: String,
    started_at: DateTime<Utc>,
    span: Span,
    read_mode: ReadMode,
    window: Arc<KeypointWindow>,
    fps: FpsMeter,
    escalation: Arc<EmergencyEscalation>,
    tracker: Arc<Mutex<PostureStateTracker>>,
    events: Arc<EventBus>,
    fall_count: Arc<AtomicU32>,
    wake: Arc<Notify>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    ended_at: Mutex<Option<DateTime<Utc>>>,
}

impl MonitoringSession {
    /// Wires the pipeline and spawns the session's workers on the current
    /// Tokio runtime.
    pub fn start(config: &Config, deps: SessionDeps) -> Result<Self, SessionError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let fusion = config.detection.fusion()?;

        let id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let span = info_span!("monitoring_session", session_id = %id);
        let _entered = span.enter();

        let detection = &config.detection;
        let classifier = ClassifierAdapter::new(deps.classifier)
            .with_alarm_threshold(detection.classifier_alarm_threshold)
            .with_fallback_probability(detection.fallback_probability);
        let pipeline = FallPipeline::new(classifier, deps.rules, fusion, detection.verdict_policy);
        let window = Arc::new(KeypointWindow::new(
            detection.window_frames,
            detection.keypoint_dims,
        ));

        let events = deps.events;
        let observer = Arc::new(SessionObserver {
            session_id: id.clone(),
            events: Arc::clone(&events),
            forward: deps.observer,
        });
        let escalation = Arc::new(EmergencyEscalation::new(
            config.escalation.clone(),
            deps.services,
            deps.settings,
            observer,
        ));
        let tracker = Arc::new(Mutex::new(PostureStateTracker::new(config.posture.tracker())));
        let fall_count = Arc::new(AtomicU32::new(0));
        let wake = Arc::new(Notify::new());

        let detector = Arc::new(Detector {
            session_id: id.clone(),
            pipeline,
            window: Arc::clone(&window),
            read_mode: detection.read_mode,
            escalation: Arc::clone(&escalation),
            events: Arc::clone(&events),
            fall_count: Arc::clone(&fall_count),
            latched: AtomicBool::new(false),
        });
        let posture = Arc::new(PostureLoop {
            session_id: id.clone(),
            window: Arc::clone(&window),
            analyzer: deps.analyzer,
            tracker: Arc::clone(&tracker),
            events: Arc::clone(&events),
            started_at,
            epoch: Instant::now(),
        });

        let tasks = vec![
            runtime.spawn(run_inference(detector, Arc::clone(&wake)).instrument(span.clone())),
            runtime.spawn(run_posture(posture, config.posture.interval()).instrument(span.clone())),
        ];

        events.publish(MonitoringEvent::SessionStarted(SessionPayload {
            session_id: id.clone(),
            timestamp: started_at,
        }));
        info!(
            window_frames = detection.window_frames,
            read_mode = ?detection.read_mode,
            policy = ?detection.verdict_policy,
            "monitoring started"
        );
        drop(_entered);

        Ok(Self {
            id,
            started_at,
            span,
            read_mode: detection.read_mode,
            window,
            fps: FpsMeter::new(),
            escalation,
            tracker,
            events,
            fall_count,
            wake,
            tasks: Mutex::new(tasks),
            ended_at: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_running(&self) -> bool {
        self.ended_at.lock().is_none()
    }

    /// Frame-path entry point. Never blocks on inference.
    pub fn push_frame(&self, frame: &[f32]) -> Result<(), WindowError> {
        if !self.is_running() {
            debug!(session_id = %self.id, "frame ignored after stop");
            return Ok(());
        }
        self.window.add(frame)?;
        self.fps.tick();
        if self.read_mode == ReadMode::Tolerant || self.window.is_ready() {
            self.wake.notify_one();
        }
        Ok(())
    }

    /// Starts the countdown without a detected fall.
    pub fn trigger_manual_alert(&self) -> bool {
        self.span.in_scope(|| {
            info!("manual alert triggered");
            self.escalation.start_from_settings()
        })
    }

    /// The user answered the countdown.
    pub fn cancel_alert(&self) {
        self.span.in_scope(|| self.escalation.cancel());
    }

    pub fn countdown_state(&self) -> CountdownState {
        self.escalation.state()
    }

    pub fn window(&self) -> &KeypointWindow {
        &self.window
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe_global()
    }

    pub fn fall_count(&self) -> u32 {
        self.fall_count.load(Ordering::SeqCst)
    }

    pub fn sample_fps(&self) -> f32 {
        self.fps.sample()
    }

    pub fn posture_summary(&self) -> String {
        self.tracker.lock().summary(Utc::now())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            started_at: self.started_at,
            ended_at: *self.ended_at.lock(),
            fall_count: self.fall_count(),
        }
    }

    /// Stops every worker and resets per-session state. Repeated calls return
    /// the same summary.
    pub fn stop(&self) -> SessionSummary {
        let _entered = self.span.enter();
        {
            let mut ended_at = self.ended_at.lock();
            if ended_at.is_some() {
                debug!("session already stopped");
                drop(ended_at);
                return self.summary();
            }
            *ended_at = Some(Utc::now());
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.escalation.close();
        self.window.clear();
        self.tracker.lock().reset();
        self.fps.reset();

        let summary = self.summary();
        if let Some(ended_at) = summary.ended_at {
            self.events
                .publish(MonitoringEvent::SessionEnded(SessionEndedPayload {
                    session_id: self.id.clone(),
                    started_at: summary.started_at,
                    ended_at,
                    fall_count: summary.fall_count,
                }));
        }
        info!(falls = summary.fall_count, "monitoring stopped");
        summary
    }
}

impl Drop for MonitoringSession {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.escalation.close();
    }
}

impl std::fmt::Debug for MonitoringSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringSession")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("window", &self.window)
            .field("countdown", &self.escalation.state())
            .field("fall_count", &self.fall_count())
            .finish()
    }
}
