mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;

use fall_sentinel::config::Config;
use fall_sentinel::core::{EventEnvelope, MonitoringEvent};
use fall_sentinel::detection::{
    ClassifierAdapter, FallPipeline, FallVerdictPolicy, KeypointWindow, ProbabilityFusion,
    RuleScorer, SequenceClassifier, StillnessVerticalityScorer, WindowTensor,
};
use fall_sentinel::emergency::{CountdownState, StaticSettings};
use fall_sentinel::session::{MonitoringSession, SessionDeps};
use fall_sentinel::simulation::{
    fall_sequence, ground_frame, normal_sequence, slouched_frame, standing_frame,
    DescentClassifier,
};

use common::{
    home, settings_with_contacts, FailingClassifier, Fakes, FixedClassifier, FixedRule,
    ScriptedLocation,
};

fn filled(frames: impl IntoIterator<Item = Vec<f32>>) -> WindowTensor {
    let window = KeypointWindow::default();
    for frame in frames {
        window.add(&frame).unwrap();
    }
    window.to_tensor_strict().unwrap()
}

fn pipeline(
    classifier: impl SequenceClassifier + 'static,
    rules: impl RuleScorer + 'static,
    fusion: ProbabilityFusion,
    policy: FallVerdictPolicy,
) -> FallPipeline {
    FallPipeline::new(
        ClassifierAdapter::new(Arc::new(classifier)),
        Arc::new(rules),
        fusion,
        policy,
    )
}

async fn next_event(
    receiver: &mut broadcast::Receiver<EventEnvelope>,
    wait: Duration,
) -> Option<MonitoringEvent> {
    tokio::time::timeout(wait, receiver.recv())
        .await
        .ok()
        .and_then(|r| r.ok())
        .map(|envelope| envelope.event)
}

#[test]
fn standing_window_with_low_probability_is_not_a_fall() {
    let window = filled((0..30).map(|_| standing_frame(0.0)));
    let verdict = pipeline(
        FixedClassifier(0.05),
        StillnessVerticalityScorer,
        ProbabilityFusion::default(),
        FallVerdictPolicy::Either,
    )
    .evaluate(&window);

    assert!((0.1..=0.3).contains(&verdict.rule_score), "rule {}", verdict.rule_score);
    let expected = 0.05 * 0.7 + verdict.rule_score * 0.3;
    assert!((verdict.fusion.final_probability - expected).abs() < 1e-5);
    assert!(verdict.fusion.final_probability < 0.5);
    assert!(!verdict.fusion.is_fall);
    assert!(!verdict.classifier.is_fall);
    assert!(!verdict.escalate);
}

#[test]
fn ground_window_with_high_probability_is_a_fall() {
    let frames = (0..30)
        .map(|_| standing_frame(0.0))
        .chain((0..30).map(|_| ground_frame(0.0)));
    let window = filled(frames);
    let verdict = pipeline(
        FixedClassifier(0.95),
        StillnessVerticalityScorer,
        ProbabilityFusion::default(),
        FallVerdictPolicy::Either,
    )
    .evaluate(&window);

    assert!(verdict.fusion.final_probability > 0.85, "{}", verdict.fusion.final_probability);
    assert!(verdict.fusion.is_fall);
    assert!(verdict.classifier.is_fall);
    assert!(verdict.escalate);
}

#[test]
fn classifier_path_escalates_alone_when_selected() {
    let window = filled((0..30).map(|_| standing_frame(0.0)));
    let fusion = ProbabilityFusion::new(0.5, 0.5, 0.5).unwrap();

    let evaluate = |policy| {
        pipeline(FixedClassifier(0.9), FixedRule(0.0), fusion, policy).evaluate(&window)
    };

    let verdict = evaluate(FallVerdictPolicy::Classifier);
    assert!(verdict.classifier.is_fall);
    assert!(!verdict.fusion.is_fall);
    assert!(verdict.escalate);

    assert!(!evaluate(FallVerdictPolicy::Fusion).escalate);
    assert!(evaluate(FallVerdictPolicy::Either).escalate);
}

#[test]
fn fusion_path_escalates_alone_when_selected() {
    let window = filled((0..30).map(|_| standing_frame(0.0)));

    let evaluate = |policy| {
        pipeline(
            FixedClassifier(0.6),
            FixedRule(0.9),
            ProbabilityFusion::default(),
            policy,
        )
        .evaluate(&window)
    };

    let verdict = evaluate(FallVerdictPolicy::Fusion);
    assert!(verdict.fusion.is_fall);
    assert!(!verdict.classifier.is_fall);
    assert!(verdict.escalate);

    assert!(!evaluate(FallVerdictPolicy::Classifier).escalate);
    assert!(evaluate(FallVerdictPolicy::Either).escalate);
}

#[test]
fn classifier_threshold_is_strict() {
    let window = filled((0..30).map(|_| standing_frame(0.0)));
    let verdict = pipeline(
        FixedClassifier(0.85),
        FixedRule(0.0),
        ProbabilityFusion::default(),
        FallVerdictPolicy::Classifier,
    )
    .evaluate(&window);
    assert!(!verdict.classifier.is_fall);
    assert!(!verdict.escalate);
}

#[test]
fn failed_inference_falls_back_to_low_probability() {
    let window = filled((0..30).map(|_| ground_frame(0.0)));
    let verdict = pipeline(
        FailingClassifier,
        FixedRule(0.2),
        ProbabilityFusion::default(),
        FallVerdictPolicy::Either,
    )
    .evaluate(&window);
    assert_eq!(verdict.classifier.probability, 0.01);
    assert!(!verdict.escalate);
}

fn session_deps(fakes: &Fakes, contacts: usize) -> SessionDeps {
    SessionDeps::new(
        Arc::new(DescentClassifier),
        Arc::new(StaticSettings(settings_with_contacts(contacts))),
    )
    .with_services(fakes.services())
    .with_observer(fakes.observer.clone())
}

#[tokio::test]
async fn detected_fall_starts_countdown_once() {
    let fakes = Fakes::new(ScriptedLocation::ok(home()));
    let session = MonitoringSession::start(&Config::default(), session_deps(&fakes, 1)).unwrap();
    let (_, mut falls) = session
        .events()
        .subscribe_filtered(None, Some(vec!["FALL_DETECTED".to_string()]));
    let mut rng = StdRng::seed_from_u64(3);

    for frame in normal_sequence(30, &mut rng) {
        session.push_frame(&frame).unwrap();
    }
    assert!(next_event(&mut falls, Duration::from_millis(300)).await.is_none());
    assert_eq!(session.countdown_state(), CountdownState::Idle);

    for frame in fall_sequence(30, &mut rng) {
        session.push_frame(&frame).unwrap();
    }
    let event = next_event(&mut falls, Duration::from_secs(2)).await;
    match event {
        Some(MonitoringEvent::FallDetected(payload)) => {
            assert_eq!(payload.session_id, session.id());
            assert!(payload.classifier_alarm);
            assert!(payload.fused_probability > 0.85);
        }
        other => panic!("expected a fall event, got {other:?}"),
    }
    assert!(session.countdown_state().is_running());

    // the same fall keeps showing up in later windows but is reported once
    for _ in 0..10 {
        session.push_frame(&ground_frame(0.0)).unwrap();
    }
    assert!(next_event(&mut falls, Duration::from_millis(300)).await.is_none());
    assert_eq!(session.fall_count(), 1);

    session.cancel_alert();
    assert_eq!(session.countdown_state(), CountdownState::Cancelled);
    assert_eq!(fakes.observer.cancels.load(Ordering::SeqCst), 1);

    let summary = session.stop();
    assert_eq!(summary.fall_count, 1);
    assert!(summary.has_falls());
    assert!(fakes.drafts().is_empty());
}

#[tokio::test]
async fn manual_alert_publishes_countdown_events() {
    let fakes = Fakes::new(ScriptedLocation::ok(home()));
    let session = MonitoringSession::start(&Config::default(), session_deps(&fakes, 1)).unwrap();
    let mut events = session.subscribe();

    assert!(session.trigger_manual_alert());
    assert!(!session.trigger_manual_alert());
    assert_eq!(session.countdown_state(), CountdownState::Running(15));

    let tick = loop {
        match next_event(&mut events, Duration::from_secs(3)).await {
            Some(MonitoringEvent::CountdownTick(payload)) => break payload,
            Some(_) => continue,
            None => panic!("no countdown tick"),
        }
    };
    assert_eq!(tick.remaining, 14);

    session.stop();
    assert_eq!(session.countdown_state(), CountdownState::Idle);
    assert_eq!(session.fall_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn sustained_bad_posture_is_reported_from_the_latest_frame() {
    let fakes = Fakes::new(ScriptedLocation::ok(home()));
    let mut config = Config::default();
    config.posture.sustained_duration_secs = 15;

    let session = MonitoringSession::start(&config, session_deps(&fakes, 1)).unwrap();
    let (_, mut postures) = session
        .events()
        .subscribe_filtered(None, Some(vec!["SUSTAINED_BAD_POSTURE".to_string()]));

    session.push_frame(&slouched_frame()).unwrap();

    tokio::time::sleep(Duration::from_millis(14_500)).await;
    assert!(postures.try_recv().is_err());

    tokio::time::sleep(Duration::from_secs(1)).await;
    match postures.try_recv().map(|envelope| envelope.event) {
        Ok(MonitoringEvent::SustainedBadPosture(payload)) => {
            assert!(payload.score < 70);
            assert_eq!(payload.duration_secs, 15);
            assert_eq!(payload.issues.last().map(String::as_str), Some("Sustained for 15s"));
        }
        other => panic!("expected sustained posture, got {other:?}"),
    }

    session.stop();
    assert!(session.posture_summary().starts_with("Status: none"));
}
