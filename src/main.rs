use std::sync::Arc;
use std::time::Duration;

use fall_sentinel::config::Config;
use fall_sentinel::emergency::{JsonFileSettings, SettingsStore};
use fall_sentinel::logging;
use fall_sentinel::posture::{LlmPostureService, PostureAnalyzer};
use fall_sentinel::session::{MonitoringSession, SessionDeps};
use fall_sentinel::simulation::{fall_sequence, normal_sequence, DescentClassifier};

const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const REPLAY_FRAMES: usize = 90;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log_level);

    let settings = Arc::new(JsonFileSettings::new(&config.settings_path));
    let countdown_secs = settings.load().timer_duration_secs;

    let analyzer = if config.llm.is_available() {
        PostureAnalyzer::new(Some(Arc::new(LlmPostureService::new(config.llm.clone()))))
    } else {
        tracing::info!("LLM posture service not configured, using fallback scoring");
        PostureAnalyzer::offline()
    };

    let deps = SessionDeps::new(Arc::new(DescentClassifier), settings).with_analyzer(analyzer);
    let session = match MonitoringSession::start(&config, deps) {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(error = %err, "failed to start monitoring");
            return;
        }
    };

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(envelope) = events.recv().await {
            match serde_json::to_string(&envelope.event) {
                Ok(json) => tracing::info!(event = %json, "session event"),
                Err(err) => tracing::warn!(error = %err, "failed to encode event"),
            }
        }
    });

    tokio::select! {
        _ = replay(&session, countdown_secs) => {},
        _ = shutdown_signal() => tracing::info!("interrupted"),
    }

    let summary = session.stop();
    tracing::info!(
        session_id = %summary.id,
        falls = summary.fall_count,
        duration_secs = summary.duration().map(|d| d.num_seconds()).unwrap_or_default(),
        "session summary"
    );
    printer.abort();
}

async fn replay(session: &MonitoringSession, countdown_secs: u32) {
    let mut rng = rand::rng();
    let mut ticker = tokio::time::interval(FRAME_INTERVAL);

    tracing::info!("replaying normal activity");
    for frame in normal_sequence(REPLAY_FRAMES, &mut rng) {
        ticker.tick().await;
        if let Err(err) = session.push_frame(&frame) {
            tracing::warn!(error = %err, "frame rejected");
        }
    }
    tracing::info!(fps = session.sample_fps(), "normal replay finished");

    tracing::info!("replaying a fall");
    for frame in fall_sequence(REPLAY_FRAMES, &mut rng) {
        ticker.tick().await;
        if let Err(err) = session.push_frame(&frame) {
            tracing::warn!(error = %err, "frame rejected");
        }
    }
    tracing::info!(fps = session.sample_fps(), "fall replay finished");

    // let the countdown run out and the alert draft get composed
    tokio::time::sleep(Duration::from_secs(u64::from(countdown_secs) + 2)).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
