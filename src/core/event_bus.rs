use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum MonitoringEvent {
    #[serde(rename = "SESSION_STARTED")]
    SessionStarted(SessionPayload),

    #[serde(rename = "FALL_DETECTED")]
    FallDetected(FallDetectedPayload),

    #[serde(rename = "SUSTAINED_BAD_POSTURE")]
    SustainedBadPosture(SustainedPosturePayload),

    #[serde(rename = "COUNTDOWN_TICK")]
    CountdownTick(CountdownTickPayload),

    #[serde(rename = "COUNTDOWN_TIMEOUT")]
    CountdownTimeout(SessionPayload),

    #[serde(rename = "COUNTDOWN_CANCELLED")]
    CountdownCancelled(SessionPayload),

    #[serde(rename = "ALERT_COMPOSED")]
    AlertComposed(AlertComposedPayload),

    #[serde(rename = "ALERT_SKIPPED")]
    AlertSkipped(AlertSkippedPayload),

    #[serde(rename = "SESSION_ENDED")]
    SessionEnded(SessionEndedPayload),
}

impl MonitoringEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            MonitoringEvent::SessionStarted(_) => "SESSION_STARTED",
            MonitoringEvent::FallDetected(_) => "FALL_DETECTED",
            MonitoringEvent::SustainedBadPosture(_) => "SUSTAINED_BAD_POSTURE",
            MonitoringEvent::CountdownTick(_) => "COUNTDOWN_TICK",
            MonitoringEvent::CountdownTimeout(_) => "COUNTDOWN_TIMEOUT",
            MonitoringEvent::CountdownCancelled(_) => "COUNTDOWN_CANCELLED",
            MonitoringEvent::AlertComposed(_) => "ALERT_COMPOSED",
            MonitoringEvent::AlertSkipped(_) => "ALERT_SKIPPED",
            MonitoringEvent::SessionEnded(_) => "SESSION_ENDED",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            MonitoringEvent::SessionStarted(p) => &p.session_id,
            MonitoringEvent::FallDetected(p) => &p.session_id,
            MonitoringEvent::SustainedBadPosture(p) => &p.session_id,
            MonitoringEvent::CountdownTick(p) => &p.session_id,
            MonitoringEvent::CountdownTimeout(p) => &p.session_id,
            MonitoringEvent::CountdownCancelled(p) => &p.session_id,
            MonitoringEvent::AlertComposed(p) => &p.session_id,
            MonitoringEvent::AlertSkipped(p) => &p.session_id,
            MonitoringEvent::SessionEnded(p) => &p.session_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionPayload {
    pub fn now(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallDetectedPayload {
    pub session_id: String,
    pub model_probability: f32,
    pub rule_score: f32,
    pub fused_probability: f32,
    pub classifier_alarm: bool,
    pub fusion_alarm: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SustainedPosturePayload {
    pub session_id: String,
    pub score: u8,
    pub status: String,
    pub duration_secs: u64,
    pub issues: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownTickPayload {
    pub session_id: String,
    pub remaining: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertComposedPayload {
    pub session_id: String,
    pub recipients: Vec<String>,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSkippedPayload {
    pub session_id: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndedPayload {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub fall_count: u32,
}

#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub id: String,
    pub event: MonitoringEvent,
    pub created_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: MonitoringEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event,
            created_at: Utc::now(),
        }
    }
}

type SubscriberId = String;

struct Subscriber {
    session_id: Option<String>,
    event_types: Option<Vec<String>>,
    sender: broadcast::Sender<EventEnvelope>,
}

impl Subscriber {
    fn matches(&self, envelope: &EventEnvelope) -> bool {
        if let Some(ref session_id) = self.session_id {
            if envelope.event.session_id() != session_id {
                return false;
            }
        }

        if let Some(ref event_types) = self.event_types {
            if !event_types.iter().any(|t| t == envelope.event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Fan-out of session events. Publishing never blocks and never fails when
/// nobody is listening.
pub struct EventBus {
    global_sender: broadcast::Sender<EventEnvelope>,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    event_count: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (global_sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            global_sender,
            subscribers: RwLock::new(HashMap::new()),
            event_count: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MonitoringEvent) {
        let envelope = EventEnvelope::new(event);
        self.event_count.fetch_add(1, Ordering::Relaxed);

        let mut sent_count = 0usize;
        let mut stale = Vec::new();
        for (id, subscriber) in self.subscribers.read().iter() {
            if subscriber.sender.receiver_count() == 0 {
                stale.push(id.clone());
            } else if subscriber.matches(&envelope)
                && subscriber.sender.send(envelope.clone()).is_ok()
            {
                sent_count += 1;
            }
        }
        if !stale.is_empty() {
            self.prune(&stale);
        }

        let event_type = envelope.event.event_type();
        if self.global_sender.send(envelope).is_err() {
            debug!(event_type, "No global subscribers for event");
        }

        debug!(event_type, sent_to = sent_count, "Event published");
    }

    /// Drops filtered subscriptions whose receivers are gone.
    fn prune(&self, ids: &[SubscriberId]) {
        let mut subscribers = self.subscribers.write();
        for id in ids {
            let dropped = subscribers
                .get(id)
                .is_some_and(|s| s.sender.receiver_count() == 0);
            if dropped {
                subscribers.remove(id);
                debug!(subscriber_id = %id, "Dropped subscription pruned");
            }
        }
    }

    pub fn subscribe_global(&self) -> broadcast::Receiver<EventEnvelope> {
        self.global_sender.subscribe()
    }

    pub fn subscribe_filtered(
        &self,
        session_id: Option<String>,
        event_types: Option<Vec<String>>,
    ) -> (SubscriberId, broadcast::Receiver<EventEnvelope>) {
        let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
        let subscriber_id = uuid::Uuid::new_v4().to_string();

        self.subscribers.write().insert(
            subscriber_id.clone(),
            Subscriber {
                session_id,
                event_types,
                sender,
            },
        );

        debug!(subscriber_id = %subscriber_id, "New filtered subscription created");

        (subscriber_id, receiver)
    }

    pub fn unsubscribe(&self, subscriber_id: &str) {
        if self.subscribers.write().remove(subscriber_id).is_some() {
            debug!(subscriber_id = %subscriber_id, "Subscription removed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len() + self.global_sender.receiver_count()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            total_events: self.event_count(),
            subscriber_count: self.subscriber_count(),
            global_subscribers: self.global_sender.receiver_count(),
            filtered_subscribers: self.subscribers.read().len(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventBusStats {
    pub total_events: u64,
    pub subscriber_count: usize,
    pub global_subscribers: usize,
    pub filtered_subscribers: usize,
}
