mod event_bus;

pub use event_bus::{
    AlertComposedPayload, AlertSkippedPayload, CountdownTickPayload, EventBus, EventBusStats,
    EventEnvelope, FallDetectedPayload, MonitoringEvent, SessionEndedPayload, SessionPayload,
    SustainedPosturePayload,
};
