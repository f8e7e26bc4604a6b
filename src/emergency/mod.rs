pub mod countdown;
pub mod message;
pub mod services;
pub mod settings;

pub use countdown::{
    ComposeOutcome, CountdownObserver, CountdownState, EmergencyEscalation, EscalationConfig,
    EscalationServices, NoopObserver, SkipReason,
};
pub use message::{AlertDraft, Location, LocationField};
pub use services::{
    FixedLocation, HapticPattern, Haptics, LocationError, LocationProvider, LoggingComposer,
    LoggingHaptics, LoggingSpeech, MessageComposer, QueueMode, ServiceError, SpeechEngine,
};
pub use settings::{
    AlertSettings, ConfigError, EmergencyContact, JsonFileSettings, SettingsStore, StaticSettings,
    MAX_CONTACTS,
};
