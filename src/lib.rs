pub mod config;
pub mod core;
pub mod detection;
pub mod emergency;
pub mod fps;
pub mod logging;
pub mod posture;
pub mod session;
pub mod simulation;

pub use config::Config;
pub use session::{MonitoringSession, SessionDeps, SessionError, SessionSummary};
