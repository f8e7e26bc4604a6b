use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const MAX_CONTACTS: usize = 3;
pub const MIN_TIMER_SECS: u32 = 10;
pub const MAX_TIMER_SECS: u32 = 30;
pub const DEFAULT_TIMER_SECS: u32 = 15;
pub const DEFAULT_USER_NAME: &str = "User";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub name: String,
    pub phone: String,
}

impl EmergencyContact {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlertSettings {
    pub sms_enabled: bool,
    pub gps_enabled: bool,
    pub timer_duration_secs: u32,
    pub contacts: Vec<EmergencyContact>,
    pub user_name: String,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            sms_enabled: true,
            gps_enabled: true,
            timer_duration_secs: DEFAULT_TIMER_SECS,
            contacts: Vec::new(),
            user_name: DEFAULT_USER_NAME.to_string(),
        }
    }
}

impl AlertSettings {
    /// Clamps the timer into range and drops contacts past the cap.
    pub fn normalized(mut self) -> Self {
        let clamped = self.timer_duration_secs.clamp(MIN_TIMER_SECS, MAX_TIMER_SECS);
        if clamped != self.timer_duration_secs {
            debug!(
                requested = self.timer_duration_secs,
                clamped, "countdown duration clamped"
            );
            self.timer_duration_secs = clamped;
        }
        if self.contacts.len() > MAX_CONTACTS {
            warn!(
                configured = self.contacts.len(),
                max = MAX_CONTACTS,
                "too many emergency contacts, extra entries ignored"
            );
            self.contacts.truncate(MAX_CONTACTS);
        }
        if self.user_name.trim().is_empty() {
            self.user_name = DEFAULT_USER_NAME.to_string();
        }
        self
    }

    /// Returns false when the contact list is already full.
    pub fn add_contact(&mut self, contact: EmergencyContact) -> bool {
        if self.contacts.len() >= MAX_CONTACTS {
            return false;
        }
        self.contacts.push(contact);
        true
    }

    pub fn remove_contact(&mut self, index: usize) -> Option<EmergencyContact> {
        (index < self.contacts.len()).then(|| self.contacts.remove(index))
    }

    pub fn recipients(&self) -> Vec<&str> {
        self.contacts
            .iter()
            .map(|c| c.phone.trim())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

/// Read-only view of the user's alert settings.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> AlertSettings;
}

#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub AlertSettings);

impl SettingsStore for StaticSettings {
    fn load(&self) -> AlertSettings {
        self.0.clone().normalized()
    }
}

/// Settings backed by a JSON file, re-read on every load so edits made by the
/// surrounding application are picked up by the next escalation.
#[derive(Debug, Clone)]
pub struct JsonFileSettings {
    path: PathBuf,
}

impl JsonFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn try_load(&self) -> Result<Option<AlertSettings>, ConfigError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let settings: AlertSettings =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(settings.normalized()))
    }

    pub fn save(&self, settings: &AlertSettings) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(settings).map_err(|source| ConfigError::Json {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, json).map_err(io_err)
    }
}

impl SettingsStore for JsonFileSettings {
    fn load(&self) -> AlertSettings {
        match self.try_load() {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                debug!(path = %self.path.display(), "no settings file, using defaults");
                AlertSettings::default()
            }
            Err(err) => {
                warn!(error = %err, "failed to load alert settings, using defaults");
                AlertSettings::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_first_run() {
        let settings = AlertSettings::default();
        assert!(settings.sms_enabled);
        assert!(settings.gps_enabled);
        assert_eq!(settings.timer_duration_secs, 15);
        assert!(settings.contacts.is_empty());
    }

    #[test]
    fn normalized_clamps_timer_and_contacts() {
        let settings = AlertSettings {
            timer_duration_secs: 3,
            contacts: (0..5)
                .map(|i| EmergencyContact::new(format!("c{i}"), format!("555-000{i}")))
                .collect(),
            ..AlertSettings::default()
        }
        .normalized();
        assert_eq!(settings.timer_duration_secs, 10);
        assert_eq!(settings.contacts.len(), 3);

        let long = AlertSettings {
            timer_duration_secs: 120,
            ..AlertSettings::default()
        }
        .normalized();
        assert_eq!(long.timer_duration_secs, 30);
    }

    #[test]
    fn add_contact_respects_cap() {
        let mut settings = AlertSettings::default();
        for i in 0..3 {
            assert!(settings.add_contact(EmergencyContact::new("a", format!("{i}"))));
        }
        assert!(!settings.add_contact(EmergencyContact::new("d", "4")));
        assert_eq!(settings.contacts.len(), 3);
        assert_eq!(settings.remove_contact(0).map(|c| c.phone), Some("0".into()));
        assert!(settings.remove_contact(7).is_none());
    }

    #[test]
    fn recipients_skip_blank_numbers() {
        let settings = AlertSettings {
            contacts: vec![
                EmergencyContact::new("Ann", " 555-1 "),
                EmergencyContact::new("Bob", ""),
            ],
            ..AlertSettings::default()
        };
        assert_eq!(settings.recipients(), vec!["555-1"]);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: AlertSettings = serde_json::from_str(r#"{"smsEnabled": false}"#).unwrap();
        assert!(!settings.sms_enabled);
        assert!(settings.gps_enabled);
        assert_eq!(settings.user_name, "User");
    }
}
