use std::fmt::Display;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use super::services::LocationError;

pub const ALERT_PREAMBLE: &str = "ALERT: Possible fall detected for";
pub const REPLY_INSTRUCTION: &str = "If you reach them, reply OK.";
pub const LOCATION_DISABLED: &str = "location disabled";
pub const LOCATION_PERMISSION_MISSING: &str = "unknown (GPS permission missing)";
pub const LOCATION_UNKNOWN: &str = "unknown";
const MAP_BASE_URL: &str = "https://maps.google.com/?q=";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: f32,
}

impl Location {
    pub fn describe(&self) -> String {
        format!(
            "{:.4}, {:.4} (±{} m)",
            self.latitude,
            self.longitude,
            self.accuracy_m.round() as i64
        )
    }

    pub fn map_link(&self) -> String {
        format!("{MAP_BASE_URL}{},{}", self.latitude, self.longitude)
    }
}

/// What the location line of an alert ended up containing.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationField {
    Known(Location),
    Disabled,
    PermissionMissing,
    Unknown,
}

impl LocationField {
    pub fn from_lookup(result: Result<Option<Location>, LocationError>) -> Self {
        match result {
            Ok(Some(location)) => Self::Known(location),
            Err(LocationError::PermissionDenied) => Self::PermissionMissing,
            Ok(None) | Err(_) => Self::Unknown,
        }
    }

    pub fn text(&self) -> String {
        match self {
            Self::Known(location) => location.describe(),
            Self::Disabled => LOCATION_DISABLED.to_string(),
            Self::PermissionMissing => LOCATION_PERMISSION_MISSING.to_string(),
            Self::Unknown => LOCATION_UNKNOWN.to_string(),
        }
    }

    pub fn map_link(&self) -> Option<String> {
        match self {
            Self::Known(location) => Some(location.map_link()),
            _ => None,
        }
    }
}

/// A multi-recipient message ready for the user to confirm and send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertDraft {
    pub recipients: Vec<String>,
    pub body: String,
}

impl AlertDraft {
    pub fn recipient_list(&self) -> String {
        self.recipients.join(";")
    }

    pub fn sms_uri(&self) -> String {
        format!(
            "smsto:{}?body={}",
            self.recipient_list(),
            urlencoding::encode(&self.body)
        )
    }
}

pub fn alert_body<Tz>(user_name: &str, at: &DateTime<Tz>, location: &LocationField) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut body = format!(
        "{ALERT_PREAMBLE} {user_name} at {}.\nLocation: {}\n",
        at.format("%-I:%M %p"),
        location.text()
    );
    if let Some(link) = location.map_link() {
        body.push_str(&format!("Map: {link}\n"));
    }
    body.push_str(REPLY_INSTRUCTION);
    body
}

pub fn compose_draft<Tz>(
    recipients: Vec<String>,
    user_name: &str,
    at: &DateTime<Tz>,
    location: &LocationField,
) -> AlertDraft
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    AlertDraft {
        recipients,
        body: alert_body(user_name, at, location),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn afternoon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap()
    }

    #[test]
    fn body_with_location_has_map_link() {
        let location = LocationField::Known(Location {
            latitude: 37.422_09,
            longitude: -122.084_12,
            accuracy_m: 12.4,
        });
        let body = alert_body("Grace", &afternoon(), &location);
        assert_eq!(
            body,
            "ALERT: Possible fall detected for Grace at 2:05 PM.\n\
             Location: 37.4221, -122.0841 (±12 m)\n\
             Map: https://maps.google.com/?q=37.42209,-122.08412\n\
             If you reach them, reply OK."
        );
    }

    #[test]
    fn placeholders_replace_location() {
        let body = alert_body("User", &afternoon(), &LocationField::Disabled);
        assert!(body.contains("Location: location disabled\n"));
        assert!(!body.contains("Map:"));

        let missing = LocationField::from_lookup(Err(LocationError::PermissionDenied));
        assert_eq!(missing.text(), "unknown (GPS permission missing)");
        assert_eq!(LocationField::from_lookup(Ok(None)).text(), "unknown");
        assert_eq!(
            LocationField::from_lookup(Err(LocationError::TimedOut)).text(),
            "unknown"
        );
    }

    #[test]
    fn sms_uri_joins_recipients() {
        let draft = compose_draft(
            vec!["555-1".into(), "555-2".into()],
            "User",
            &afternoon(),
            &LocationField::Unknown,
        );
        let uri = draft.sms_uri();
        assert!(uri.starts_with("smsto:555-1;555-2?body=ALERT%3A%20Possible"));
        assert!(!uri.contains('\n'));
    }
}
