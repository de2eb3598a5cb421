//! Inbound event envelope and typed payloads.

use chrono::{DateTime, NaiveDateTime};
use messaging::Job;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Discriminator of an [`EmailEvent`].
///
/// Unknown names decode to [`EventKind::Other`] so new producers can publish
/// event types this worker does not handle yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    AnnouncementCreated,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::AnnouncementCreated => "ANNOUNCEMENT_CREATED",
            EventKind::Other(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        match name {
            "ANNOUNCEMENT_CREATED" => EventKind::AnnouncementCreated,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(EventKind::from(name.as_str()))
    }
}

/// Envelope published by upstream services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailEvent {
    /// Originating system
    #[serde(default)]
    pub service: String,
    /// Absent or `null` is a protocol violation, detected at routing time
    #[serde(rename = "type", default)]
    pub event_type: Option<EventKind>,
    /// Type-specific payload, decoded once the discriminator is known
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, with = "lenient_datetime")]
    pub timestamp: Option<NaiveDateTime>,
}

impl EmailEvent {
    pub fn new(service: impl Into<String>, event_type: EventKind, data: serde_json::Value) -> Self {
        Self {
            service: service.into(),
            event_type: Some(event_type),
            data,
            timestamp: Some(chrono::Local::now().naive_local()),
        }
    }

    /// Envelope carrying an [`AnnouncementCreated`] payload.
    pub fn announcement_created(
        service: impl Into<String>,
        payload: &AnnouncementCreated,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            service,
            EventKind::AnnouncementCreated,
            serde_json::to_value(payload)?,
        ))
    }
}

impl Job for EmailEvent {
    fn job_id(&self) -> String {
        let kind = self
            .event_type
            .as_ref()
            .map(EventKind::as_str)
            .unwrap_or("UNTYPED");
        match self.data.get("id") {
            Some(id) if !id.is_null() => format!("{kind}:{id}"),
            _ => kind.to_string(),
        }
    }
}

/// A new announcement was published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementCreated {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(rename = "type", default)]
    pub category: Option<String>,
    #[serde(rename = "publishedAt", default, with = "lenient_datetime")]
    pub published_at: Option<NaiveDateTime>,
    /// Bearer credential forwarded to the user directory
    pub token: String,
}

/// Serde adapter for optional local date-times.
///
/// Accepts `YYYY-MM-DDTHH:MM:SS[.fff]`, `YYYY-MM-DDTHH:MM` and RFC 3339 with an
/// offset, keeping the wall-clock part. Writes `YYYY-MM-DDTHH:MM:SS`.
pub mod lenient_datetime {
    use super::*;
    use serde::de::Error as _;

    const FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .or_else(|| {
                DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|dt| dt.naive_local())
            })
    }

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_str(&dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid date-time: {raw}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_decode_announcement_envelope() {
        let event: EmailEvent = serde_json::from_value(json!({
            "service": "main-service",
            "type": "ANNOUNCEMENT_CREATED",
            "data": {"id": 7, "title": "Reunião", "token": "abc"},
            "timestamp": "2024-03-15T10:30:00.123"
        }))
        .unwrap();

        assert_eq!(event.event_type, Some(EventKind::AnnouncementCreated));
        assert_eq!(event.service, "main-service");
        assert_eq!(event.job_id(), "ANNOUNCEMENT_CREATED:7");
        assert!(event.timestamp.is_some());
    }

    #[test]
    fn test_unknown_type_is_other() {
        let event: EmailEvent =
            serde_json::from_value(json!({"service": "x", "type": "ORDER_SHIPPED", "data": {}}))
                .unwrap();

        assert_eq!(event.event_type, Some(EventKind::Other("ORDER_SHIPPED".to_string())));
        assert_eq!(event.job_id(), "ORDER_SHIPPED");
    }

    #[test]
    fn test_null_or_missing_type_is_none() {
        let null: EmailEvent =
            serde_json::from_value(json!({"service": "x", "type": null, "data": {}})).unwrap();
        let missing: EmailEvent = serde_json::from_value(json!({"service": "x"})).unwrap();

        assert_eq!(null.event_type, None);
        assert_eq!(missing.event_type, None);
        assert_eq!(missing.job_id(), "UNTYPED");
    }

    #[test]
    fn test_payload_wire_names() {
        let payload: AnnouncementCreated = serde_json::from_value(json!({
            "id": 1,
            "title": null,
            "type": "AVISO",
            "publishedAt": "2024-03-15T10:30",
            "token": "t"
        }))
        .unwrap();

        assert_eq!(payload.title, None);
        assert_eq!(payload.content, None);
        assert_eq!(payload.category.as_deref(), Some("AVISO"));
        assert_eq!(payload.published_at, Some(at(10, 30, 0)));
    }

    #[test]
    fn test_lenient_datetime_formats() {
        assert_eq!(lenient_datetime::parse("2024-03-15T10:30:00"), Some(at(10, 30, 0)));
        assert_eq!(lenient_datetime::parse("2024-03-15T10:30"), Some(at(10, 30, 0)));
        assert_eq!(
            lenient_datetime::parse("2024-03-15T10:30:00-03:00"),
            Some(at(10, 30, 0))
        );
        assert_eq!(lenient_datetime::parse("15/03/2024"), None);
    }

    #[test]
    fn test_invalid_datetime_is_decode_error() {
        let result = serde_json::from_value::<AnnouncementCreated>(json!({
            "id": 1, "publishedAt": "yesterday", "token": "t"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_envelope_round_trips_announcement() {
        let payload = AnnouncementCreated {
            id: 3,
            title: Some("Manutenção".to_string()),
            content: None,
            category: None,
            published_at: Some(at(8, 0, 0)),
            token: "abc".to_string(),
        };

        let event = EmailEvent::announcement_created("main-service", &payload).unwrap();
        let wire = serde_json::to_value(&event).unwrap();

        assert_eq!(wire["type"], "ANNOUNCEMENT_CREATED");
        assert_eq!(wire["data"]["publishedAt"], "2024-03-15T08:00:00");

        let decoded: AnnouncementCreated = serde_json::from_value(event.data).unwrap();
        assert_eq!(decoded, payload);
    }
}
