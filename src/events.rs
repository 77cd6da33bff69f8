//! Core event types for the agent's monitoring core
//!
//! This module defines the event envelope that flows through the dispatcher
//! and the raw line format produced by event-source adapters.

use crate::error::EventError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Free-form event payload
pub type EventData = serde_json::Map<String, serde_json::Value>;

/// Type of an event, used for handler routing
///
/// The well-known types get their own variants; anything else a producer
/// emits is carried verbatim in [`EventType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Log,
    Config,
    Error,
    Status,
    Health,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Log => "log",
            EventType::Config => "config",
            EventType::Error => "error",
            EventType::Status => "status",
            EventType::Health => "health",
            EventType::Other(name) => name,
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value {
            "log" => EventType::Log,
            "config" => EventType::Config,
            "error" => EventType::Error,
            "status" => EventType::Status,
            "health" => EventType::Health,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        EventType::from(value.as_str())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event envelope fanned out by the dispatcher
///
/// `timestamp` and `id` are optional on the producer side; the dispatcher
/// fills them in when the event is accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub data: EventData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Event {
    pub fn new(event_type: impl Into<EventType>, data: EventData) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: None,
            source: String::new(),
            id: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Fill in a missing timestamp and id
    ///
    /// Generated ids have the form `<type>-<unix nanos>`.
    pub fn fill_defaults(&mut self, now: Timestamp) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
        }
        if self.id.as_deref().map_or(true, str::is_empty) {
            self.id = Some(generate_event_id(&self.event_type, now));
        }
    }

    /// Convert a raw adapter line into an event attributed to `source`
    ///
    /// An absent or unparsable RFC 3339 timestamp falls back to `now`.
    pub fn from_raw(raw: RawEvent, source: impl Into<String>, now: Timestamp) -> Self {
        let timestamp = raw
            .timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or(now);

        let event_type = EventType::from(raw.event_type);
        let id = generate_event_id(&event_type, now);
        Self {
            event_type,
            data: raw.data,
            timestamp: Some(timestamp),
            source: source.into(),
            id: Some(id),
        }
    }

    /// String field from the payload, if present
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

fn generate_event_id(event_type: &EventType, now: Timestamp) -> String {
    format!(
        "{}-{}",
        event_type,
        now.timestamp_nanos_opt().unwrap_or_default()
    )
}

/// One JSON line emitted by a supervised subprocess
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: EventData,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl RawEvent {
    pub fn parse_line(line: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn data(value: serde_json::Value) -> EventData {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_event_type_serialization() {
        assert_eq!(serde_json::to_string(&EventType::Log).unwrap(), "\"log\"");
        assert_eq!(
            serde_json::to_string(&EventType::Health).unwrap(),
            "\"health\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::Other("metrics".to_string())).unwrap(),
            "\"metrics\""
        );

        let parsed: EventType = serde_json::from_str("\"status\"").unwrap();
        assert_eq!(parsed, EventType::Status);
        let parsed: EventType = serde_json::from_str("\"restart\"").unwrap();
        assert_eq!(parsed, EventType::Other("restart".to_string()));
    }

    #[test]
    fn test_fill_defaults_generates_type_prefixed_id() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut event = Event::new(EventType::Config, EventData::new());
        event.fill_defaults(now);

        assert_eq!(event.timestamp, Some(now));
        let expected = format!("config-{}", now.timestamp_nanos_opt().unwrap());
        assert_eq!(event.id.as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn test_fill_defaults_keeps_producer_values() {
        let now = Utc::now();
        let produced_at = now - chrono::Duration::seconds(5);
        let mut event = Event::new(EventType::Log, EventData::new())
            .with_id("abc")
            .with_timestamp(produced_at);
        event.fill_defaults(now);

        assert_eq!(event.id.as_deref(), Some("abc"));
        assert_eq!(event.timestamp, Some(produced_at));
    }

    #[test]
    fn test_raw_event_conversion() {
        let line = r#"{"type":"log","data":{"level":"info","message":"started"},"timestamp":"2024-05-01T10:00:00Z","version":"1"}"#;
        let raw = RawEvent::parse_line(line).unwrap();
        assert_eq!(raw.version.as_deref(), Some("1"));

        let now = Utc::now();
        let event = Event::from_raw(raw, "sboxctl", now);
        assert_eq!(event.event_type, EventType::Log);
        assert_eq!(event.source, "sboxctl");
        assert_eq!(event.data_str("message"), Some("started"));
        assert_eq!(
            event.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
        assert!(event.id.unwrap().starts_with("log-"));
    }

    #[test]
    fn test_raw_event_bad_timestamp_falls_back_to_now() {
        let raw = RawEvent {
            event_type: "status".to_string(),
            data: data(json!({"state": "up"})),
            timestamp: Some("yesterday".to_string()),
            version: None,
        };
        let now = Utc::now();
        let event = Event::from_raw(raw, "sboxctl", now);
        assert_eq!(event.timestamp, Some(now));
    }

    #[test]
    fn test_raw_event_rejects_garbage() {
        assert!(RawEvent::parse_line("not json").is_err());
        assert!(RawEvent::parse_line(r#"{"data":{}}"#).is_err());
    }
}
