//! Structured events and their activity classification.

use serde::{Deserialize, Serialize};

use crate::defaults::{ACTIVITY_EVENT_KIND, QUIET_EVENT_KINDS};
use crate::error::DecodeError;
use crate::sse::SseRecord;

/// A decoded event from the instance's stream. Consumed once, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// String tag, taken from the payload's `type` field.
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Event {
    /// Build an event from a dispatched record.
    ///
    /// The kind comes from the JSON payload's `"type"` string and falls back
    /// to the record's `event:` field. Non-JSON data, or a record with
    /// neither, is malformed.
    pub fn from_record(record: &SseRecord) -> Result<Self, DecodeError> {
        let payload: serde_json::Value = serde_json::from_str(&record.data)
            .map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

        let kind = payload
            .get("type")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .or_else(|| record.event.clone().filter(|e| !e.is_empty()))
            .ok_or(DecodeError::MissingKind)?;

        Ok(Self {
            kind,
            payload,
            id: record.id.clone(),
        })
    }
}

/// What the watcher does with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    /// Proof of use: renew the idle timer (and log).
    Renew,
    /// Log only.
    Observe,
    /// High-volume kind: trace-level log only.
    Quiet,
}

impl Activity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Renew => "renew",
            Self::Observe => "observe",
            Self::Quiet => "quiet",
        }
    }
}

/// Maps event kinds to [`Activity`]. O(1) in the number of events seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventClassifier {
    activity_kind: String,
    quiet_kinds: Vec<String>,
}

impl Default for EventClassifier {
    fn default() -> Self {
        Self {
            activity_kind: ACTIVITY_EVENT_KIND.to_owned(),
            quiet_kinds: QUIET_EVENT_KINDS.iter().map(|k| (*k).to_owned()).collect(),
        }
    }
}

impl EventClassifier {
    pub fn new(activity_kind: impl Into<String>, quiet_kinds: Vec<String>) -> Self {
        Self {
            activity_kind: activity_kind.into(),
            quiet_kinds,
        }
    }

    pub fn classify(&self, event: &Event) -> Activity {
        if event.kind == self.activity_kind {
            Activity::Renew
        } else if self.quiet_kinds.iter().any(|k| *k == event.kind) {
            Activity::Quiet
        } else {
            Activity::Observe
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(data: &str) -> SseRecord {
        SseRecord {
            data: data.to_owned(),
            ..SseRecord::default()
        }
    }

    fn event(kind: &str) -> Event {
        Event {
            kind: kind.to_owned(),
            payload: serde_json::json!({ "type": kind }),
            id: None,
        }
    }

    #[test]
    fn kind_from_payload_type() {
        let ev = Event::from_record(&record(
            r#"{"type":"session.updated","properties":{"id":"s1"}}"#,
        ))
        .unwrap();
        assert_eq!(ev.kind, "session.updated");
        assert_eq!(ev.payload["properties"]["id"], "s1");
    }

    #[test]
    fn kind_falls_back_to_event_field() {
        let rec = SseRecord {
            event: Some("heartbeat".into()),
            data: "{}".into(),
            ..SseRecord::default()
        };
        assert_eq!(Event::from_record(&rec).unwrap().kind, "heartbeat");
    }

    #[test]
    fn payload_type_wins_over_event_field() {
        let rec = SseRecord {
            event: Some("message".into()),
            data: r#"{"type":"tool.called"}"#.into(),
            id: Some("9".into()),
            retry: None,
        };
        let ev = Event::from_record(&rec).unwrap();
        assert_eq!(ev.kind, "tool.called");
        assert_eq!(ev.id.as_deref(), Some("9"));
    }

    #[test]
    fn non_json_is_malformed() {
        let err = Event::from_record(&record("not json")).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJson(_)));
    }

    #[test]
    fn missing_kind_is_malformed() {
        let err = Event::from_record(&record(r#"{"type":42}"#)).unwrap_err();
        assert_eq!(err, DecodeError::MissingKind);
    }

    #[test]
    fn default_classification() {
        let c = EventClassifier::default();
        assert_eq!(c.classify(&event("session.updated")), Activity::Renew);
        assert_eq!(c.classify(&event("message.part.updated")), Activity::Quiet);
        assert_eq!(c.classify(&event("tool.called")), Activity::Observe);
        assert_eq!(c.classify(&event("session.updated.extra")), Activity::Observe);
    }

    #[test]
    fn custom_classifier() {
        let c = EventClassifier::new("ping", vec!["noise".into()]);
        assert_eq!(c.classify(&event("ping")), Activity::Renew);
        assert_eq!(c.classify(&event("noise")), Activity::Quiet);
        assert_eq!(c.classify(&event("session.updated")), Activity::Observe);
    }
}
