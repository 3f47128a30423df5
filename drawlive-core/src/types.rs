use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a results station (e.g. `"mien-bac"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Station(String);

impl Station {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Station {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Full draw record as announced by the server.
///
/// A `null` (or empty) slot value means the slot has not been drawn yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawPayload {
    pub station: Station,
    pub draw_date: NaiveDate,
    #[serde(default)]
    pub slots: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A single revealed slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPayload {
    pub slot_key: String,
    pub value: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<Station>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorNoticeKind {
    Auth,
    Transient,
}

/// Every frame the results server may push, as `{"event": .., "payload": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot(DrawPayload),
    IncrementalField(FieldPayload),
    FullUpdate(DrawPayload),
    ConnectedAck {
        #[serde(default)]
        server_time: Option<DateTime<Utc>>,
    },
    DisconnectNotice {
        reason: String,
    },
    ErrorNotice {
        kind: ErrorNoticeKind,
        #[serde(default)]
        message: String,
    },
}

impl ServerMessage {
    pub fn from_text(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// The draw-data part of this message, if any.
    pub fn into_draw_event(self) -> Option<DrawEvent> {
        match self {
            Self::Snapshot(payload) => Some(DrawEvent::Snapshot(payload)),
            Self::IncrementalField(field) => Some(DrawEvent::IncrementalField(field)),
            Self::FullUpdate(payload) => Some(DrawEvent::FullUpdate(payload)),
            _ => None,
        }
    }
}

/// Draw data republished to reveal engines.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawEvent {
    Snapshot(DrawPayload),
    IncrementalField(FieldPayload),
    FullUpdate(DrawPayload),
}

impl DrawEvent {
    /// Station the event is addressed to, when it names one.
    pub fn station(&self) -> Option<&Station> {
        match self {
            Self::Snapshot(payload) | Self::FullUpdate(payload) => Some(&payload.station),
            Self::IncrementalField(field) => field.station.as_ref(),
        }
    }
}

/// Message sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl OutboundMessage {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Ask the server for the current record instead of waiting for the next field.
    pub fn request_latest(station: &Station) -> Self {
        Self::new(
            "request_latest",
            serde_json::json!({ "station": station.as_str() }),
        )
    }

    pub fn heartbeat(at: DateTime<Utc>) -> Self {
        Self::new("heartbeat", serde_json::json!({ "ts": at.timestamp_millis() }))
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot() {
        let text = r#"{
            "event": "snapshot",
            "payload": {
                "station": "mien-bac",
                "drawDate": "2024-05-01",
                "slots": { "specialPrize_0": "12345", "firstPrize_0": null },
                "complete": false
            }
        }"#;

        let msg = ServerMessage::from_text(text).unwrap();
        let ServerMessage::Snapshot(payload) = msg else {
            panic!("expected snapshot");
        };
        assert_eq!(payload.station.as_str(), "mien-bac");
        assert_eq!(payload.slots["specialPrize_0"].as_deref(), Some("12345"));
        assert_eq!(payload.slots["firstPrize_0"], None);
        assert!(!payload.complete);
    }

    #[test]
    fn test_parse_incremental_field_without_station() {
        let text = r#"{
            "event": "incremental_field",
            "payload": { "slotKey": "thirdPrize_2", "value": "04821", "timestamp": "2024-05-01T11:20:03Z" }
        }"#;

        let event = ServerMessage::from_text(text)
            .unwrap()
            .into_draw_event()
            .unwrap();
        assert_eq!(event.station(), None);
        let DrawEvent::IncrementalField(field) = event else {
            panic!("expected incremental field");
        };
        assert_eq!(field.slot_key, "thirdPrize_2");
        assert_eq!(field.value, "04821");
    }

    #[test]
    fn test_parse_control_messages() {
        let auth = ServerMessage::from_text(
            r#"{"event":"error_notice","payload":{"kind":"auth","message":"bad token"}}"#,
        )
        .unwrap();
        assert_eq!(
            auth,
            ServerMessage::ErrorNotice {
                kind: ErrorNoticeKind::Auth,
                message: "bad token".to_string(),
            }
        );

        let ack = ServerMessage::from_text(r#"{"event":"connected_ack","payload":{}}"#).unwrap();
        assert!(ack.into_draw_event().is_none());
    }

    #[test]
    fn test_request_latest_shape() {
        let msg = OutboundMessage::request_latest(&Station::new("mien-bac"));
        let value: serde_json::Value = serde_json::from_str(&msg.to_text().unwrap()).unwrap();
        assert_eq!(value["event"], "request_latest");
        assert_eq!(value["payload"]["station"], "mien-bac");
    }
}
