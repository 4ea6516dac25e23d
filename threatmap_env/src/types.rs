//! Wire-level types exchanged with the alarm backend.

use serde::{Deserialize, Serialize};

/// Query parameters for `GET /data`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedQuery {
    /// Look-back window in minutes (`timeRange`)
    pub time_range_min: Option<u32>,

    /// Server-side threat type filter (`threatType`)
    pub threat_type: Option<String>,
}

impl FeedQuery {
    /// Renders the query as URL parameters in backend naming.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(range) = self.time_range_min {
            params.push(("timeRange", range.to_string()));
        }
        if let Some(kind) = &self.threat_type {
            params.push(("threatType", kind.clone()));
        }
        params
    }
}

/// Envelope for a raw `/data` response.
///
/// The body is kept as untyped JSON - field naming differs between backend
/// revisions and the normalizer in the core crate is responsible for making
/// sense of it. Receive time is taken from the `MapContext` clock by the
/// caller, never from the transport.
#[derive(Debug, Clone)]
pub struct RawPayload {
    /// The decoded JSON body
    pub body: serde_json::Value,
}

impl RawPayload {
    pub fn new(body: serde_json::Value) -> Self {
        Self { body }
    }
}

/// What a server-sent event announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushKind {
    /// `{tracks: [...]}` with the given number of entries
    Tracks(usize),
    /// `{event: {...}}`
    Event,
    /// Anything else (control messages, heartbeats)
    Other,
}

/// A decoded push message from `GET /stream`.
#[derive(Debug, Clone)]
pub struct PushSignal {
    pub kind: PushKind,
    pub payload: serde_json::Value,
}

impl PushSignal {
    /// Classifies a decoded SSE `data:` payload.
    pub fn from_payload(payload: serde_json::Value) -> Self {
        let kind = if let Some(tracks) = payload.get("tracks").and_then(|t| t.as_array()) {
            PushKind::Tracks(tracks.len())
        } else if payload.get("event").map_or(false, |e| e.is_object()) {
            PushKind::Event
        } else {
            PushKind::Other
        };
        Self { kind, payload }
    }

    /// Returns true if this push means "new data is available".
    pub fn is_new_data(&self) -> bool {
        match self.kind {
            PushKind::Tracks(n) => n > 0,
            PushKind::Event => true,
            PushKind::Other => false,
        }
    }
}

/// Status of a `/locate` lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateStatus {
    Ok,
    Suggest,
    NotFound,
}

/// Response of `GET /locate?q=`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocateResponse {
    pub status: LocateStatus,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub matches: Vec<String>,
}

/// Raw icon bytes as fetched from the static host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconBytes {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

impl IconBytes {
    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feed_query_params() {
        let query = FeedQuery {
            time_range_min: Some(50),
            threat_type: Some("shahed".into()),
        };
        let params = query.to_params();
        assert_eq!(params[0], ("timeRange", "50".to_string()));
        assert_eq!(params[1], ("threatType", "shahed".to_string()));
        assert!(FeedQuery::default().to_params().is_empty());
    }

    #[test]
    fn test_push_classification() {
        let tracks = PushSignal::from_payload(json!({"tracks": [{"id": "1"}]}));
        assert_eq!(tracks.kind, PushKind::Tracks(1));
        assert!(tracks.is_new_data());

        let empty = PushSignal::from_payload(json!({"tracks": []}));
        assert!(!empty.is_new_data());

        let event = PushSignal::from_payload(json!({"event": {"text": "x"}}));
        assert_eq!(event.kind, PushKind::Event);

        let control = PushSignal::from_payload(json!({"control": {"type": "block"}}));
        assert_eq!(control.kind, PushKind::Other);
        assert!(!control.is_new_data());
    }

    #[test]
    fn test_locate_response_decoding() {
        let resp: LocateResponse =
            serde_json::from_value(json!({"status": "not_found"})).unwrap();
        assert_eq!(resp.status, LocateStatus::NotFound);
        assert!(resp.matches.is_empty());
        assert!(resp.lat.is_none());
    }
}
