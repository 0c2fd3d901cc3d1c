// =============================================================================
// WebSocket Message Envelope — canonical shapes plus legacy normalization
// =============================================================================
//
// Every outbound message is a flat JSON object with `type` and an ISO-8601
// `timestamp`. Older producers still emit `stage_progress` / `refresh` frames
// with their fields nested under `data`; those are rewritten into the
// canonical forms before broadcast so clients only ever see one shape.
// =============================================================================

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pipeline::stage::OutputLevel;

// =============================================================================
// Payloads
// =============================================================================

/// Typed message payloads. The `type` tag and field names are part of the
/// client contract; treat them as frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsPayload {
    Connection {
        status: ConnectionStatus,
        client_id: String,
        session_id: String,
    },
    PipelineProgress {
        pipeline_id: String,
        stage: String,
        progress: f64,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        current: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },
    PipelineStatus {
        pipeline_id: String,
        status: String,
        stage: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    PipelineStart {
        pipeline_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    PipelineReset {
        pipeline_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    PipelineComplete {
        pipeline_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    Output {
        stage: String,
        level: OutputLevel,
        message: String,
    },
    Info { message: String },
    Success { message: String },
    Warning { message: String },
    Error {
        error_code: String,
        title: String,
        detail: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    DataUpdate {
        subtype: DataSubtype,
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Log {
        level: OutputLevel,
        message: String,
    },
    Heartbeat {},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSubtype {
    TickerSummary,
    CombinedData,
    Indexes,
    DailyReport,
    IndexData,
    All,
}

// =============================================================================
// Envelope
// =============================================================================

/// Outbound envelope: the payload's fields plus a timestamp, flat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(flatten)]
    pub payload: WsPayload,
    pub timestamp: String,
}

impl WsMessage {
    /// Wrap a payload with the current time.
    pub fn now(payload: WsPayload) -> Self {
        Self { payload, timestamp: Utc::now().to_rfc3339() }
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Rewrite an arbitrary producer frame into the canonical envelope.
///
/// Accepts canonical frames as-is (stamping a timestamp when absent), maps the
/// legacy `stage_progress` and `refresh` types, and unwraps fields nested
/// under a legacy `data` object. Returns `None` for frames that cannot be
/// made canonical.
pub fn normalize(raw: Value) -> Option<WsMessage> {
    let mut obj = match raw {
        Value::Object(map) => map,
        _ => return None,
    };

    let msg_type = obj.get("type")?.as_str()?.to_string();

    // Legacy type aliases.
    match msg_type.as_str() {
        "stage_progress" => {
            obj.insert("type".into(), Value::String("pipeline_progress".into()));
        }
        "refresh" => {
            let mut replacement = serde_json::Map::new();
            replacement.insert("type".into(), Value::String("data_update".into()));
            replacement.insert("subtype".into(), Value::String("all".into()));
            replacement.insert("action".into(), Value::String("refresh".into()));
            obj = replacement;
        }
        _ => {}
    }

    // Legacy "everything under data" wrapper: lift nested fields to the top
    // level. An explicit top-level field wins over its nested twin. The
    // canonical data_update type legitimately carries a `data` payload, so it
    // is exempt.
    let current_type = obj.get("type").and_then(Value::as_str).unwrap_or_default();
    if current_type != "data_update" {
        if let Some(Value::Object(nested)) = obj.remove("data") {
            for (key, value) in nested {
                obj.entry(key).or_insert(value);
            }
        }
    }

    if !obj.contains_key("timestamp") {
        obj.insert(
            "timestamp".into(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }

    serde_json::from_value(Value::Object(obj)).ok()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_messages_are_flat_with_type_and_timestamp() {
        let msg = WsMessage::now(WsPayload::PipelineProgress {
            pipeline_id: "p1".into(),
            stage: "processing".into(),
            progress: 42.0,
            message: "parsing workbooks".into(),
            current: Some(3),
            total: Some(7),
        });
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "pipeline_progress");
        assert_eq!(value["pipeline_id"], "p1");
        assert_eq!(value["progress"], 42.0);
        assert_eq!(value["current"], 3);
        assert!(value["timestamp"].is_string());
        assert!(value.get("data").is_none());
    }

    #[test]
    fn pipeline_reset_roundtrips_on_the_wire() {
        let msg = WsMessage::now(WsPayload::PipelineReset {
            pipeline_id: "p2".into(),
            stage: None,
            status: Some("pending".into()),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "pipeline_reset");
        assert_eq!(value["pipeline_id"], "p2");
        assert_eq!(value["status"], "pending");
        assert!(value.get("stage").is_none());
        assert!(value["timestamp"].is_string());

        let back: WsMessage = serde_json::from_value(value).unwrap();
        match back.payload {
            WsPayload::PipelineReset { pipeline_id, status, .. } => {
                assert_eq!(pipeline_id, "p2");
                assert_eq!(status.as_deref(), Some("pending"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn success_and_warning_notices_roundtrip() {
        let msg = WsMessage::now(WsPayload::Success {
            message: "full pipeline completed".into(),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "success");
        assert_eq!(value["message"], "full pipeline completed");
        assert!(value["timestamp"].is_string());
        let back: WsMessage = serde_json::from_value(value).unwrap();
        assert!(matches!(back.payload, WsPayload::Success { .. }));

        let msg = WsMessage::now(WsPayload::Warning {
            message: "pipeline cancelled before completion".into(),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "warning");
        assert_eq!(value["message"], "pipeline cancelled before completion");
        let back: WsMessage = serde_json::from_value(value).unwrap();
        match back.payload {
            WsPayload::Warning { message } => {
                assert_eq!(message, "pipeline cancelled before completion");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn normalize_passes_canonical_frames_through() {
        let raw = json!({
            "type": "info",
            "message": "scrape finished",
        });
        let msg = normalize(raw).unwrap();
        match msg.payload {
            WsPayload::Info { message } => assert_eq!(message, "scrape finished"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn normalize_maps_legacy_stage_progress() {
        let raw = json!({
            "type": "stage_progress",
            "data": {
                "pipeline_id": "p9",
                "stage": "scraping",
                "progress": 10.0,
                "message": "fetching",
            },
        });
        let msg = normalize(raw).unwrap();
        match msg.payload {
            WsPayload::PipelineProgress { pipeline_id, stage, progress, .. } => {
                assert_eq!(pipeline_id, "p9");
                assert_eq!(stage, "scraping");
                assert_eq!(progress, 10.0);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn normalize_maps_legacy_refresh() {
        let msg = normalize(json!({"type": "refresh"})).unwrap();
        match msg.payload {
            WsPayload::DataUpdate { subtype, action, data } => {
                assert_eq!(subtype, DataSubtype::All);
                assert_eq!(action.as_deref(), Some("refresh"));
                assert!(data.is_none());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn normalize_prefers_top_level_over_nested_duplicates() {
        let raw = json!({
            "type": "output",
            "stage": "processing",
            "level": "warn",
            "message": "top-level wins",
            "data": { "message": "nested loses" },
        });
        let msg = normalize(raw).unwrap();
        match msg.payload {
            WsPayload::Output { message, level, .. } => {
                assert_eq!(message, "top-level wins");
                assert_eq!(level, OutputLevel::Warn);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn normalize_keeps_data_update_payload_nested() {
        let raw = json!({
            "type": "data_update",
            "subtype": "ticker_summary",
            "data": {"tickers": 12},
        });
        let msg = normalize(raw).unwrap();
        match msg.payload {
            WsPayload::DataUpdate { subtype, data, .. } => {
                assert_eq!(subtype, DataSubtype::TickerSummary);
                assert_eq!(data.unwrap()["tickers"], 12);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn normalize_rejects_unknown_frames() {
        assert!(normalize(json!({"type": "telepathy"})).is_none());
        assert!(normalize(json!("not an object")).is_none());
        assert!(normalize(json!({"message": "no type"})).is_none());
    }

    #[test]
    fn inbound_heartbeat_parses() {
        let msg = normalize(json!({"type": "heartbeat"})).unwrap();
        assert!(matches!(msg.payload, WsPayload::Heartbeat {}));
    }
}
