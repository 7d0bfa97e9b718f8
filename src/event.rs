//! Realtime stream events.
//!
//! Every transport delivers the same JSON envelope, `{type, payload, timestamp}`
//! (the polling endpoint spells `payload` as `data`). Envelopes are decoded into
//! the typed `StreamEvent` union here, at the transport boundary, so nothing
//! downstream handles untyped payloads.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ValidationError;

/// Status of a single pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started.
    Pending,
    /// Currently running.
    #[serde(alias = "in-progress", alias = "processing", alias = "running")]
    InProgress,
    /// Finished.
    #[serde(alias = "complete", alias = "done")]
    Completed,
    /// Failed.
    #[serde(alias = "error")]
    Failed,
}

/// Progress report for one pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStepUpdate {
    /// Index into the solution's pipeline.
    #[serde(alias = "step")]
    pub index: usize,
    /// Current status.
    pub status: StepStatus,
    /// Optional display label override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Optional completion fraction in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl PipelineStepUpdate {
    /// A step reported as completed.
    #[must_use]
    pub const fn completed(index: usize) -> Self {
        Self {
            index,
            status: StepStatus::Completed,
            label: None,
            progress: None,
        }
    }

    /// Returns true if the step is completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// Typed payload of a stream event.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventKind {
    PipelineUpdate { steps: Vec<PipelineStepUpdate> },
    MetricUpdate { metrics: Map<String, Value> },
    VisualizationUpdate { data: Value },
    Error { message: String },
    Complete { metrics: Map<String, Value> },
}

impl StreamEventKind {
    /// Wire name of this kind.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::PipelineUpdate { .. } => "pipeline_update",
            Self::MetricUpdate { .. } => "metric_update",
            Self::VisualizationUpdate { .. } => "visualization_update",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }
}

/// A discrete realtime update pushed from the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// When the backend produced the event (receive time if absent).
    pub timestamp: DateTime<Utc>,
    /// Typed payload.
    pub kind: StreamEventKind,
}

/// Raw `{type, payload, timestamp}` envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, alias = "data")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

/// Body of the polling status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub updates: Vec<WireEnvelope>,
}

impl StreamEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn now(kind: StreamEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Create an `error` event stamped with the current time.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::now(StreamEventKind::Error {
            message: message.into(),
        })
    }

    /// Returns true for `complete` events.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.kind, StreamEventKind::Complete { .. })
    }

    /// Decode a JSON text frame.
    ///
    /// Returns `Ok(None)` for event types this client does not know about.
    pub fn decode(text: &str) -> Result<Option<Self>, ValidationError> {
        let envelope: WireEnvelope =
            serde_json::from_str(text).map_err(|e| ValidationError::MalformedEvent {
                event_type: "envelope".to_string(),
                reason: e.to_string(),
            })?;
        Self::from_envelope(envelope)
    }

    /// Decode a parsed envelope.
    ///
    /// Returns `Ok(None)` for event types this client does not know about.
    pub fn from_envelope(envelope: WireEnvelope) -> Result<Option<Self>, ValidationError> {
        let WireEnvelope {
            event_type,
            payload,
            timestamp,
        } = envelope;

        let malformed = |reason: String| ValidationError::MalformedEvent {
            event_type: event_type.clone(),
            reason,
        };

        let kind = match event_type.as_str() {
            "pipeline_update" => StreamEventKind::PipelineUpdate {
                steps: decode_steps(payload).map_err(malformed)?,
            },
            "metric_update" => {
                let mut obj = into_object(payload).map_err(malformed)?;
                let metrics = match obj.remove("metrics") {
                    Some(Value::Object(inner)) => inner,
                    Some(other) => {
                        obj.insert("metrics".to_string(), other);
                        obj
                    }
                    None => obj,
                };
                StreamEventKind::MetricUpdate { metrics }
            }
            "visualization_update" => StreamEventKind::VisualizationUpdate { data: payload },
            "error" => StreamEventKind::Error {
                message: decode_message(&payload),
            },
            "complete" => {
                let metrics = match payload {
                    Value::Object(mut obj) => match obj.remove("metrics") {
                        Some(Value::Object(inner)) => inner,
                        _ => Map::new(),
                    },
                    _ => Map::new(),
                };
                StreamEventKind::Complete { metrics }
            }
            _ => return Ok(None),
        };

        Ok(Some(Self {
            timestamp: timestamp.as_ref().and_then(parse_timestamp).unwrap_or_else(Utc::now),
            kind,
        }))
    }

    /// Encode as a `{type, payload, timestamp}` envelope.
    #[must_use]
    pub fn to_envelope(&self) -> WireEnvelope {
        let payload = match &self.kind {
            StreamEventKind::PipelineUpdate { steps } => json!({ "steps": steps }),
            StreamEventKind::MetricUpdate { metrics } => json!({ "metrics": metrics }),
            StreamEventKind::VisualizationUpdate { data } => data.clone(),
            StreamEventKind::Error { message } => json!({ "message": message }),
            StreamEventKind::Complete { metrics } => json!({ "metrics": metrics }),
        };
        WireEnvelope {
            event_type: self.kind.type_name().to_string(),
            payload,
            timestamp: Some(Value::String(self.timestamp.to_rfc3339())),
        }
    }
}

fn into_object(payload: Value) -> Result<Map<String, Value>, String> {
    match payload {
        Value::Object(obj) => Ok(obj),
        Value::Null => Ok(Map::new()),
        other => Err(format!("expected object, got {other}")),
    }
}

fn decode_steps(payload: Value) -> Result<Vec<PipelineStepUpdate>, String> {
    let list = match payload {
        Value::Array(_) => payload,
        Value::Object(mut obj) => match obj.remove("steps") {
            Some(steps) => steps,
            None => Value::Array(vec![Value::Object(obj)]),
        },
        other => return Err(format!("expected steps, got {other}")),
    };
    serde_json::from_value(list).map_err(|e| e.to_string())
}

fn decode_message(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("message")
            .or_else(|| obj.get("error"))
            .and_then(Value::as_str)
            .map_or_else(|| payload.to_string(), ToString::to_string),
        Value::Null => "unknown stream error".to_string(),
        other => other.to_string(),
    }
}

/// Accepts RFC 3339 strings and epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pipeline_update_with_steps_list() {
        let text = r#"{"type":"pipeline_update","payload":{"steps":[
            {"index":0,"status":"completed"},
            {"index":1,"status":"in_progress","progress":0.4}
        ]},"timestamp":"2024-05-01T12:00:00Z"}"#;
        let event = StreamEvent::decode(text).unwrap().unwrap();
        assert_eq!(event.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
        let StreamEventKind::PipelineUpdate { steps } = event.kind else {
            panic!("expected pipeline update");
        };
        assert_eq!(steps.len(), 2);
        assert!(steps[0].is_completed());
        assert_eq!(steps[1].status, StepStatus::InProgress);
        assert_eq!(steps[1].progress, Some(0.4));
    }

    #[test]
    fn decodes_single_step_payload_and_aliases() {
        let text = r#"{"type":"pipeline_update","payload":{"step":3,"status":"done"}}"#;
        let event = StreamEvent::decode(text).unwrap().unwrap();
        assert_eq!(
            event.kind,
            StreamEventKind::PipelineUpdate {
                steps: vec![PipelineStepUpdate::completed(3)]
            }
        );
    }

    #[test]
    fn polling_envelope_uses_data_and_epoch_millis() {
        let body = r#"{"updates":[{"type":"metric_update","data":{"accuracy":0.97},"timestamp":1714564800000}]}"#;
        let status: StatusResponse = serde_json::from_str(body).unwrap();
        let event = StreamEvent::from_envelope(status.updates[0].clone())
            .unwrap()
            .unwrap();
        assert_eq!(event.timestamp.timestamp_millis(), 1_714_564_800_000);
        let StreamEventKind::MetricUpdate { metrics } = event.kind else {
            panic!("expected metric update");
        };
        assert_eq!(metrics["accuracy"], json!(0.97));
    }

    #[test]
    fn metric_update_unwraps_nested_metrics() {
        let text = r#"{"type":"metric_update","payload":{"metrics":{"latency":38}}}"#;
        let event = StreamEvent::decode(text).unwrap().unwrap();
        let StreamEventKind::MetricUpdate { metrics } = event.kind else {
            panic!("expected metric update");
        };
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics["latency"], json!(38));
    }

    #[test]
    fn unknown_type_is_ignored() {
        let text = r#"{"type":"heartbeat","payload":{}}"#;
        assert_eq!(StreamEvent::decode(text).unwrap(), None);
    }

    #[test]
    fn malformed_known_type_is_rejected() {
        let text = r#"{"type":"pipeline_update","payload":{"steps":[{"status":"completed"}]}}"#;
        let err = StreamEvent::decode(text).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MalformedEvent { ref event_type, .. } if event_type == "pipeline_update"
        ));

        let err = StreamEvent::decode(r#"{"type":"metric_update","payload":7}"#).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedEvent { .. }));
    }

    #[test]
    fn error_message_accepts_string_or_object() {
        let a = StreamEvent::decode(r#"{"type":"error","payload":"model offline"}"#)
            .unwrap()
            .unwrap();
        let b = StreamEvent::decode(r#"{"type":"error","payload":{"error":"model offline"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(a.kind, b.kind);
    }

    #[test]
    fn missing_timestamp_uses_receive_time() {
        let before = Utc::now();
        let event = StreamEvent::decode(r#"{"type":"complete"}"#).unwrap().unwrap();
        assert!(event.timestamp >= before);
        assert!(event.is_complete());
    }

    #[test]
    fn envelope_encoding_decodes_back() {
        let mut metrics = Map::new();
        metrics.insert("savings".to_string(), json!(1200));
        let event = StreamEvent::now(StreamEventKind::Complete { metrics });
        let text = serde_json::to_string(&event.to_envelope()).unwrap();
        assert_eq!(StreamEvent::decode(&text).unwrap().unwrap(), event);
    }
}
