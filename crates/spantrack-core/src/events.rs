//! Ingestion requests and realtime messages

use crate::span::{Attributes, Span, SpanEvent, SpanStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the realtime event carrying a full span document
pub const SPAN_UPSERT_EVENT: &str = "span_upsert";

/// Ingestion validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Lifecycle state carried by an upsert event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertState {
    Created,
    Updated,
    Completed,
}

/// Raw ingestion body as submitted by producers.
///
/// Required fields are optional here so that a missing one surfaces as a
/// `ValidationError` instead of a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertRequest {
    pub state: Option<UpsertState>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub parent_span_id: Option<String>,
    pub label: Option<String>,
    pub status: Option<SpanStatus>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub node_id: Option<String>,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub attributes: Option<Attributes>,
    #[serde(default)]
    pub events: Option<Vec<SpanEvent>>,
    pub idempotency_key: Option<String>,
}

impl UpsertRequest {
    /// Check required fields and produce a typed event
    pub fn validate(self) -> Result<UpsertEvent, ValidationError> {
        let trace_id = non_empty(self.trace_id).ok_or(ValidationError::MissingField("traceId"))?;
        let span_id = non_empty(self.span_id).ok_or(ValidationError::MissingField("spanId"))?;
        let state = self.state.ok_or(ValidationError::MissingField("state"))?;

        Ok(UpsertEvent {
            state,
            trace_id,
            span_id,
            parent_span_id: self.parent_span_id,
            label: self.label,
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
            node_id: self.node_id,
            thread_id: self.thread_id,
            attributes: self.attributes.unwrap_or_default(),
            events: self.events.unwrap_or_default(),
            idempotency_key: non_empty(self.idempotency_key),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// A validated lifecycle event for one span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertEvent {
    pub state: UpsertState,
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SpanStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SpanEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl UpsertEvent {
    pub fn new(
        state: UpsertState,
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
    ) -> Self {
        Self {
            state,
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            label: None,
            status: None,
            start_time: None,
            end_time: None,
            node_id: None,
            thread_id: None,
            attributes: Attributes::new(),
            events: Vec::new(),
            idempotency_key: None,
        }
    }

    pub fn created(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self::new(UpsertState::Created, trace_id, span_id)
    }

    pub fn updated(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self::new(UpsertState::Updated, trace_id, span_id)
    }

    pub fn completed(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self::new(UpsertState::Completed, trace_id, span_id)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_event(mut self, event: SpanEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Ingestion acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertResponse {
    pub success: bool,
    pub span_id: String,
}

impl UpsertResponse {
    pub fn ok(span_id: impl Into<String>) -> Self {
        Self {
            success: true,
            span_id: span_id.into(),
        }
    }
}

/// Messages pushed to realtime observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum RealtimeMessage {
    /// Full current document of a span after a successful ingestion
    SpanUpsert(Span),
}

impl RealtimeMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            RealtimeMessage::SpanUpsert(_) => SPAN_UPSERT_EVENT,
        }
    }

    pub fn into_span(self) -> Span {
        match self {
            RealtimeMessage::SpanUpsert(span) => span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_requires_identity_and_state() {
        let missing_trace: UpsertRequest =
            serde_json::from_value(json!({"state": "created", "spanId": "s"})).unwrap();
        assert_eq!(
            missing_trace.validate().unwrap_err(),
            ValidationError::MissingField("traceId")
        );

        let missing_span: UpsertRequest =
            serde_json::from_value(json!({"state": "created", "traceId": "t", "spanId": ""}))
                .unwrap();
        assert_eq!(
            missing_span.validate().unwrap_err(),
            ValidationError::MissingField("spanId")
        );

        let missing_state: UpsertRequest =
            serde_json::from_value(json!({"traceId": "t", "spanId": "s"})).unwrap();
        assert_eq!(
            missing_state.validate().unwrap_err(),
            ValidationError::MissingField("state")
        );
    }

    #[test]
    fn test_validate_full_request() {
        let request: UpsertRequest = serde_json::from_value(json!({
            "state": "updated",
            "traceId": "t",
            "spanId": "s",
            "label": "agent:plan",
            "status": "running",
            "nodeId": "n1",
            "attributes": {"kind": "agent"},
            "events": [{"name": "step", "timestamp": "2024-01-01T00:00:00Z"}],
            "idempotencyKey": "k1"
        }))
        .unwrap();

        let event = request.validate().unwrap();
        assert_eq!(event.state, UpsertState::Updated);
        assert_eq!(event.label.as_deref(), Some("agent:plan"));
        assert_eq!(event.status, Some(SpanStatus::Running));
        assert_eq!(event.node_id.as_deref(), Some("n1"));
        assert_eq!(event.attributes.get("kind"), Some(&json!("agent")));
        assert_eq!(event.events.len(), 1);
        assert_eq!(event.idempotency_key.as_deref(), Some("k1"));
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        let result: Result<UpsertRequest, _> =
            serde_json::from_value(json!({"state": "finished", "traceId": "t", "spanId": "s"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_event_serializes_as_request() {
        let event = UpsertEvent::completed("t", "s").with_status(SpanStatus::Error);
        let request: UpsertRequest =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(request.validate().unwrap(), event);
    }

    #[test]
    fn test_realtime_message_shape() {
        let span = Span::new("t", "s", Utc::now());
        let message = RealtimeMessage::SpanUpsert(span.clone());
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["event"], SPAN_UPSERT_EVENT);
        assert_eq!(value["payload"]["spanId"], "s");
        assert_eq!(message.event_name(), "span_upsert");

        let back: RealtimeMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back.into_span(), span);
    }
}
