//! Span documents and their lifecycle transitions
//!
//! A span moves created -> updated* -> completed. Every applied write bumps
//! `rev`; an event whose idempotency key was already recorded is a replay and
//! leaves the document untouched.

use crate::events::{UpsertEvent, UpsertState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Open attribute map carried by spans and span events
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Span status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    #[default]
    Running,
    Ok,
    Error,
    Cancelled,
}

impl SpanStatus {
    /// `running` is the only non-terminal status
    pub fn is_terminal(self) -> bool {
        !matches!(self, SpanStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SpanStatus::Running => "running",
            SpanStatus::Ok => "ok",
            SpanStatus::Error => "error",
            SpanStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(SpanStatus::Running),
            "ok" => Ok(SpanStatus::Ok),
            "error" => Ok(SpanStatus::Error),
            "cancelled" => Ok(SpanStatus::Cancelled),
            other => Err(format!("unknown span status: {}", other)),
        }
    }
}

/// A timestamped sub-record appended to a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanEvent {
    pub name: String,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub attributes: Attributes,
}

impl SpanEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp: Utc::now(),
            attributes: Attributes::new(),
        }
    }
}

/// Result of applying an upsert event to a span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The event changed the document and bumped `rev`
    Applied,
    /// The idempotency key was already recorded; nothing changed
    Replayed,
}

/// One execution unit's lifecycle record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// Trace identifier
    pub trace_id: String,

    /// Span identifier, unique within the trace
    pub span_id: String,

    /// Containing span, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,

    /// Human-readable operation name
    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub status: SpanStatus,

    /// Terminality signal independent of `status`
    #[serde(default)]
    pub completed: bool,

    #[serde(default = "Utc::now")]
    pub start_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Node the span's activity is attributed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// Conversation thread the span belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(default)]
    pub attributes: Attributes,

    #[serde(default)]
    pub events: Vec<SpanEvent>,

    /// Event identifiers already applied to this span
    #[serde(default)]
    pub idempotency_keys: BTreeSet<String>,

    /// Incremented on every applied write
    #[serde(default)]
    pub rev: u64,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Span {
    /// Create an empty, never-written document for `(trace_id, span_id)`
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            label: String::new(),
            status: SpanStatus::Running,
            completed: false,
            start_time: now,
            end_time: None,
            node_id: None,
            thread_id: None,
            attributes: Attributes::new(),
            events: Vec::new(),
            idempotency_keys: BTreeSet::new(),
            rev: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the document has never had a write applied
    pub fn is_new(&self) -> bool {
        self.rev == 0
    }

    /// Apply one lifecycle event.
    ///
    /// `created` on an existing document behaves like `updated`, and an
    /// `updated` or `completed` event for a new document creates it with the
    /// usual defaults. Once `completed` is set it stays set; a late `running`
    /// status is ignored so the span cannot look live again.
    pub fn apply(&mut self, event: &UpsertEvent, now: DateTime<Utc>) -> UpsertOutcome {
        if let Some(key) = &event.idempotency_key {
            if self.idempotency_keys.contains(key) {
                return UpsertOutcome::Replayed;
            }
        }

        if self.is_new() {
            if let Some(start) = event.start_time {
                self.start_time = start;
            }
            self.created_at = now;
        }

        fill_once(&mut self.parent_span_id, &event.parent_span_id);
        fill_once(&mut self.node_id, &event.node_id);
        fill_once(&mut self.thread_id, &event.thread_id);

        if let Some(label) = &event.label {
            if self.is_new() || !label.is_empty() {
                self.label = label.clone();
            }
        }

        for (key, value) in &event.attributes {
            self.attributes.insert(key.clone(), value.clone());
        }
        self.events.extend(event.events.iter().cloned());

        match event.state {
            UpsertState::Created | UpsertState::Updated => {
                if let Some(status) = event.status {
                    if !(self.completed && status == SpanStatus::Running) {
                        self.status = status;
                    }
                }
            }
            UpsertState::Completed => {
                self.completed = true;
                self.status = match event.status {
                    Some(status) if status.is_terminal() => status,
                    _ => SpanStatus::Ok,
                };
                self.end_time = Some(event.end_time.unwrap_or(now));
            }
        }

        if let Some(key) = &event.idempotency_key {
            self.idempotency_keys.insert(key.clone());
        }
        self.rev += 1;
        self.updated_at = now;

        UpsertOutcome::Applied
    }

    /// Duration in milliseconds, if the span has ended
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }

    /// String attribute lookup
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

fn fill_once(slot: &mut Option<String>, value: &Option<String>) {
    if slot.is_none() {
        if let Some(v) = value.as_ref().filter(|v| !v.is_empty()) {
            *slot = Some(v.clone());
        }
    }
}
