//! Span query filters

use crate::classify::is_running;
use crate::span::{Span, SpanStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result size when the caller does not ask for one
pub const DEFAULT_QUERY_LIMIT: usize = 1000;

/// Hard ceiling on a single query's result size
pub const MAX_QUERY_LIMIT: usize = 10_000;

/// Filter over stored spans. All present criteria must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SpanStatus>,

    /// `true` selects `status == running`, `false` everything else
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,

    /// `true` selects spans counted as running by the projection
    /// (`status == running` or not yet completed), `false` the rest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live: Option<bool>,

    /// Substring of the label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Inclusive lower bound on `startTime`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,

    /// Inclusive upper bound on `startTime`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl SpanQuery {
    /// Spans currently in the `running` status
    pub fn running() -> Self {
        Self {
            running: Some(true),
            ..Default::default()
        }
    }

    /// Spans the running-count projection would count
    pub fn live() -> Self {
        Self {
            live: Some(true),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Requested limit clamped to `[1, MAX_QUERY_LIMIT]`
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT)
    }

    /// Whether a span satisfies every criterion. Time bounds compare at
    /// millisecond precision, matching what the SQLite backend stores.
    pub fn matches(&self, span: &Span) -> bool {
        if let Some(status) = self.status {
            if span.status != status {
                return false;
            }
        }
        if let Some(running) = self.running {
            if (span.status == SpanStatus::Running) != running {
                return false;
            }
        }
        if let Some(live) = self.live {
            if is_running(span) != live {
                return false;
            }
        }
        if let Some(label) = &self.label {
            if !span.label.contains(label.as_str()) {
                return false;
            }
        }
        let start = span.start_time.timestamp_millis();
        if let Some(from) = self.from {
            if start < from.timestamp_millis() {
                return false;
            }
        }
        if let Some(to) = self.to {
            if start > to.timestamp_millis() {
                return false;
            }
        }
        if let Some(trace_id) = &self.trace_id {
            if &span.trace_id != trace_id {
                return false;
            }
        }
        true
    }
}

/// Stable result ordering shared by every backend
pub fn sort_spans(spans: &mut [Span]) {
    spans.sort_by(|a, b| {
        a.start_time
            .timestamp_millis()
            .cmp(&b.start_time.timestamp_millis())
            .then_with(|| a.trace_id.cmp(&b.trace_id))
            .then_with(|| a.span_id.cmp(&b.span_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn span(id: &str, label: &str, status: SpanStatus, start: DateTime<Utc>) -> Span {
        let mut span = Span::new("t", id, start);
        span.label = label.to_string();
        span.status = status;
        span
    }

    #[test]
    fn test_running_shorthand() {
        let now = Utc::now();
        let query = SpanQuery::running();
        assert!(query.matches(&span("a", "x", SpanStatus::Running, now)));
        assert!(!query.matches(&span("b", "x", SpanStatus::Ok, now)));

        let not_running = SpanQuery {
            running: Some(false),
            ..Default::default()
        };
        assert!(not_running.matches(&span("c", "x", SpanStatus::Error, now)));
        assert!(!not_running.matches(&span("d", "x", SpanStatus::Running, now)));
    }

    #[test]
    fn test_live_includes_uncompleted_terminal_status() {
        let now = Utc::now();
        let mut errored = span("a", "x", SpanStatus::Error, now);
        errored.completed = false;
        let mut finished = span("b", "x", SpanStatus::Ok, now);
        finished.completed = true;
        let mut running = span("c", "x", SpanStatus::Running, now);
        running.completed = true;

        let live = SpanQuery::live();
        assert!(live.matches(&errored));
        assert!(!live.matches(&finished));
        assert!(live.matches(&running));
        assert!(!SpanQuery::running().matches(&errored));

        let settled = SpanQuery {
            live: Some(false),
            ..Default::default()
        };
        assert!(settled.matches(&finished));
        assert!(!settled.matches(&errored));
    }

    #[test]
    fn test_label_substring_and_time_range() {
        let now = Utc::now();
        let s = span("a", "tool:search", SpanStatus::Running, now);

        assert!(SpanQuery::default().with_label("search").matches(&s));
        assert!(!SpanQuery::default().with_label("agent").matches(&s));
        assert!(SpanQuery::default().with_from(now).with_to(now).matches(&s));
        assert!(!SpanQuery::default()
            .with_from(now + Duration::seconds(1))
            .matches(&s));
        assert!(!SpanQuery::default()
            .with_to(now - Duration::seconds(1))
            .matches(&s));
    }

    #[test]
    fn test_effective_limit_is_clamped() {
        assert_eq!(SpanQuery::default().effective_limit(), DEFAULT_QUERY_LIMIT);
        assert_eq!(SpanQuery::default().with_limit(0).effective_limit(), 1);
        assert_eq!(
            SpanQuery::default().with_limit(1_000_000).effective_limit(),
            MAX_QUERY_LIMIT
        );
    }

    #[test]
    fn test_sort_is_stable_by_start_then_identity() {
        let now = Utc::now();
        let mut spans = vec![
            span("b", "", SpanStatus::Ok, now),
            span("a", "", SpanStatus::Ok, now),
            span("c", "", SpanStatus::Ok, now - Duration::seconds(1)),
        ];
        sort_spans(&mut spans);
        let ids: Vec<_> = spans.iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
