//! In-process span store

use crate::error::StoreResult;
use crate::{SpanStore, UpsertResult};
use chrono::Utc;
use dashmap::DashMap;
use spantrack_core::query::sort_spans;
use spantrack_core::{Span, SpanQuery, UpsertEvent, UpsertOutcome};
use tracing::trace;

type SpanKey = (String, String);

/// Span store backed by a sharded concurrent map.
///
/// The map entry is held for the whole read-apply-write cycle, which
/// serializes writers per span without blocking unrelated spans.
#[derive(Default)]
pub struct MemorySpanStore {
    spans: DashMap<SpanKey, Span>,
}

impl MemorySpanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpanStore for MemorySpanStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn upsert(&self, event: &UpsertEvent) -> StoreResult<UpsertResult> {
        let now = Utc::now();
        let key = (event.trace_id.clone(), event.span_id.clone());
        let mut entry = self
            .spans
            .entry(key)
            .or_insert_with(|| Span::new(&event.trace_id, &event.span_id, now));

        let outcome = entry.apply(event, now);
        if outcome == UpsertOutcome::Replayed {
            trace!(
                trace_id = %event.trace_id,
                span_id = %event.span_id,
                "Replayed idempotency key"
            );
        }

        Ok(UpsertResult {
            span: entry.value().clone(),
            outcome,
        })
    }

    fn get(&self, trace_id: &str, span_id: &str) -> StoreResult<Option<Span>> {
        let key = (trace_id.to_string(), span_id.to_string());
        Ok(self
            .spans
            .get(&key)
            .map(|span| span.value().clone())
            .filter(|span| !span.is_new()))
    }

    fn query(&self, query: &SpanQuery) -> StoreResult<Vec<Span>> {
        let mut spans: Vec<Span> = self
            .spans
            .iter()
            .filter(|entry| !entry.is_new() && query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        sort_spans(&mut spans);
        spans.truncate(query.effective_limit());
        Ok(spans)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.spans.len())
    }
}
