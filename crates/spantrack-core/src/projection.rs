//! Running-count projection over span deliveries
//!
//! Every delivery carries the full current document of one span, so the
//! projection only needs to remember which key each span currently
//! contributes to. Re-delivering the same document is a no-op, and a span
//! that moves to another entity or category moves its contribution with it.
//!
//! `counts[key]` always equals the number of spans whose key set contains
//! `key`.

use crate::classify::{classify, is_running, Category, CountKey};
use crate::multimap::TtlMultimap;
use crate::span::Span;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Idle bookkeeping older than this is evicted
pub const DEFAULT_GC_TTL_HOURS: i64 = 24;

/// Observer failure while handling a projection change
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("observer failed: {0}")]
    Failed(String),

    #[error("observer panicked: {0}")]
    Panicked(String),
}

/// One key's count before and after a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountChange {
    pub key: CountKey,
    pub previous: u64,
    pub current: u64,
}

/// Count changes caused by a single delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionChange {
    pub span_id: String,
    pub changes: Vec<CountChange>,
}

impl ProjectionChange {
    fn new(span_id: &str) -> Self {
        Self {
            span_id: span_id.to_string(),
            changes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// `(traceId, spanId)`; span ids are only unique within a trace
pub type SpanRef = (String, String);

/// Derived running counts keyed by `entityId|category`
#[derive(Debug, Clone)]
pub struct RunningCounts {
    counts: HashMap<CountKey, u64>,
    span_keys: TtlMultimap<SpanRef, CountKey>,
    /// Highest `rev` delivered for spans with live bookkeeping
    revisions: HashMap<SpanRef, u64>,
}

impl RunningCounts {
    pub fn new() -> Self {
        Self::with_ttl(Duration::hours(DEFAULT_GC_TTL_HOURS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            counts: HashMap::new(),
            span_keys: TtlMultimap::new(ttl),
            revisions: HashMap::new(),
        }
    }

    pub fn apply(&mut self, span: &Span) -> ProjectionChange {
        self.apply_at(span, Utc::now())
    }

    /// Apply one delivery of a span document
    pub fn apply_at(&mut self, span: &Span, now: DateTime<Utc>) -> ProjectionChange {
        let span_ref: SpanRef = (span.trace_id.clone(), span.span_id.clone());
        let mut change = ProjectionChange::new(&span.span_id);

        // Documents older than one already applied would undo newer state
        if let Some(&seen) = self.revisions.get(&span_ref) {
            if span.rev > 0 && span.rev < seen {
                trace!(
                    trace_id = %span.trace_id,
                    span_id = %span.span_id,
                    rev = span.rev,
                    seen,
                    "Skipping stale span document"
                );
                return change;
            }
        }

        let new_key = classify(span);
        let running = is_running(span);

        let previous: Vec<CountKey> = self
            .span_keys
            .groups_of(&span_ref)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();

        for key in previous {
            if !running || new_key.as_ref() != Some(&key) {
                self.span_keys.remove(&span_ref, &key);
                change.changes.push(self.decrement(&key));
            }
        }

        if let (Some(key), true) = (new_key, running) {
            if !self.span_keys.contains(&span_ref, &key) {
                self.span_keys.insert(span_ref.clone(), key.clone(), now);
                change.changes.push(self.increment(&key));
                self.collect_garbage(now);
            }
        }

        if self.span_keys.first_seen(&span_ref).is_some() {
            let seen = self.revisions.entry(span_ref).or_insert(0);
            *seen = (*seen).max(span.rev);
        }

        if !change.is_empty() {
            debug!(
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                changes = change.changes.len(),
                "Running counts changed"
            );
        }
        change
    }

    fn increment(&mut self, key: &CountKey) -> CountChange {
        let count = self.counts.entry(key.clone()).or_insert(0);
        let previous = *count;
        *count += 1;
        CountChange {
            key: key.clone(),
            previous,
            current: *count,
        }
    }

    fn decrement(&mut self, key: &CountKey) -> CountChange {
        let previous = self.counts.get(key).copied().unwrap_or(0);
        let current = previous.saturating_sub(1);
        if current == 0 {
            self.counts.remove(key);
        } else {
            self.counts.insert(key.clone(), current);
        }
        CountChange {
            key: key.clone(),
            previous,
            current,
        }
    }

    fn collect_garbage(&mut self, now: DateTime<Utc>) {
        let evicted = self.span_keys.sweep(now);
        if evicted.is_empty() {
            return;
        }
        for span_ref in &evicted {
            self.revisions.remove(span_ref);
        }
        debug!(evicted = evicted.len(), "Evicted idle span bookkeeping");
    }

    pub fn count(&self, entity_id: &str, category: Category) -> u64 {
        self.count_key(&CountKey::new(entity_id, category))
    }

    pub fn count_key(&self, key: &CountKey) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// All non-zero counts in key order
    pub fn snapshot(&self) -> BTreeMap<CountKey, u64> {
        self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Sum of all counts
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Spans currently contributing to some key
    pub fn contributing_spans(&self) -> usize {
        self.span_keys.len()
    }

    /// Spans with first-seen bookkeeping, contributing or idle
    pub fn tracked_spans(&self) -> usize {
        self.span_keys.tracked()
    }

    /// `(traceId, spanId)` of every span currently counted
    pub fn counted_spans(&self) -> Vec<(String, String)> {
        self.span_keys.entities().cloned().collect()
    }

    /// Drop all state
    pub fn reset(&mut self) {
        self.counts.clear();
        self.span_keys.clear();
        self.revisions.clear();
    }
}

impl Default for RunningCounts {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer callback, run synchronously after each change.
///
/// Observers receive the counts as they stand after the change and must not
/// call back into whatever owns the projection.
pub type Observer =
    Arc<dyn Fn(&ProjectionChange, &RunningCounts) -> Result<(), DeliveryError> + Send + Sync>;

/// Handle returned when registering an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Running counts plus the observers notified of their changes
pub struct ProjectionStore {
    counts: RunningCounts,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
}

impl ProjectionStore {
    pub fn new(counts: RunningCounts) -> Self {
        Self {
            counts,
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    pub fn add_observer<F>(&mut self, observer: F) -> ObserverId
    where
        F: Fn(&ProjectionChange, &RunningCounts) -> Result<(), DeliveryError>
            + Send
            + Sync
            + 'static,
    {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Arc::new(observer)));
        id
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn deliver(&mut self, span: &Span) -> ProjectionChange {
        self.deliver_at(span, Utc::now())
    }

    /// Apply a delivery and notify observers if any count changed
    pub fn deliver_at(&mut self, span: &Span, now: DateTime<Utc>) -> ProjectionChange {
        let change = self.counts.apply_at(span, now);
        if !change.is_empty() {
            for error in self.notify(&change) {
                warn!(span_id = %change.span_id, "Projection observer error: {}", error);
            }
        }
        change
    }

    /// Run every observer, isolating failures and panics
    fn notify(&self, change: &ProjectionChange) -> Vec<DeliveryError> {
        let mut errors = Vec::new();
        for (_, observer) in &self.observers {
            let result = catch_unwind(AssertUnwindSafe(|| observer(change, &self.counts)));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(payload) => errors.push(DeliveryError::Panicked(panic_message(&payload))),
            }
        }
        errors
    }

    pub fn counts(&self) -> &RunningCounts {
        &self.counts
    }

    /// Clear all counts and bookkeeping, keeping observers
    pub fn reset(&mut self) {
        self.counts.reset();
    }

    /// Clear counts and drop every observer
    pub fn clear(&mut self) {
        self.counts.reset();
        self.observers.clear();
    }
}

impl Default for ProjectionStore {
    fn default() -> Self {
        Self::new(RunningCounts::new())
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
