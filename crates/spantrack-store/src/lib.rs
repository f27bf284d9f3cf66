//! Spantrack Store - persistence for span documents
//!
//! Every backend implements [`SpanStore`]. Writes to a single
//! `(traceId, spanId)` are serialized by the backend so that concurrent
//! lifecycle events for one span never lose an update.
//!
//! - [`MemorySpanStore`]: sharded in-process map, lost on restart
//! - [`SqliteSpanStore`]: durable SQLite database

pub mod error;
pub mod memory;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::MemorySpanStore;
pub use sqlite::SqliteSpanStore;

use spantrack_core::config::{StorageBackend, StorageSettings};
use spantrack_core::{Span, SpanQuery, UpsertEvent, UpsertOutcome};
use std::sync::Arc;
use tracing::info;

/// Result of one upsert call
#[derive(Debug, Clone)]
pub struct UpsertResult {
    /// Stored document after the call
    pub span: Span,
    pub outcome: UpsertOutcome,
}

impl UpsertResult {
    /// Whether the call changed the stored document
    pub fn applied(&self) -> bool {
        self.outcome == UpsertOutcome::Applied
    }
}

/// Span persistence backend
pub trait SpanStore: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &str;

    /// Apply a lifecycle event to the span it names, creating it if needed
    fn upsert(&self, event: &UpsertEvent) -> StoreResult<UpsertResult>;

    /// Fetch one span
    fn get(&self, trace_id: &str, span_id: &str) -> StoreResult<Option<Span>>;

    /// Spans matching every criterion, ordered by start time then identity
    fn query(&self, query: &SpanQuery) -> StoreResult<Vec<Span>>;

    /// Number of stored spans
    fn len(&self) -> StoreResult<usize>;

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Open the backend selected by configuration
pub fn open_store(settings: &StorageSettings) -> StoreResult<Arc<dyn SpanStore>> {
    let store: Arc<dyn SpanStore> = match settings.backend {
        StorageBackend::Memory => Arc::new(MemorySpanStore::new()),
        StorageBackend::Sqlite => Arc::new(SqliteSpanStore::open(&settings.path)?),
    };
    info!("Span store ready: {}", store.name());
    Ok(store)
}
