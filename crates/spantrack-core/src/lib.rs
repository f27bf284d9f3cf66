//! Spantrack Core - span documents, lifecycle transitions, and projections
//!
//! This crate holds everything that has no I/O of its own:
//!
//! - **Span**: the stored document and its idempotent state transitions
//! - **Events**: ingestion requests and realtime messages
//! - **Query**: span filters shared by every store backend
//! - **Classify**: attribution of a span to an `(entity, category)` bucket
//! - **Projection**: memory-bounded running counts derived from span deliveries
//! - **Config**: TOML configuration with environment overrides

pub mod classify;
pub mod config;
pub mod events;
pub mod multimap;
pub mod projection;
pub mod query;
pub mod span;

// Re-export commonly used types
pub use classify::{classify, is_running, Category, CountKey};
pub use events::{
    RealtimeMessage, UpsertEvent, UpsertRequest, UpsertResponse, UpsertState, ValidationError,
};
pub use multimap::TtlMultimap;
pub use projection::{
    CountChange, DeliveryError, Observer, ObserverId, ProjectionChange, ProjectionStore,
    RunningCounts, SpanRef,
};
pub use query::SpanQuery;
pub use span::{Attributes, Span, SpanEvent, SpanStatus, UpsertOutcome};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
