//! Spantrack Client - talking to a Spantrack server
//!
//! - [`SpantrackClient`]: REST calls for ingestion and queries
//! - [`RealtimeSubscriber`]: reconnecting `span_upsert` stream
//! - [`RunningCountService`]: live running counts, seeded from the query
//!   API and kept current from the realtime stream

pub mod error;
pub mod http;
pub mod realtime;
pub mod seed;
pub mod service;

pub use error::{ClientError, ClientResult, SeedError};
pub use http::SpantrackClient;
pub use realtime::{realtime_url, Backoff, RealtimeEvent, RealtimeSubscriber};
pub use seed::{seed_projection, SeedReport};
pub use service::{RunningCountService, SyncStatus};
