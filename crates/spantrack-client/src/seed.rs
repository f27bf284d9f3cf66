//! Seeding and reconciliation of a projection from the query API
//!
//! Seeding replays the live snapshot through the same per-delivery path
//! as live messages. Reconciliation then fetches every span the projection
//! still counts but the snapshot no longer lists, so spans that finished
//! while the stream was down stop being counted.

use crate::error::{ClientError, SeedError};
use crate::http::SpantrackClient;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use spantrack_core::query::MAX_QUERY_LIMIT;
use spantrack_core::{ProjectionStore, SpanQuery};
use std::collections::HashSet;
use tracing::{debug, info};

/// What a seed pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Live spans replayed from the snapshot
    pub replayed: usize,
    /// Counted spans fetched individually
    pub reconciled: usize,
}

/// Replay live spans started within `lookback`, then reconcile
pub async fn seed_projection(
    client: &SpantrackClient,
    projection: &RwLock<ProjectionStore>,
    lookback: Duration,
) -> Result<SeedReport, SeedError> {
    let query = SpanQuery::live()
        .with_from(Utc::now() - lookback)
        .with_limit(MAX_QUERY_LIMIT);
    let spans = client.query_spans(&query).await?;

    let listed: HashSet<(String, String)> = spans
        .iter()
        .map(|span| (span.trace_id.clone(), span.span_id.clone()))
        .collect();

    {
        let mut projection = projection.write();
        for span in &spans {
            projection.deliver(span);
        }
    }

    let unlisted: Vec<(String, String)> = projection
        .read()
        .counts()
        .counted_spans()
        .into_iter()
        .filter(|id| !listed.contains(id))
        .collect();

    let mut reconciled = 0;
    for (trace_id, span_id) in unlisted {
        match client.get_span(&trace_id, &span_id).await {
            Ok(span) => {
                projection.write().deliver(&span);
                reconciled += 1;
            }
            Err(ClientError::NotFound(_)) => {
                debug!(trace_id = %trace_id, span_id = %span_id, "Counted span no longer stored");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let report = SeedReport {
        replayed: spans.len(),
        reconciled,
    };
    info!(
        replayed = report.replayed,
        reconciled = report.reconciled,
        "Projection seeded"
    );
    Ok(report)
}
