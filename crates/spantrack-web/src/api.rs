//! REST API handlers

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use spantrack_core::{Span, SpanQuery, UpsertRequest, UpsertResponse};
use spantrack_store::{SpanStore, StoreError, StoreResult};
use std::sync::Arc;
use tracing::debug;

/// Response body of the span query endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct SpansResponse {
    pub spans: Vec<Span>,
}

/// Run a store call off the async workers
async fn with_store<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&dyn SpanStore) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(&state.store);
    let result = tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {}", e)))?;
    Ok(result?)
}

/// `POST /v1/spans/upsert`
pub async fn upsert_span(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpsertRequest>, JsonRejection>,
) -> ApiResult<Json<UpsertResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let event = request.validate()?;

    let result = with_store(&state, move |store| store.upsert(&event)).await?;
    debug!(
        trace_id = %result.span.trace_id,
        span_id = %result.span.span_id,
        rev = result.span.rev,
        applied = result.applied(),
        "Span upserted"
    );

    let span_id = result.span.span_id.clone();
    state.broadcaster.publish_span(result.span);

    Ok(Json(UpsertResponse::ok(span_id)))
}

/// `GET /v1/spans`
pub async fn query_spans(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SpanQuery>, QueryRejection>,
) -> ApiResult<Json<SpansResponse>> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let spans = with_store(&state, move |store| store.query(&query)).await?;
    Ok(Json(SpansResponse { spans }))
}

/// `GET /v1/spans/{trace_id}/{span_id}`
pub async fn get_span(
    State(state): State<Arc<AppState>>,
    Path((trace_id, span_id)): Path<(String, String)>,
) -> ApiResult<Json<Span>> {
    let span = with_store(&state, move |store| {
        store
            .get(&trace_id, &span_id)?
            .ok_or_else(|| StoreError::not_found(trace_id, span_id))
    })
    .await?;
    Ok(Json(span))
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub store: String,
    pub spans: usize,
    pub observers: usize,
}

/// `GET /health/ready`: the store must answer
pub async fn ready(State(state): State<Arc<AppState>>) -> ApiResult<Json<ReadyResponse>> {
    let store_name = state.store.name().to_string();
    let spans = with_store(&state, |store| store.len()).await?;
    Ok(Json(ReadyResponse {
        status: "ready",
        store: store_name,
        spans,
        observers: state.broadcaster.receiver_count(),
    }))
}
