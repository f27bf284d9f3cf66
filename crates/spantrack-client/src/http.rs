//! HTTP client for the Spantrack REST API

use crate::error::{ClientError, ClientResult};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use spantrack_core::{Span, SpanQuery, UpsertEvent, UpsertResponse};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

/// HTTP client for a Spantrack server
#[derive(Clone)]
pub struct SpantrackClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SpansBody {
    spans: Vec<Span>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

impl SpantrackClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("spantrack/{}", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit one lifecycle event
    pub async fn upsert(&self, event: &UpsertEvent) -> ClientResult<UpsertResponse> {
        let url = format!("{}/v1/spans/upsert", self.base_url);
        debug!(trace_id = %event.trace_id, span_id = %event.span_id, "Submitting span event");

        let response = self.client.post(&url).json(event).send().await?;
        self.handle_response(response).await
    }

    /// Fetch a single span
    pub async fn get_span(&self, trace_id: &str, span_id: &str) -> ClientResult<Span> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| ClientError::UnsupportedScheme(url_scheme(&self.base_url)))?
            .pop_if_empty()
            .extend(["v1", "spans", trace_id, span_id]);
        let response = self.client.get(url).send().await?;
        self.handle_response(response).await
    }

    /// Query spans
    pub async fn query_spans(&self, query: &SpanQuery) -> ClientResult<Vec<Span>> {
        let url = format!("{}/v1/spans", self.base_url);
        let response = self.client.get(&url).query(query).send().await?;
        let body: SpansBody = self.handle_response(response).await?;
        Ok(body.spans)
    }

    /// Liveness probe
    pub async fn health(&self) -> ClientResult<serde_json::Value> {
        let url = format!("{}/health/live", self.base_url);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    /// Readiness probe, including the stored span total
    pub async fn ready(&self) -> ClientResult<serde_json::Value> {
        let url = format!("{}/health/ready", self.base_url);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    /// Generic response handler
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> ClientResult<T> {
        let status = response.status();

        match status {
            StatusCode::OK => {
                let body = response.json::<T>().await?;
                Ok(body)
            }
            StatusCode::NOT_FOUND => {
                let error = Self::parse_error(response).await;
                Err(ClientError::NotFound(error.message))
            }
            _ if status.is_server_error() => {
                let error = Self::parse_error(response).await;
                error!("Server error {} ({}): {}", status, error.error, error.message);
                Err(ClientError::server(status.as_u16(), error.message))
            }
            _ => {
                let error = Self::parse_error(response).await;
                Err(ClientError::server(status.as_u16(), error.message))
            }
        }
    }

    async fn parse_error(response: reqwest::Response) -> ErrorBody {
        response.json::<ErrorBody>().await.unwrap_or_else(|_| ErrorBody {
            error: "unknown".to_string(),
            message: "Unknown error".to_string(),
        })
    }
}

fn url_scheme(url: &str) -> String {
    url.split(':').next().unwrap_or_default().to_string()
}
