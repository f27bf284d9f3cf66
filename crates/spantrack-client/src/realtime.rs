//! Realtime subscription to `span_upsert` messages
//!
//! The subscriber owns the WebSocket connection and its reconnect loop and
//! forwards everything it sees as [`RealtimeEvent`]s over an mpsc channel.

use crate::error::{ClientError, ClientResult};
use futures_util::StreamExt;
use spantrack_core::config::ProjectionSettings;
use spantrack_core::{RealtimeMessage, Span};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Path of the realtime endpoint
pub const REALTIME_PATH: &str = "/v1/realtime";

/// What the subscriber reports to its consumer
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// The stream is live. `reconnect` is false only for the first connection.
    Connected { reconnect: bool },
    /// A connection attempt failed or the stream ended
    Disconnected,
    /// A delivered span document
    Span(Box<Span>),
}

/// Map a server base URL to its realtime WebSocket URL
pub fn realtime_url(endpoint: &str) -> ClientResult<Url> {
    let mut url = Url::parse(endpoint)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ClientError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::UnsupportedScheme(scheme.to_string()))?;

    let path = format!("{}{}", url.path().trim_end_matches('/'), REALTIME_PATH);
    url.set_path(&path);
    Ok(url)
}

/// Exponential reconnect backoff, doubling up to a ceiling
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// WebSocket subscriber with automatic reconnection
pub struct RealtimeSubscriber {
    url: Url,
    connect_timeout: Duration,
    reconnect_enabled: bool,
    backoff: Backoff,
}

impl RealtimeSubscriber {
    pub fn new(settings: &ProjectionSettings) -> ClientResult<Self> {
        Ok(Self {
            url: realtime_url(&settings.endpoint)?,
            connect_timeout: settings.connect_timeout(),
            reconnect_enabled: settings.reconnect_enabled,
            backoff: Backoff::new(
                settings.reconnect_initial_delay(),
                settings.reconnect_max_delay(),
            ),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn connect(&self) -> ClientResult<WsStream> {
        let (stream, _response) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| ClientError::Timeout)??;
        Ok(stream)
    }

    /// Run until the consumer goes away or reconnection is disabled
    pub async fn run(mut self, tx: mpsc::UnboundedSender<RealtimeEvent>) {
        let mut connected_before = false;

        loop {
            match self.connect().await {
                Ok(stream) => {
                    info!("Realtime stream connected: {}", self.url);
                    self.backoff.reset();
                    let event = RealtimeEvent::Connected {
                        reconnect: connected_before,
                    };
                    if tx.send(event).is_err() {
                        return;
                    }
                    connected_before = true;

                    if Self::forward(stream, &tx).await.is_err() {
                        return;
                    }
                    warn!("Realtime stream ended: {}", self.url);
                }
                Err(e) => warn!("Realtime connect to {} failed: {}", self.url, e),
            }

            if tx.send(RealtimeEvent::Disconnected).is_err() || !self.reconnect_enabled {
                return;
            }

            let delay = self.backoff.next_delay();
            debug!("Reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Forward span messages until the stream ends. Errors only when the
    /// consumer has gone away.
    async fn forward(
        mut stream: WsStream,
        tx: &mpsc::UnboundedSender<RealtimeEvent>,
    ) -> Result<(), mpsc::error::SendError<RealtimeEvent>> {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<RealtimeMessage>(&text) {
                    Ok(message) => tx.send(RealtimeEvent::Span(Box::new(message.into_span())))?,
                    Err(e) => warn!("Ignoring unrecognized realtime message: {}", e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Realtime read error: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }
}
