//! Fan-out of span documents to realtime observers

use spantrack_core::{RealtimeMessage, Span};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Realtime broadcaster.
///
/// Publishing never fails: with no observers the message is dropped, and a
/// slow observer lags on its own receiver without affecting the others.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Arc<RealtimeMessage>>,
}

impl Broadcaster {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Publish the full current document of a span
    pub fn publish_span(&self, span: Span) {
        self.publish(RealtimeMessage::SpanUpsert(span));
    }

    pub fn publish(&self, message: RealtimeMessage) {
        match self.tx.send(Arc::new(message)) {
            Ok(receivers) => trace!("Broadcast to {} observers", receivers),
            Err(_) => trace!("No realtime observers connected"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RealtimeMessage>> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}
