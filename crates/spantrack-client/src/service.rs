//! Running-count service
//!
//! Owns one [`ProjectionStore`] per process. The realtime subscriber and the
//! seed pass both feed a single consumer task, so deliveries are applied one
//! at a time in arrival order.

use crate::error::ClientResult;
use crate::http::SpantrackClient;
use crate::realtime::{RealtimeEvent, RealtimeSubscriber};
use crate::seed::seed_projection;
use parking_lot::{Mutex, RwLock};
use spantrack_core::config::ProjectionSettings;
use spantrack_core::{
    Category, CountKey, DeliveryError, ObserverId, ProjectionChange, ProjectionStore,
    RunningCounts,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection and seeding progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub connected: bool,
    /// Completed seed passes, successful or not
    pub seed_attempts: u32,
    /// Live span deliveries applied
    pub deliveries: u64,
}

struct Tasks {
    subscriber: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

impl Tasks {
    fn abort(&self) {
        self.subscriber.abort();
        self.consumer.abort();
    }
}

/// Live running counts for one process.
///
/// Nothing connects until the first [`subscribe`](Self::subscribe); the
/// projection then lives until [`dispose`](Self::dispose).
pub struct RunningCountService {
    client: SpantrackClient,
    settings: ProjectionSettings,
    projection: Arc<RwLock<ProjectionStore>>,
    status: Arc<watch::Sender<SyncStatus>>,
    tasks: Mutex<Option<Tasks>>,
}

impl RunningCountService {
    pub fn new(settings: ProjectionSettings) -> ClientResult<Self> {
        let client = SpantrackClient::new(&settings.endpoint, settings.connect_timeout())?;
        let projection = ProjectionStore::new(RunningCounts::with_ttl(settings.gc_ttl()));
        let (status, _) = watch::channel(SyncStatus::default());

        Ok(Self {
            client,
            settings,
            projection: Arc::new(RwLock::new(projection)),
            status: Arc::new(status),
            tasks: Mutex::new(None),
        })
    }

    /// Register an observer, starting the service on first use.
    ///
    /// Observers run on the consumer task while the projection is locked, so
    /// they must read counts from their second argument rather than through
    /// this service. Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ProjectionChange, &RunningCounts) -> Result<(), DeliveryError>
            + Send
            + Sync
            + 'static,
    {
        let id = self.projection.write().add_observer(observer);
        self.ensure_started();
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.projection.write().remove_observer(id)
    }

    pub fn is_started(&self) -> bool {
        self.tasks.lock().is_some()
    }

    fn ensure_started(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return;
        }

        let subscriber = match RealtimeSubscriber::new(&self.settings) {
            Ok(subscriber) => subscriber,
            Err(e) => {
                warn!("Running-count service not started: {}", e);
                return;
            }
        };

        info!("Starting running-count service against {}", self.client.base_url());
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(run_consumer(
            rx,
            self.client.clone(),
            self.settings.clone(),
            Arc::clone(&self.projection),
            Arc::clone(&self.status),
        ));
        let subscriber = tokio::spawn(subscriber.run(tx));

        *tasks = Some(Tasks {
            subscriber,
            consumer,
        });
    }

    pub fn count(&self, entity_id: &str, category: Category) -> u64 {
        self.projection.read().counts().count(entity_id, category)
    }

    /// All non-zero counts
    pub fn snapshot(&self) -> BTreeMap<CountKey, u64> {
        self.projection.read().counts().snapshot()
    }

    pub fn tracked_spans(&self) -> usize {
        self.projection.read().counts().tracked_spans()
    }

    /// Watch connection and seeding progress
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Clear counts and bookkeeping, keeping observers and connections
    pub fn reset(&self) {
        self.projection.write().reset();
    }

    /// Stop all tasks and drop every count and observer. A later
    /// `subscribe` starts from scratch.
    pub fn dispose(&self) {
        if let Some(tasks) = self.tasks.lock().take() {
            tasks.abort();
        }
        self.projection.write().clear();
        self.status.send_replace(SyncStatus::default());
        debug!("Running-count service disposed");
    }
}

impl Drop for RunningCountService {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.get_mut().take() {
            tasks.abort();
        }
    }
}

async fn run_consumer(
    mut rx: mpsc::UnboundedReceiver<RealtimeEvent>,
    client: SpantrackClient,
    settings: ProjectionSettings,
    projection: Arc<RwLock<ProjectionStore>>,
    status: Arc<watch::Sender<SyncStatus>>,
) {
    let mut connected = false;
    let mut attempted = false;
    // A seed only counts once it succeeded with the stream attached
    let mut synced = false;

    while let Some(event) = rx.recv().await {
        let should_seed = match event {
            RealtimeEvent::Span(span) => {
                projection.write().deliver(&span);
                status.send_modify(|s| s.deliveries += 1);
                false
            }
            RealtimeEvent::Connected { reconnect } => {
                connected = true;
                status.send_modify(|s| s.connected = true);
                !synced || (reconnect && settings.reseed_on_reconnect)
            }
            RealtimeEvent::Disconnected => {
                connected = false;
                status.send_modify(|s| s.connected = false);
                !attempted
            }
        };

        if should_seed {
            match seed_projection(&client, &projection, settings.lookback()).await {
                Ok(_) => synced = synced || connected,
                Err(e) => warn!("Running-count seed failed: {}", e),
            }
            attempted = true;
            status.send_modify(|s| s.seed_attempts += 1);
        }
    }

    debug!("Running-count consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_settings() -> ProjectionSettings {
        ProjectionSettings {
            endpoint: "http://127.0.0.1:1".to_string(),
            reconnect_enabled: false,
            connect_timeout_ms: 500,
            ..Default::default()
        }
    }

    #[test]
    fn test_lazy_start() {
        let service = RunningCountService::new(offline_settings()).unwrap();
        assert!(!service.is_started());
        assert!(service.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_seed_failure_is_swallowed() {
        let service = RunningCountService::new(offline_settings()).unwrap();
        let mut status = service.status();
        service.subscribe(|_, _| Ok(()));
        assert!(service.is_started());

        let seen = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            status.wait_for(|s| s.seed_attempts >= 1),
        )
        .await
        .unwrap()
        .map(|s| *s)
        .unwrap();
        assert!(!seen.connected);
        assert_eq!(service.count("n1", Category::Agent), 0);

        service.dispose();
        assert!(!service.is_started());
    }
}
