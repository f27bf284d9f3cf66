//! Behaviour every span store backend must share

use chrono::{Duration, Utc};
use serde_json::json;
use spantrack_core::{SpanEvent, SpanQuery, SpanStatus, UpsertEvent, UpsertOutcome};
use spantrack_store::{MemorySpanStore, SpanStore, SqliteSpanStore};
use std::sync::Arc;

fn backends() -> Vec<Arc<dyn SpanStore>> {
    vec![
        Arc::new(MemorySpanStore::new()),
        Arc::new(SqliteSpanStore::in_memory().unwrap()),
    ]
}

#[test]
fn lifecycle_is_identical_across_backends() {
    for store in backends() {
        let start = Utc::now();
        store
            .upsert(
                &UpsertEvent::created("t", "s")
                    .with_label("agent.plan")
                    .with_start_time(start)
                    .with_node_id("n1")
                    .with_event(SpanEvent::new("started")),
            )
            .unwrap();
        store
            .upsert(
                &UpsertEvent::updated("t", "s")
                    .with_node_id("n2")
                    .with_attribute("step", json!(2))
                    .with_event(SpanEvent::new("progress")),
            )
            .unwrap();
        store
            .upsert(&UpsertEvent::completed("t", "s").with_end_time(start + Duration::seconds(3)))
            .unwrap();

        let span = store.get("t", "s").unwrap().unwrap();
        assert_eq!(span.node_id.as_deref(), Some("n1"), "backend {}", store.name());
        assert_eq!(span.status, SpanStatus::Ok);
        assert_eq!(span.events.len(), 2);
        assert_eq!(span.duration_ms(), Some(3000));
        assert_eq!(span.rev, 3);
    }
}

#[test]
fn late_running_update_stays_completed() {
    for store in backends() {
        store.upsert(&UpsertEvent::created("t", "s")).unwrap();
        store.upsert(&UpsertEvent::completed("t", "s")).unwrap();
        store
            .upsert(&UpsertEvent::updated("t", "s").with_status(SpanStatus::Running))
            .unwrap();

        let running = store.query(&SpanQuery::running()).unwrap();
        assert!(running.is_empty(), "backend {}", store.name());
        let span = store.get("t", "s").unwrap().unwrap();
        assert!(span.completed);
        assert_eq!(span.status, SpanStatus::Ok);
    }
}

#[test]
fn live_query_matches_projection_running_rule() {
    for store in backends() {
        store.upsert(&UpsertEvent::created("t", "a")).unwrap();
        store
            .upsert(&UpsertEvent::updated("t", "b").with_status(SpanStatus::Error))
            .unwrap();
        store.upsert(&UpsertEvent::created("t", "c")).unwrap();
        store.upsert(&UpsertEvent::completed("t", "c")).unwrap();

        let mut ids: Vec<_> = store
            .query(&SpanQuery::live())
            .unwrap()
            .into_iter()
            .map(|span| span.span_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"], "backend {}", store.name());
    }
}

#[test]
fn replay_is_reported_and_harmless() {
    for store in backends() {
        let event = UpsertEvent::updated("t", "s")
            .with_event(SpanEvent::new("tick"))
            .with_idempotency_key("evt-7");
        store.upsert(&event).unwrap();
        let replay = store.upsert(&event).unwrap();

        assert_eq!(replay.outcome, UpsertOutcome::Replayed, "backend {}", store.name());
        assert_eq!(replay.span.events.len(), 1);
        assert_eq!(store.get("t", "s").unwrap().unwrap().rev, 1);
    }
}

#[test]
fn concurrent_writers_to_one_span() {
    for store in backends() {
        store.upsert(&UpsertEvent::created("t", "s")).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..20 {
                        store
                            .upsert(
                                &UpsertEvent::updated("t", "s")
                                    .with_event(SpanEvent::new(format!("w{}-{}", i, j))),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let span = store.get("t", "s").unwrap().unwrap();
        assert_eq!(span.events.len(), 80, "backend {}", store.name());
        assert_eq!(span.rev, 81);
    }
}
