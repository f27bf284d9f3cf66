//! SQLite span store
//!
//! Each span is stored as its JSON document plus a handful of indexed
//! columns used for filtering. The lifecycle transition itself runs in Rust
//! inside an immediate transaction, so the database and the in-memory
//! backend share one set of merge rules.

use crate::error::StoreResult;
use crate::{SpanStore, UpsertResult};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use spantrack_core::{Span, SpanQuery, SpanStatus, UpsertEvent, UpsertOutcome};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS spans (
        trace_id TEXT NOT NULL,
        span_id TEXT NOT NULL,
        label TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        completed INTEGER NOT NULL DEFAULT 0,
        start_time INTEGER NOT NULL,
        rev INTEGER NOT NULL,
        document TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (trace_id, span_id)
    );
    CREATE INDEX IF NOT EXISTS idx_spans_status_start ON spans(status, start_time);
    CREATE INDEX IF NOT EXISTS idx_spans_start ON spans(start_time);
";

/// Durable span store
pub struct SqliteSpanStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSpanStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!("SQLite journal mode: {}", mode);
        conn.execute_batch(SCHEMA)?;

        info!("Span store initialized at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn load_document(conn: &Connection, trace_id: &str, span_id: &str) -> StoreResult<Option<Span>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT document FROM spans WHERE trace_id = ?1 AND span_id = ?2",
            params![trace_id, span_id],
            |row| row.get(0),
        )
        .optional()?;
    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

impl SpanStore for SqliteSpanStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn upsert(&self, event: &UpsertEvent) -> StoreResult<UpsertResult> {
        let now = Utc::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut span = load_document(&tx, &event.trace_id, &event.span_id)?
            .unwrap_or_else(|| Span::new(&event.trace_id, &event.span_id, now));

        let outcome = span.apply(event, now);
        if outcome == UpsertOutcome::Replayed {
            return Ok(UpsertResult { span, outcome });
        }

        let document = serde_json::to_string(&span)?;
        tx.execute(
            "INSERT INTO spans
                (trace_id, span_id, label, status, completed, start_time, rev, document, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(trace_id, span_id) DO UPDATE SET
                label = excluded.label,
                status = excluded.status,
                completed = excluded.completed,
                start_time = excluded.start_time,
                rev = excluded.rev,
                document = excluded.document,
                updated_at = excluded.updated_at",
            params![
                span.trace_id,
                span.span_id,
                span.label,
                span.status.as_str(),
                span.completed,
                span.start_time.timestamp_millis(),
                span.rev as i64,
                document,
                span.updated_at.timestamp_millis(),
            ],
        )?;
        tx.commit()?;

        Ok(UpsertResult { span, outcome })
    }

    fn get(&self, trace_id: &str, span_id: &str) -> StoreResult<Option<Span>> {
        let conn = self.conn.lock();
        load_document(&conn, trace_id, span_id)
    }

    fn query(&self, query: &SpanQuery) -> StoreResult<Vec<Span>> {
        let mut sql = String::from("SELECT document FROM spans WHERE 1 = 1");
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(running) = query.running {
            sql.push_str(if running { " AND status = ?" } else { " AND status != ?" });
            values.push(Value::Text(SpanStatus::Running.as_str().to_string()));
        }
        if let Some(live) = query.live {
            sql.push_str(if live {
                " AND (status = ? OR completed = 0)"
            } else {
                " AND NOT (status = ? OR completed = 0)"
            });
            values.push(Value::Text(SpanStatus::Running.as_str().to_string()));
        }
        if let Some(label) = &query.label {
            sql.push_str(" AND instr(label, ?) > 0");
            values.push(Value::Text(label.clone()));
        }
        if let Some(from) = query.from {
            sql.push_str(" AND start_time >= ?");
            values.push(Value::Integer(from.timestamp_millis()));
        }
        if let Some(to) = query.to {
            sql.push_str(" AND start_time <= ?");
            values.push(Value::Integer(to.timestamp_millis()));
        }
        if let Some(trace_id) = &query.trace_id {
            sql.push_str(" AND trace_id = ?");
            values.push(Value::Text(trace_id.clone()));
        }
        sql.push_str(" ORDER BY start_time ASC, trace_id ASC, span_id ASC LIMIT ?");
        values.push(Value::Integer(query.effective_limit() as i64));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?;

        let mut spans = Vec::new();
        for row in rows {
            spans.push(serde_json::from_str(&row?)?);
        }
        debug!("Query returned {} spans", spans.len());
        Ok(spans)
    }

    fn len(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM spans", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
