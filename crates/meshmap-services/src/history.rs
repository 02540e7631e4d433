//! SQLite-backed record history.
//!
//! The in-memory store forgets records when they expire; the history
//! keeps the last known state of every record so the query surface can
//! answer "what was here" questions. Snapshots are written by a periodic
//! task, not on the write path.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use meshmap_core::{NetRecord, RecordFilter};

use crate::store::ContentStore;

/// Handle to the history database. Clones share one connection; rusqlite
/// access serializes behind a mutex.
#[derive(Clone)]
pub struct HistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl HistoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create history dir: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open history db: {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("failed to open in-memory db")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                id          TEXT PRIMARY KEY,
                active_time INTEGER NOT NULL,
                body        TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS records_active_time ON records (active_time);",
        )
        .context("failed to create history schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Upsert a batch by record id. Returns the number written.
    pub fn save_records(&self, records: &[NetRecord]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction().context("failed to begin transaction")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO records (id, active_time, body) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET
                         active_time = excluded.active_time,
                         body = excluded.body",
                )
                .context("failed to prepare upsert")?;
            for rec in records {
                let body = serde_json::to_string(rec).context("failed to encode record")?;
                stmt.execute(params![rec.id, rec.options.active_time, body])
                    .with_context(|| format!("failed to upsert record {}", rec.id))?;
            }
        }
        tx.commit().context("failed to commit")?;
        Ok(records.len())
    }

    /// Load records matching the filter. The timestamp bound is pushed
    /// into SQL; the remaining fields filter the decoded rows.
    pub fn load_records(&self, filter: &RecordFilter) -> Result<Vec<NetRecord>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn
            .prepare("SELECT body FROM records WHERE active_time >= ?1")
            .context("failed to prepare query")?;
        let rows = stmt
            .query_map([filter.timestamp], |row| row.get::<_, String>(0))
            .context("history query failed")?;

        let mut out = Vec::new();
        for body in rows {
            let body = body.context("history row read failed")?;
            let rec: NetRecord =
                serde_json::from_str(&body).context("failed to decode history record")?;
            if filter.matches(&rec) {
                out.push(rec);
            }
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .context("history count failed")?;
        Ok(n as usize)
    }
}

/// Periodically snapshot the record store into history.
///
/// Runs forever — cancel by dropping the task handle.
pub async fn persist_loop(store: ContentStore<NetRecord>, history: HistoryStore, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let snapshot = store.snapshot();
        if snapshot.is_empty() {
            continue;
        }
        let history = history.clone();
        match tokio::task::spawn_blocking(move || history.save_records(&snapshot)).await {
            Ok(Ok(n)) => tracing::debug!(records = n, "history snapshot persisted"),
            Ok(Err(e)) => tracing::error!(error = %e, "history persist failed"),
            Err(e) => tracing::error!(error = %e, "history persist task failed"),
        }
    }
}
