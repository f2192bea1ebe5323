//! SQLite persistence: employees, face templates, presence, daily
//! attendance, alerts, and the event log.
//!
//! All pipeline-side writes go through [`WriteOp`] and the store
//! worker, which buffers and retries so a slow or missing database
//! never stalls frame processing. Tracking correctness does not
//! depend on any write landing.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use rusqlite::params;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;
use vigil_core::{Embedding, EmployeeId, FaceTemplate};

use crate::presence::PresenceStatus;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("corrupt timestamp in row: {0}")]
    BadTimestamp(String),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS employees (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS face_templates (
    id          TEXT PRIMARY KEY,
    employee_id INTEGER NOT NULL REFERENCES employees(id),
    embedding   BLOB NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS presence (
    employee_id     INTEGER PRIMARY KEY REFERENCES employees(id),
    status          TEXT NOT NULL DEFAULT 'off',
    last_seen       TEXT,
    last_transition TEXT
);
CREATE TABLE IF NOT EXISTS attendance (
    employee_id INTEGER NOT NULL REFERENCES employees(id),
    day         TEXT NOT NULL,
    first_in    TEXT NOT NULL,
    last_out    TEXT,
    PRIMARY KEY (employee_id, day)
);
CREATE TABLE IF NOT EXISTS alert_log (
    id          TEXT PRIMARY KEY,
    employee_id INTEGER NOT NULL REFERENCES employees(id),
    opened_at   TEXT NOT NULL,
    resolved_at TEXT,
    reason      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    employee_id INTEGER NOT NULL,
    status      TEXT NOT NULL,
    at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_at ON events(at);
CREATE INDEX IF NOT EXISTS idx_alerts_open ON alert_log(employee_id) WHERE resolved_at IS NULL;
"#;

/// One durable mutation from the presence layer.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Presence {
        employee: EmployeeId,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
        transition_at: DateTime<Utc>,
    },
    /// Creates the day's attendance row iff absent; never rewrites first_in.
    AttendanceFirstIn {
        employee: EmployeeId,
        day: NaiveDate,
        at: DateTime<Utc>,
    },
    AttendanceLastOut {
        employee: EmployeeId,
        day: NaiveDate,
        at: DateTime<Utc>,
    },
    /// Idempotent: no-op while an open alert exists for the employee.
    AlertOpen {
        employee: EmployeeId,
        opened_at: DateTime<Utc>,
        reason: String,
    },
    AlertResolve {
        employee: EmployeeId,
        resolved_at: DateTime<Utc>,
    },
    Event {
        employee: EmployeeId,
        status: PresenceStatus,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AttendanceRow {
    pub employee: EmployeeId,
    pub day: NaiveDate,
    pub first_in: DateTime<Utc>,
    pub last_out: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AlertRow {
    pub id: Uuid,
    pub employee: EmployeeId,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub reason: String,
}

#[derive(Clone)]
pub struct Store {
    conn: tokio_rusqlite::Connection,
}

impl Store {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let conn = tokio_rusqlite::Connection::open(path.to_path_buf()).await?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn load_employees(&self) -> Result<Vec<Employee>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, name FROM employees ORDER BY id")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(Employee {
                            id: EmployeeId(row.get(0)?),
                            name: row.get(1)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Current template gallery. Rows with an undecodable embedding
    /// blob are skipped with a warning rather than failing the load.
    pub async fn load_templates(&self) -> Result<Vec<FaceTemplate>, StoreError> {
        let raw = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, employee_id, embedding, created_at FROM face_templates",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut templates = Vec::with_capacity(raw.len());
        for (id, employee_id, blob, created_at) in raw {
            let (Ok(id), Ok(created_at)) = (
                Uuid::parse_str(&id),
                DateTime::parse_from_rfc3339(&created_at),
            ) else {
                tracing::warn!(template = %id, "skipping face template with corrupt metadata");
                continue;
            };
            if blob.len() % 4 != 0 {
                tracing::warn!(template = %id, "skipping face template with corrupt embedding");
                continue;
            }
            templates.push(FaceTemplate {
                id,
                employee: EmployeeId(employee_id),
                embedding: decode_embedding(&blob),
                created_at: created_at.with_timezone(&Utc),
            });
        }
        Ok(templates)
    }

    /// Register an employee and one face template. Used by tests and
    /// the enrollment path; templates are immutable once written.
    pub async fn add_employee(
        &self,
        employee: EmployeeId,
        name: &str,
        template: Option<&Embedding>,
    ) -> Result<(), StoreError> {
        let name = name.to_string();
        let blob = template.map(encode_embedding);
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO employees (id, name) VALUES (?1, ?2)",
                    params![employee.0, name],
                )?;
                if let Some(blob) = blob {
                    conn.execute(
                        "INSERT INTO face_templates (id, employee_id, embedding, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![Uuid::new_v4().to_string(), employee.0, blob, now],
                    )?;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Guarantee exactly one presence row per registered employee.
    pub async fn ensure_presence_rows(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO presence (employee_id, status)
                     SELECT id, 'off' FROM employees",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Apply one durable mutation.
    pub async fn apply(&self, op: WriteOp) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                match op {
                    WriteOp::Presence { employee, status, last_seen, transition_at } => {
                        conn.execute(
                            "INSERT INTO presence (employee_id, status, last_seen, last_transition)
                             VALUES (?1, ?2, ?3, ?4)
                             ON CONFLICT(employee_id) DO UPDATE SET
                                 status = excluded.status,
                                 last_seen = excluded.last_seen,
                                 last_transition = excluded.last_transition",
                            params![
                                employee.0,
                                status.as_str(),
                                last_seen.to_rfc3339(),
                                transition_at.to_rfc3339()
                            ],
                        )?;
                    }
                    WriteOp::AttendanceFirstIn { employee, day, at } => {
                        conn.execute(
                            "INSERT INTO attendance (employee_id, day, first_in)
                             VALUES (?1, ?2, ?3)
                             ON CONFLICT(employee_id, day) DO NOTHING",
                            params![employee.0, day.to_string(), at.to_rfc3339()],
                        )?;
                    }
                    WriteOp::AttendanceLastOut { employee, day, at } => {
                        conn.execute(
                            "INSERT INTO attendance (employee_id, day, first_in, last_out)
                             VALUES (?1, ?2, ?3, ?3)
                             ON CONFLICT(employee_id, day) DO UPDATE SET
                                 last_out = excluded.last_out",
                            params![employee.0, day.to_string(), at.to_rfc3339()],
                        )?;
                    }
                    WriteOp::AlertOpen { employee, opened_at, reason } => {
                        conn.execute(
                            "INSERT INTO alert_log (id, employee_id, opened_at, reason)
                             SELECT ?1, ?2, ?3, ?4
                             WHERE NOT EXISTS (
                                 SELECT 1 FROM alert_log
                                 WHERE employee_id = ?2 AND resolved_at IS NULL
                             )",
                            params![
                                Uuid::new_v4().to_string(),
                                employee.0,
                                opened_at.to_rfc3339(),
                                reason
                            ],
                        )?;
                    }
                    WriteOp::AlertResolve { employee, resolved_at } => {
                        conn.execute(
                            "UPDATE alert_log SET resolved_at = ?2
                             WHERE employee_id = ?1 AND resolved_at IS NULL",
                            params![employee.0, resolved_at.to_rfc3339()],
                        )?;
                    }
                    WriteOp::Event { employee, status, at } => {
                        conn.execute(
                            "INSERT INTO events (employee_id, status, at) VALUES (?1, ?2, ?3)",
                            params![employee.0, status.as_str(), at.to_rfc3339()],
                        )?;
                    }
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Bulk-delete event and alert history in an inclusive local-date
    /// range. Touches persisted rows only; in-memory state is unaffected.
    pub async fn prune_history(&self, from: NaiveDate, to: NaiveDate) -> Result<u64, StoreError> {
        let deleted = self
            .conn
            .call(move |conn| {
                let events = conn.execute(
                    "DELETE FROM events WHERE date(at) >= ?1 AND date(at) <= ?2",
                    params![from.to_string(), to.to_string()],
                )?;
                let alerts = conn.execute(
                    "DELETE FROM alert_log WHERE date(opened_at) >= ?1 AND date(opened_at) <= ?2",
                    params![from.to_string(), to.to_string()],
                )?;
                Ok((events + alerts) as u64)
            })
            .await?;
        Ok(deleted)
    }

    pub async fn attendance_for(
        &self,
        employee: EmployeeId,
        day: NaiveDate,
    ) -> Result<Option<AttendanceRow>, StoreError> {
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT first_in, last_out FROM attendance
                     WHERE employee_id = ?1 AND day = ?2",
                )?;
                let row = stmt
                    .query_row(params![employee.0, day.to_string()], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
                    })
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        e => Err(e),
                    })?;
                Ok(row)
            })
            .await?;

        let Some((first_in, last_out)) = row else { return Ok(None) };
        Ok(Some(AttendanceRow {
            employee,
            day,
            first_in: parse_ts(&first_in)?,
            last_out: last_out.as_deref().map(parse_ts).transpose()?,
        }))
    }

    pub async fn alerts_for(&self, employee: EmployeeId) -> Result<Vec<AlertRow>, StoreError> {
        let raw = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, opened_at, resolved_at, reason FROM alert_log
                     WHERE employee_id = ?1 ORDER BY opened_at",
                )?;
                let rows = stmt
                    .query_map(params![employee.0], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut alerts = Vec::with_capacity(raw.len());
        for (id, opened_at, resolved_at, reason) in raw {
            alerts.push(AlertRow {
                id: Uuid::parse_str(&id).unwrap_or_default(),
                employee,
                opened_at: parse_ts(&opened_at)?,
                resolved_at: resolved_at.as_deref().map(parse_ts).transpose()?,
                reason,
            });
        }
        Ok(alerts)
    }

    pub async fn event_count(&self, employee: EmployeeId) -> Result<u64, StoreError> {
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM events WHERE employee_id = ?1",
                    params![employee.0],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await?;
        Ok(count)
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::BadTimestamp(s.to_string()))
}

fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    embedding.values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Embedding {
    Embedding {
        values: blob
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    }
}

/// Clone-safe handle feeding the store worker.
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl StoreWriter {
    /// Queue a write. Never blocks; the worker enforces the buffer
    /// bound and drops the oldest entries past it.
    pub fn enqueue(&self, op: WriteOp) {
        if self.tx.send(op).is_err() {
            tracing::warn!("store worker gone; write discarded");
        }
    }
}

/// Spawn the store worker: a single task that owns the pending-write
/// buffer, applies writes in order, and retries with bounded jittered
/// backoff while the database is unavailable.
pub fn spawn_store_worker(
    store: Store,
    queue_depth: usize,
) -> (StoreWriter, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteOp>();

    let handle = tokio::spawn(async move {
        let mut pending: VecDeque<WriteOp> = VecDeque::new();
        let mut retry_delay = Duration::from_millis(100);
        const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

        loop {
            tokio::select! {
                op = rx.recv() => {
                    match op {
                        Some(op) => {
                            push_bounded(&mut pending, op, queue_depth);
                            // Drain whatever else is already queued.
                            while let Ok(op) = rx.try_recv() {
                                push_bounded(&mut pending, op, queue_depth);
                            }
                        }
                        None => {
                            flush(&store, &mut pending).await;
                            if !pending.is_empty() {
                                tracing::warn!(
                                    lost = pending.len(),
                                    "store worker shutting down with unflushed writes"
                                );
                            }
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep(retry_delay), if !pending.is_empty() => {}
            }

            if flush(&store, &mut pending).await {
                retry_delay = Duration::from_millis(100);
            } else {
                // Exponential backoff with jitter, capped.
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100u64));
                retry_delay = (retry_delay * 2 + jitter).min(MAX_RETRY_DELAY);
                tracing::warn!(
                    pending = pending.len(),
                    next_retry_ms = retry_delay.as_millis() as u64,
                    "store unavailable; writes buffered"
                );
            }
        }
    });

    (StoreWriter { tx }, handle)
}

fn push_bounded(pending: &mut VecDeque<WriteOp>, op: WriteOp, bound: usize) {
    if pending.len() >= bound {
        pending.pop_front();
        tracing::warn!(bound, "store buffer full; oldest write dropped (data loss)");
    }
    pending.push_back(op);
}

/// Apply pending writes in order. Returns true when the buffer is
/// empty afterwards.
async fn flush(store: &Store, pending: &mut VecDeque<WriteOp>) -> bool {
    while let Some(op) = pending.front() {
        match store.apply(op.clone()).await {
            Ok(()) => {
                pending.pop_front();
            }
            Err(e) => {
                tracing::warn!(error = %e, "store write failed; will retry");
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, s).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    #[tokio::test]
    async fn first_in_is_never_rewritten() {
        let store = Store::open_in_memory().await.unwrap();
        store.add_employee(EmployeeId(1), "ada", None).await.unwrap();

        store
            .apply(WriteOp::AttendanceFirstIn { employee: EmployeeId(1), day: day(), at: at(9, 0, 0) })
            .await
            .unwrap();
        // A second Off→Available later the same day must not touch first_in.
        store
            .apply(WriteOp::AttendanceFirstIn { employee: EmployeeId(1), day: day(), at: at(13, 0, 0) })
            .await
            .unwrap();
        store
            .apply(WriteOp::AttendanceLastOut { employee: EmployeeId(1), day: day(), at: at(17, 0, 0) })
            .await
            .unwrap();

        let row = store.attendance_for(EmployeeId(1), day()).await.unwrap().unwrap();
        assert_eq!(row.first_in, at(9, 0, 0));
        assert_eq!(row.last_out, Some(at(17, 0, 0)));
        assert!(row.first_in <= row.last_out.unwrap());
    }

    #[tokio::test]
    async fn alert_open_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        store.add_employee(EmployeeId(2), "grace", None).await.unwrap();

        for _ in 0..3 {
            store
                .apply(WriteOp::AlertOpen {
                    employee: EmployeeId(2),
                    opened_at: at(10, 0, 0),
                    reason: "absence".into(),
                })
                .await
                .unwrap();
        }
        let alerts = store.alerts_for(EmployeeId(2)).await.unwrap();
        assert_eq!(alerts.len(), 1, "at most one open alert per employee");
        assert!(alerts[0].resolved_at.is_none());

        store
            .apply(WriteOp::AlertResolve { employee: EmployeeId(2), resolved_at: at(10, 5, 0) })
            .await
            .unwrap();
        let alerts = store.alerts_for(EmployeeId(2)).await.unwrap();
        assert_eq!(alerts[0].resolved_at, Some(at(10, 5, 0)));

        // With the previous alert resolved, a new one may open.
        store
            .apply(WriteOp::AlertOpen {
                employee: EmployeeId(2),
                opened_at: at(11, 0, 0),
                reason: "absence".into(),
            })
            .await
            .unwrap();
        assert_eq!(store.alerts_for(EmployeeId(2)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn templates_round_trip() {
        let store = Store::open_in_memory().await.unwrap();
        let embedding = Embedding { values: vec![0.25, -1.5, 3.0] };
        store.add_employee(EmployeeId(3), "linus", Some(&embedding)).await.unwrap();

        let templates = store.load_templates().await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].employee, EmployeeId(3));
        assert_eq!(templates[0].embedding.values, vec![0.25, -1.5, 3.0]);
    }

    #[tokio::test]
    async fn prune_deletes_inclusive_range_only() {
        let store = Store::open_in_memory().await.unwrap();
        store.add_employee(EmployeeId(4), "edsger", None).await.unwrap();

        for day_of_month in [1, 2, 3] {
            store
                .apply(WriteOp::Event {
                    employee: EmployeeId(4),
                    status: PresenceStatus::Available,
                    at: Utc.with_ymd_and_hms(2026, 3, day_of_month, 12, 0, 0).unwrap(),
                })
                .await
                .unwrap();
        }
        assert_eq!(store.event_count(EmployeeId(4)).await.unwrap(), 3);

        let deleted = store
            .prune_history(
                NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted, 2, "inclusive on both ends, day 3 untouched");
        assert_eq!(store.event_count(EmployeeId(4)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn presence_rows_are_unique_per_employee() {
        let store = Store::open_in_memory().await.unwrap();
        store.add_employee(EmployeeId(5), "barbara", None).await.unwrap();
        store.ensure_presence_rows().await.unwrap();
        store.ensure_presence_rows().await.unwrap();

        store
            .apply(WriteOp::Presence {
                employee: EmployeeId(5),
                status: PresenceStatus::Available,
                last_seen: at(9, 0, 0),
                transition_at: at(9, 0, 0),
            })
            .await
            .unwrap();

        let count: u64 = store
            .conn
            .call(|conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM presence WHERE employee_id = 5",
                    [],
                    |row| row.get(0),
                )?;
                Ok(n as u64)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn pending_buffer_drops_oldest_past_bound() {
        let mut pending = VecDeque::new();
        for n in 0..5i64 {
            push_bounded(
                &mut pending,
                WriteOp::Event {
                    employee: EmployeeId(n),
                    status: PresenceStatus::Available,
                    at: at(9, 0, 0),
                },
                3,
            );
        }
        assert_eq!(pending.len(), 3, "bound holds under overflow");

        let ids: Vec<i64> = pending
            .iter()
            .map(|op| match op {
                WriteOp::Event { employee, .. } => employee.0,
                other => panic!("unexpected op: {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![2, 3, 4], "oldest writes dropped first");
    }

    #[tokio::test]
    async fn store_worker_retries_failed_writes() {
        let store = Store::open_in_memory().await.unwrap();
        store.add_employee(EmployeeId(7), "tony", None).await.unwrap();

        // Make every event insert fail until the trigger is removed.
        store
            .conn
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER block_events BEFORE INSERT ON events
                     BEGIN SELECT RAISE(ABORT, 'events blocked'); END;",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let (writer, handle) = spawn_store_worker(store.clone(), 16);
        writer.enqueue(WriteOp::Event {
            employee: EmployeeId(7),
            status: PresenceStatus::Available,
            at: at(9, 0, 0),
        });
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            store.event_count(EmployeeId(7)).await.unwrap(),
            0,
            "write blocked, not applied"
        );

        store
            .conn
            .call(|conn| {
                conn.execute_batch("DROP TRIGGER block_events")?;
                Ok(())
            })
            .await
            .unwrap();
        drop(writer);
        handle.await.unwrap();

        assert_eq!(
            store.event_count(EmployeeId(7)).await.unwrap(),
            1,
            "buffered write retried once the store recovered"
        );
    }

    #[tokio::test]
    async fn store_worker_flushes_queued_writes() {
        let store = Store::open_in_memory().await.unwrap();
        store.add_employee(EmployeeId(6), "alan", None).await.unwrap();

        let (writer, handle) = spawn_store_worker(store.clone(), 16);
        writer.enqueue(WriteOp::Event {
            employee: EmployeeId(6),
            status: PresenceStatus::Available,
            at: at(9, 0, 0),
        });
        drop(writer);
        handle.await.unwrap();

        assert_eq!(store.event_count(EmployeeId(6)).await.unwrap(), 1);
    }
}
