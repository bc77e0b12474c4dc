//! Task broker: queues, leases, results, and the dead-letter table
//!
//! This module implements the three-class priority queue the runtime pops
//! from, with retry bookkeeping and late acknowledgement. A popped task is
//! marked `running` and holds a lease; if the lease expires without an ack
//! the reaper returns the task to its queue. Acks only touch rows that are
//! still `running`, which is what makes terminal states immutable: a task
//! cancelled while in flight simply has its ack ignored.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use shared::task::{QueueClass, QueueStats, TaskRecord, TaskResultEnvelope, TaskState};
use tracing::{debug, warn};

/// A task envelope that could not be decoded into a known payload variant.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub task_id: String,
    pub payload: serde_json::Value,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Create broker tables and indexes
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            queue TEXT NOT NULL,
            priority INTEGER NOT NULL,
            state TEXT NOT NULL DEFAULT 'queued',
            payload TEXT NOT NULL,

            -- Retry management
            attempt INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            not_before INTEGER NOT NULL,

            -- Lease tracking for late acknowledgement
            lease_expires_at INTEGER,

            submitted_at INTEGER NOT NULL,
            completed_at INTEGER
        )
        "#,
        [],
    )
    .context("Failed to create tasks table")?;

    // Covers the pop query: per-queue dispatch candidates ordered by priority
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_dispatch
         ON tasks(queue, state, not_before, priority)",
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS task_results (
            id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            value TEXT,
            error TEXT,
            completed_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
        [],
    )
    .context("Failed to create task_results table")?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS dead_letter (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            reason TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
        [],
    )
    .context("Failed to create dead_letter table")?;

    Ok(())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let queue: String = row.get(2)?;
    let state: String = row.get(4)?;
    let payload: String = row.get(5)?;
    let not_before: i64 = row.get(8)?;
    let submitted_at: i64 = row.get(9)?;
    let completed_at: Option<i64> = row.get(10)?;

    Ok(TaskRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        queue: QueueClass::parse(&queue).unwrap_or(QueueClass::Low),
        priority: row.get::<_, i64>(3)? as u8,
        state: TaskState::parse(&state).unwrap_or(TaskState::Failed),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        attempt: row.get::<_, i64>(6)? as u32,
        last_error: row.get(7)?,
        not_before: Utc.timestamp_opt(not_before, 0).single().unwrap_or_default(),
        submitted_at: Utc
            .timestamp_opt(submitted_at, 0)
            .single()
            .unwrap_or_default(),
        completed_at: completed_at.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
    })
}

const RECORD_COLUMNS: &str = "id, name, queue, priority, state, payload, attempt, last_error, \
     not_before, submitted_at, completed_at";

pub fn enqueue_task(conn: &Connection, record: &TaskRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO tasks (
            id, name, queue, priority, state, payload, attempt,
            not_before, submitted_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            record.id,
            record.name,
            record.queue.as_str(),
            record.priority as i64,
            record.state.as_str(),
            serde_json::to_string(&record.payload)?,
            record.attempt as i64,
            record.not_before.timestamp(),
            record.submitted_at.timestamp(),
        ],
    )?;

    debug!(
        task_id = %record.id,
        name = %record.name,
        queue = record.queue.as_str(),
        priority = record.priority,
        "Task enqueued"
    );
    Ok(())
}

/// Pop the next dispatchable task.
///
/// Classes are drained high before normal before low; within a class higher
/// priority wins and ties go to the earliest enqueue (rowid order, which
/// follows insertion). The popped row transitions to `running` and receives
/// a visibility lease.
pub fn pop_ready_task(
    conn: &Connection,
    now: DateTime<Utc>,
    visibility_timeout_seconds: u64,
) -> Result<Option<TaskRecord>> {
    let now_ts = now.timestamp();

    for class in QueueClass::DRAIN_ORDER {
        let sql = format!(
            "SELECT {} FROM tasks
             WHERE queue = ?1 AND state IN ('queued', 'retrying') AND not_before <= ?2
             ORDER BY priority DESC, rowid ASC
             LIMIT 1",
            RECORD_COLUMNS
        );

        let candidate = conn
            .query_row(&sql, params![class.as_str(), now_ts], row_to_record)
            .optional()?;

        if let Some(mut record) = candidate {
            let lease = now_ts + visibility_timeout_seconds as i64;
            conn.execute(
                "UPDATE tasks SET state = 'running', lease_expires_at = ?2 WHERE id = ?1",
                params![record.id, lease],
            )?;
            record.state = TaskState::Running;
            return Ok(Some(record));
        }
    }

    Ok(None)
}

fn store_result(
    conn: &Connection,
    task_id: &str,
    state: TaskState,
    value: Option<&serde_json::Value>,
    error: Option<&str>,
    result_ttl_seconds: u64,
) -> Result<()> {
    let now = Utc::now().timestamp();
    conn.execute(
        "INSERT OR REPLACE INTO task_results (id, state, value, error, completed_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            task_id,
            state.as_str(),
            value.map(|v| v.to_string()),
            error,
            now,
            now + result_ttl_seconds as i64,
        ],
    )?;
    Ok(())
}

/// Acknowledge success. A no-op when the task is no longer `running`
/// (cancelled mid-flight, or reaped and re-dispatched elsewhere).
pub fn ack_success(
    conn: &Connection,
    task_id: &str,
    value: &serde_json::Value,
    result_ttl_seconds: u64,
) -> Result<bool> {
    let now = Utc::now().timestamp();
    let changed = conn.execute(
        "UPDATE tasks SET state = 'succeeded', completed_at = ?2, lease_expires_at = NULL
         WHERE id = ?1 AND state = 'running'",
        params![task_id, now],
    )?;

    if changed > 0 {
        store_result(
            conn,
            task_id,
            TaskState::Succeeded,
            Some(value),
            None,
            result_ttl_seconds,
        )?;
    }
    Ok(changed > 0)
}

/// Record a failed attempt and reschedule the task at `not_before`.
pub fn ack_retry(
    conn: &Connection,
    task_id: &str,
    error: &str,
    attempt: u32,
    not_before: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE tasks SET state = 'retrying', attempt = ?2, last_error = ?3,
         not_before = ?4, lease_expires_at = NULL
         WHERE id = ?1 AND state = 'running'",
        params![task_id, attempt as i64, error, not_before.timestamp()],
    )?;
    Ok(changed > 0)
}

/// Mark a task terminally failed and publish the error envelope.
pub fn ack_failed(
    conn: &Connection,
    task_id: &str,
    error: &str,
    result_ttl_seconds: u64,
) -> Result<bool> {
    let now = Utc::now().timestamp();
    let changed = conn.execute(
        "UPDATE tasks SET state = 'failed', last_error = ?2, completed_at = ?3,
         lease_expires_at = NULL
         WHERE id = ?1 AND state = 'running'",
        params![task_id, error, now],
    )?;

    if changed > 0 {
        store_result(
            conn,
            task_id,
            TaskState::Failed,
            None,
            Some(error),
            result_ttl_seconds,
        )?;
        warn!(task_id = %task_id, error = %error, "Task permanently failed");
    }
    Ok(changed > 0)
}

/// Cancel a task. Terminal rows are untouched; a running task is flipped to
/// cancelled here and its in-flight ack will find no `running` row to update.
pub fn cancel_task(conn: &Connection, task_id: &str) -> Result<bool> {
    let now = Utc::now().timestamp();
    let changed = conn.execute(
        "UPDATE tasks SET state = 'cancelled', completed_at = ?2, lease_expires_at = NULL
         WHERE id = ?1 AND state IN ('queued', 'retrying', 'running')",
        params![task_id, now],
    )?;
    Ok(changed > 0)
}

pub fn get_task(conn: &Connection, task_id: &str) -> Result<Option<TaskRecord>> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?1", RECORD_COLUMNS);
    Ok(conn
        .query_row(&sql, params![task_id], row_to_record)
        .optional()?)
}

/// Fetch a task result if it exists and has not expired.
pub fn get_result(
    conn: &Connection,
    task_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<TaskResultEnvelope>> {
    let row = conn
        .query_row(
            "SELECT id, state, value, error, completed_at FROM task_results
             WHERE id = ?1 AND expires_at > ?2",
            params![task_id, now.timestamp()],
            |row| {
                let state: String = row.get(1)?;
                let value: Option<String> = row.get(2)?;
                let completed: i64 = row.get(4)?;
                Ok((row.get::<_, String>(0)?, state, value, row.get::<_, Option<String>>(3)?, completed))
            },
        )
        .optional()?;

    let Some((id, state, value, error, completed)) = row else {
        return Ok(None);
    };

    Ok(Some(TaskResultEnvelope {
        id,
        state: TaskState::parse(&state)?,
        value: value
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .context("Failed to decode task result value")?,
        error,
        completed_at: Utc.timestamp_opt(completed, 0).single().unwrap_or_default(),
    }))
}

pub fn queue_stats(conn: &Connection) -> Result<QueueStats> {
    let mut stats = QueueStats::default();

    let mut stmt = conn.prepare(
        "SELECT queue, COUNT(*) FROM tasks
         WHERE state IN ('queued', 'retrying') GROUP BY queue",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (queue, count) = row?;
        match queue.as_str() {
            "high" => stats.high_queued = count as usize,
            "normal" => stats.normal_queued = count as usize,
            "low" => stats.low_queued = count as usize,
            _ => {}
        }
    }

    stats.running = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE state = 'running'",
        [],
        |row| row.get::<_, i64>(0),
    )? as usize;

    stats.dead_letter = conn.query_row("SELECT COUNT(*) FROM dead_letter", [], |row| {
        row.get::<_, i64>(0)
    })? as usize;

    Ok(stats)
}

/// Requeue running tasks whose visibility lease has expired.
pub fn reap_expired_leases(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE tasks SET state = 'queued', lease_expires_at = NULL
         WHERE state = 'running' AND lease_expires_at IS NOT NULL AND lease_expires_at < ?1",
        params![now.timestamp()],
    )?;
    Ok(changed)
}

pub fn dead_letter(
    conn: &Connection,
    task_id: &str,
    payload: &serde_json::Value,
    reason: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO dead_letter (task_id, payload, reason, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            task_id,
            payload.to_string(),
            reason,
            Utc::now().timestamp()
        ],
    )?;
    warn!(task_id = %task_id, reason = %reason, "Task routed to dead letter");
    Ok(())
}

pub fn dead_letter_entries(conn: &Connection) -> Result<Vec<DeadLetterEntry>> {
    let mut stmt = conn.prepare(
        "SELECT task_id, payload, reason, created_at FROM dead_letter ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        let payload: String = row.get(1)?;
        let created: i64 = row.get(3)?;
        Ok((row.get::<_, String>(0)?, payload, row.get::<_, String>(2)?, created))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (task_id, payload, reason, created) = row?;
        entries.push(DeadLetterEntry {
            task_id,
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            reason,
            created_at: Utc.timestamp_opt(created, 0).single().unwrap_or_default(),
        });
    }
    Ok(entries)
}

/// Drop results past their TTL.
pub fn purge_expired_results(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    let count = conn.execute(
        "DELETE FROM task_results WHERE expires_at <= ?1",
        params![now.timestamp()],
    )?;
    if count > 0 {
        debug!("Purged {} expired task results", count);
    }
    Ok(count)
}
