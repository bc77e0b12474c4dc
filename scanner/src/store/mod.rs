//! Persistence for the news scanning system
//!
//! All collections live in a single local SQLite database: articles keyed by
//! canonical URL, configured sources, the rolling and daily topic collections,
//! and the task broker (queues, results, dead letter). The store is shared
//! behind `Arc<RwLock<NewsStore>>`; rusqlite calls are short and synchronous,
//! so serializing them through the lock keeps the async callers simple.
// The broker deliberately lives in the same database as the domain data: a
// task that survives a crash is only useful if the rows it references
// survived with it.

mod db_articles;
mod db_sources;
mod db_tasks;
mod db_topics;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use shared::model::{Article, DailyTopic, Source, SummaryStatus, TopicGroup};
use shared::task::{QueueClass, QueueStats, TaskRecord, TaskResultEnvelope};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default database file name. Using a constant avoids magic strings.
const DATABASE_FILE: &str = "news_scanner.db";

pub use db_tasks::DeadLetterEntry;

/// SQLite store for the scanning system.
///
/// The `connection` field is an `Option<Mutex<Connection>>` so the store can
/// be constructed before the database file is opened in `initialize`.
pub struct NewsStore {
    /// Path to the database file.
    db_path: PathBuf,
    /// The active SQLite connection. `rusqlite::Connection` is `Send` but not
    /// `Sync`, so it is wrapped in a `Mutex` purely to make `NewsStore` safe
    /// to share behind `Arc<RwLock<NewsStore>>` across worker tasks; callers
    /// already only ever hold one handle to the connection at a time.
    connection: Option<std::sync::Mutex<Connection>>,
    /// Database busy timeout in seconds
    busy_timeout_seconds: u64,
}

impl NewsStore {
    /// Creates a store rooted in the given data directory.
    ///
    /// The directory is created if missing; the connection is opened lazily
    /// by `initialize`.
    pub fn new<P: AsRef<Path>>(data_dir: P, busy_timeout_seconds: u64) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        Ok(Self {
            db_path: data_dir.join(DATABASE_FILE),
            connection: None,
            busy_timeout_seconds,
        })
    }

    /// Opens the connection and creates all tables and indexes.
    pub async fn initialize(&mut self) -> Result<()> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("Failed to open database {}", self.db_path.display()))?;

        // WAL keeps readers unblocked while a job writes; the busy timeout
        // covers the short windows where two workers contend for the file.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(self.busy_timeout_seconds))?;

        db_articles::create_tables(&conn)?;
        db_sources::create_tables(&conn)?;
        db_topics::create_tables(&conn)?;
        db_tasks::create_tables(&conn)?;

        self.connection = Some(std::sync::Mutex::new(conn));
        info!("Store initialized at {}", self.db_path.display());
        Ok(())
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.connection
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Store not initialized; call initialize() first"))?
            .lock()
            .map_err(|_| anyhow::anyhow!("Store connection mutex poisoned"))
    }

    // ------------------------------------------------------------------
    // Articles
    // ------------------------------------------------------------------

    /// Upserts an article keyed on its canonical URL.
    ///
    /// Returns `true` when the upsert created a new article; a refresh of an
    /// existing URL returns `false`. Derived state (summary, embeddings) is
    /// never touched by the upsert.
    pub async fn upsert_article(&mut self, article: &Article) -> Result<bool> {
        let conn = self.conn()?;
        db_articles::upsert_article(&conn, article)
    }

    pub async fn get_article(&self, url: &str) -> Result<Option<Article>> {
        let conn = self.conn()?;
        db_articles::get_article(&conn, url)
    }

    /// Persists a completed summary together with its provenance and clears
    /// any previous error.
    pub async fn complete_summary(
        &mut self,
        url: &str,
        summary: &str,
        model: &str,
        prompt_version: &str,
    ) -> Result<bool> {
        let conn = self.conn()?;
        db_articles::complete_summary(&conn, url, summary, model, prompt_version)
    }

    /// Moves an article's summary into the given state, recording an error
    /// message for failures.
    pub async fn set_summary_status(
        &mut self,
        url: &str,
        status: SummaryStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        db_articles::set_summary_status(&conn, url, status, error)
    }

    pub async fn update_content_embedding(
        &mut self,
        url: &str,
        embedding: &[f32],
        model: &str,
    ) -> Result<bool> {
        let conn = self.conn()?;
        db_articles::update_content_embedding(&conn, url, embedding, model)
    }

    pub async fn update_summary_embedding(
        &mut self,
        url: &str,
        embedding: &[f32],
        model: &str,
    ) -> Result<bool> {
        let conn = self.conn()?;
        db_articles::update_summary_embedding(&conn, url, embedding, model)
    }

    /// Articles eligible for summary generation, oldest first.
    pub async fn articles_missing_summary(&self, limit: usize) -> Result<Vec<Article>> {
        let conn = self.conn()?;
        db_articles::articles_missing_summary(&conn, limit)
    }

    /// Articles missing a content embedding, oldest first.
    pub async fn articles_missing_content_embedding(&self, limit: usize) -> Result<Vec<Article>> {
        let conn = self.conn()?;
        db_articles::articles_missing_content_embedding(&conn, limit)
    }

    /// Articles with a completed summary but no summary embedding.
    pub async fn articles_missing_summary_embedding(&self, limit: usize) -> Result<Vec<Article>> {
        let conn = self.conn()?;
        db_articles::articles_missing_summary_embedding(&conn, limit)
    }

    /// Articles carrying a content embedding, in stable URL order.
    pub async fn articles_with_embedding(&self) -> Result<Vec<Article>> {
        let conn = self.conn()?;
        db_articles::articles_with_embedding(&conn)
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    /// Registers a source, ignoring duplicates by URL. Returns the stored row.
    pub async fn add_source(&mut self, url: &str, name: &str) -> Result<Source> {
        let conn = self.conn()?;
        db_sources::add_source(&conn, url, name)
    }

    pub async fn get_source_by_url(&self, url: &str) -> Result<Option<Source>> {
        let conn = self.conn()?;
        db_sources::get_source_by_url(&conn, url)
    }

    pub async fn get_source_by_id(&self, id: i64) -> Result<Option<Source>> {
        let conn = self.conn()?;
        db_sources::get_source_by_id(&conn, id)
    }

    pub async fn source_urls(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        db_sources::source_urls(&conn)
    }

    /// Stamps `last_refreshed`. Called only after a successful scan.
    pub async fn touch_source_refreshed(&mut self, url: &str) -> Result<()> {
        let conn = self.conn()?;
        db_sources::touch_source_refreshed(&conn, url)
    }

    // ------------------------------------------------------------------
    // Topics
    // ------------------------------------------------------------------

    /// Replaces the rolling topic collection in a single transaction.
    pub async fn replace_rolling_topics(&mut self, groups: &[TopicGroup]) -> Result<()> {
        let conn = self.conn()?;
        db_topics::replace_rolling_topics(&conn, groups)
    }

    pub async fn rolling_topics(&self) -> Result<Vec<TopicGroup>> {
        let conn = self.conn()?;
        db_topics::rolling_topics(&conn)
    }

    pub async fn rolling_topics_without_summary(&self) -> Result<Vec<TopicGroup>> {
        let conn = self.conn()?;
        db_topics::rolling_topics_without_summary(&conn)
    }

    pub async fn set_rolling_shared_summary(
        &mut self,
        topic_id: &str,
        summary: Option<&str>,
        status: SummaryStatus,
    ) -> Result<()> {
        let conn = self.conn()?;
        db_topics::set_rolling_shared_summary(&conn, topic_id, summary, status)
    }

    /// Atomically replaces the daily topic collection: readers observe either
    /// the previous snapshot or the new one, never a mix.
    pub async fn replace_daily_topics(&mut self, topics: &[DailyTopic]) -> Result<()> {
        let conn = self.conn()?;
        db_topics::replace_daily_topics(&conn, topics)
    }

    pub async fn daily_topics(&self) -> Result<Vec<DailyTopic>> {
        let conn = self.conn()?;
        db_topics::daily_topics(&conn)
    }

    // ------------------------------------------------------------------
    // Task broker
    // ------------------------------------------------------------------

    pub async fn enqueue_task(&mut self, record: &TaskRecord) -> Result<()> {
        let conn = self.conn()?;
        db_tasks::enqueue_task(&conn, record)
    }

    /// Pops the next dispatchable task: high before normal before low, then
    /// priority descending, then FIFO. The popped task transitions to
    /// `running` and receives a visibility lease.
    pub async fn pop_ready_task(
        &mut self,
        now: DateTime<Utc>,
        visibility_timeout_seconds: u64,
    ) -> Result<Option<TaskRecord>> {
        let conn = self.conn()?;
        db_tasks::pop_ready_task(&conn, now, visibility_timeout_seconds)
    }

    pub async fn ack_task_success(
        &mut self,
        task_id: &str,
        value: &serde_json::Value,
        result_ttl_seconds: u64,
    ) -> Result<bool> {
        let conn = self.conn()?;
        db_tasks::ack_success(&conn, task_id, value, result_ttl_seconds)
    }

    pub async fn ack_task_retry(
        &mut self,
        task_id: &str,
        error: &str,
        attempt: u32,
        not_before: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        db_tasks::ack_retry(&conn, task_id, error, attempt, not_before)
    }

    pub async fn ack_task_failed(
        &mut self,
        task_id: &str,
        error: &str,
        result_ttl_seconds: u64,
    ) -> Result<bool> {
        let conn = self.conn()?;
        db_tasks::ack_failed(&conn, task_id, error, result_ttl_seconds)
    }

    /// Cancels a task that has not reached a terminal state. Returns `false`
    /// when the task was already terminal (terminal states are immutable).
    pub async fn cancel_task(&mut self, task_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        db_tasks::cancel_task(&conn, task_id)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let conn = self.conn()?;
        db_tasks::get_task(&conn, task_id)
    }

    pub async fn get_task_result(&self, task_id: &str) -> Result<Option<TaskResultEnvelope>> {
        let conn = self.conn()?;
        db_tasks::get_result(&conn, task_id, Utc::now())
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let conn = self.conn()?;
        db_tasks::queue_stats(&conn)
    }

    /// Queue depth for one class; the fan-out job reads this for backpressure.
    pub async fn queue_depth(&self, class: QueueClass) -> Result<usize> {
        Ok(self.queue_stats().await?.queued_for(class))
    }

    /// Returns expired in-flight tasks to their queues (late acknowledgement:
    /// a crashed worker's task becomes visible again after its lease ends).
    pub async fn reap_expired_leases(&mut self) -> Result<usize> {
        let conn = self.conn()?;
        let count = db_tasks::reap_expired_leases(&conn, Utc::now())?;
        if count > 0 {
            debug!("Requeued {} tasks with expired leases", count);
        }
        Ok(count)
    }

    /// Records an undecodable task payload for inspection.
    pub async fn dead_letter_task(
        &mut self,
        task_id: &str,
        payload: &serde_json::Value,
        reason: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        db_tasks::dead_letter(&conn, task_id, payload, reason)
    }

    pub async fn dead_letter_entries(&self) -> Result<Vec<DeadLetterEntry>> {
        let conn = self.conn()?;
        db_tasks::dead_letter_entries(&conn)
    }

    /// Drops task results past their TTL.
    pub async fn purge_expired_results(&mut self) -> Result<usize> {
        let conn = self.conn()?;
        db_tasks::purge_expired_results(&conn, Utc::now())
    }
}
