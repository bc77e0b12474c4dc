//! Rolling and daily topic collections
//!
//! Both collections are rewritten wholesale: the rolling collection by the
//! maintenance pipeline, the daily collection by the daily builder. Each
//! rewrite runs delete-all + insert-all inside one transaction so readers
//! observe either the previous snapshot or the new one, never a mix.

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, Row};
use shared::model::{ArticleRef, DailyTopic, SummaryStatus, TopicGroup};
use tracing::info;

/// Create both topic tables
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS topics (
            topic_id TEXT PRIMARY KEY,
            articles TEXT NOT NULL,
            shared_summary TEXT,
            summary_status TEXT NOT NULL DEFAULT 'absent',
            created_at INTEGER NOT NULL
        )
        "#,
        [],
    )
    .context("Failed to create topics table")?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS daily_topics (
            topic_id TEXT PRIMARY KEY,
            article_count INTEGER NOT NULL,
            articles TEXT NOT NULL,
            combined_summary TEXT,
            combined_summary_status TEXT NOT NULL DEFAULT 'absent',
            combined_summary_error TEXT,
            created_at INTEGER NOT NULL,
            window_start INTEGER NOT NULL,
            window_end INTEGER NOT NULL
        )
        "#,
        [],
    )
    .context("Failed to create daily_topics table")?;

    Ok(())
}

fn decode_refs(raw: &str) -> Result<Vec<ArticleRef>> {
    serde_json::from_str(raw).context("Failed to decode topic article refs")
}

fn row_to_topic_group(row: &Row<'_>) -> rusqlite::Result<(TopicGroup, String)> {
    let created: i64 = row.get(4)?;
    let group = TopicGroup {
        topic_id: row.get(0)?,
        articles: Vec::new(),
        shared_summary: row.get(2)?,
        summary_status: SummaryStatus::parse(&row.get::<_, String>(3)?)
            .unwrap_or(SummaryStatus::Absent),
        created_at: Utc.timestamp_opt(created, 0).single().unwrap_or_default(),
    };
    Ok((group, row.get(1)?))
}

/// Replace the rolling topic collection in a single transaction.
pub fn replace_rolling_topics(conn: &Connection, groups: &[TopicGroup]) -> Result<()> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = (|| -> Result<()> {
        conn.execute("DELETE FROM topics", [])?;
        for group in groups {
            conn.execute(
                "INSERT INTO topics (topic_id, articles, shared_summary, summary_status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    group.topic_id,
                    serde_json::to_string(&group.articles)?,
                    group.shared_summary,
                    group.summary_status.as_str(),
                    group.created_at.timestamp(),
                ],
            )?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            info!("Rolling topic collection replaced with {} groups", groups.len());
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

fn query_rolling(conn: &Connection, where_clause: &str) -> Result<Vec<TopicGroup>> {
    let sql = format!(
        "SELECT topic_id, articles, shared_summary, summary_status, created_at
         FROM topics WHERE {} ORDER BY topic_id ASC",
        where_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_topic_group)?;

    let mut groups = Vec::new();
    for row in rows {
        let (mut group, raw_refs) = row?;
        group.articles = decode_refs(&raw_refs)?;
        groups.push(group);
    }
    Ok(groups)
}

pub fn rolling_topics(conn: &Connection) -> Result<Vec<TopicGroup>> {
    query_rolling(conn, "1=1")
}

pub fn rolling_topics_without_summary(conn: &Connection) -> Result<Vec<TopicGroup>> {
    query_rolling(
        conn,
        "shared_summary IS NULL OR summary_status != 'completed'",
    )
}

pub fn set_rolling_shared_summary(
    conn: &Connection,
    topic_id: &str,
    summary: Option<&str>,
    status: SummaryStatus,
) -> Result<()> {
    conn.execute(
        "UPDATE topics SET shared_summary = ?2, summary_status = ?3 WHERE topic_id = ?1",
        params![topic_id, summary, status.as_str()],
    )?;
    Ok(())
}

/// Replace the daily topic collection. All-or-nothing at the storage level:
/// on any failure the previous snapshot is left intact.
pub fn replace_daily_topics(conn: &Connection, topics: &[DailyTopic]) -> Result<()> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = (|| -> Result<()> {
        let deleted = conn.execute("DELETE FROM daily_topics", [])?;
        for topic in topics {
            conn.execute(
                r#"
                INSERT INTO daily_topics (
                    topic_id, article_count, articles, combined_summary,
                    combined_summary_status, combined_summary_error,
                    created_at, window_start, window_end
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    topic.topic_id,
                    topic.article_count as i64,
                    serde_json::to_string(&topic.articles)?,
                    topic.combined_summary,
                    topic.combined_summary_status.as_str(),
                    topic.combined_summary_error,
                    topic.created_at.timestamp(),
                    topic.window_start.timestamp(),
                    topic.window_end.timestamp(),
                ],
            )?;
        }
        info!(
            "Daily topics replaced: {} old groups deleted, {} inserted",
            deleted,
            topics.len()
        );
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Daily topics ordered largest group first, matching the presentation order.
pub fn daily_topics(conn: &Connection) -> Result<Vec<DailyTopic>> {
    let mut stmt = conn.prepare(
        "SELECT topic_id, article_count, articles, combined_summary,
                combined_summary_status, combined_summary_error,
                created_at, window_start, window_end
         FROM daily_topics ORDER BY article_count DESC, topic_id ASC",
    )?;

    let rows = stmt.query_map([], |row| {
        let created: i64 = row.get(6)?;
        let start: i64 = row.get(7)?;
        let end: i64 = row.get(8)?;
        let topic = DailyTopic {
            topic_id: row.get(0)?,
            article_count: row.get::<_, i64>(1)? as usize,
            articles: Vec::new(),
            combined_summary: row.get(3)?,
            combined_summary_status: SummaryStatus::parse(&row.get::<_, String>(4)?)
                .unwrap_or(SummaryStatus::Absent),
            combined_summary_error: row.get(5)?,
            created_at: Utc.timestamp_opt(created, 0).single().unwrap_or_default(),
            window_start: Utc.timestamp_opt(start, 0).single().unwrap_or_default(),
            window_end: Utc.timestamp_opt(end, 0).single().unwrap_or_default(),
        };
        Ok((topic, row.get::<_, String>(2)?))
    })?;

    let mut topics = Vec::new();
    for row in rows {
        let (mut topic, raw_refs) = row?;
        topic.articles = decode_refs(&raw_refs)?;
        topics.push(topic);
    }
    Ok(topics)
}
