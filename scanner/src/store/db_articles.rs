//! Article collection: upsert-by-URL and derived-state updates
//!
//! The article row is wide on purpose: readability metrics are flat scalar
//! columns, while the embedding vectors are JSON text columns. Upserts only
//! replace content fields; the summary and embedding blocks are written by
//! their own jobs and survive re-scans untouched.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use shared::model::{Article, ReadabilityMetrics, SummaryStatus};
use tracing::{info, warn};

/// Create the articles table and its lookup indexes
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            url TEXT PRIMARY KEY,

            -- Content
            title TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            cleaned_text TEXT NOT NULL DEFAULT '',
            host TEXT,
            origin TEXT NOT NULL DEFAULT '',
            publication_date INTEGER,
            publication_date_estimated INTEGER NOT NULL DEFAULT 0,
            analyzed_at INTEGER,

            -- Readability metrics
            words INTEGER NOT NULL DEFAULT 0,
            sentences INTEGER NOT NULL DEFAULT 0,
            syllables INTEGER NOT NULL DEFAULT 0,
            complex_words INTEGER NOT NULL DEFAULT 0,
            avg_words_per_sentence REAL NOT NULL DEFAULT 0,
            avg_syllables_per_word REAL NOT NULL DEFAULT 0,
            flesch_reading_ease REAL NOT NULL DEFAULT 0,
            flesch_kincaid_grade REAL NOT NULL DEFAULT 0,
            smog_index REAL NOT NULL DEFAULT 0,
            automated_readability_index REAL NOT NULL DEFAULT 0,

            -- Summary block
            summary TEXT,
            summary_status TEXT NOT NULL DEFAULT 'absent',
            summary_model TEXT,
            prompt_version TEXT,
            summary_generated_at INTEGER,
            summary_error TEXT,

            -- Content embedding block
            embedding TEXT,
            embedding_model TEXT,
            embedding_updated_at INTEGER,

            -- Summary embedding block
            summary_embedding TEXT,
            summary_embedding_model TEXT,
            summary_embedding_updated_at INTEGER
        )
        "#,
        [],
    )
    .context("Failed to create articles table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_articles_summary_status
         ON articles(summary_status)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_articles_publication
         ON articles(publication_date)",
        [],
    )?;

    Ok(())
}

const ARTICLE_COLUMNS: &str = "url, title, content, cleaned_text, host, origin, \
     publication_date, publication_date_estimated, analyzed_at, \
     words, sentences, syllables, complex_words, \
     avg_words_per_sentence, avg_syllables_per_word, \
     flesch_reading_ease, flesch_kincaid_grade, smog_index, automated_readability_index, \
     summary, summary_status, summary_model, prompt_version, summary_generated_at, summary_error, \
     embedding, embedding_model, embedding_updated_at, \
     summary_embedding, summary_embedding_model, summary_embedding_updated_at";

fn opt_ts(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

fn opt_vec(value: Option<String>) -> Result<Option<Vec<f32>>> {
    match value {
        None => Ok(None),
        Some(raw) => {
            let parsed: Vec<f32> =
                serde_json::from_str(&raw).context("Failed to decode embedding column")?;
            Ok(Some(parsed))
        }
    }
}

fn row_to_article(row: &Row<'_>) -> rusqlite::Result<(Article, Option<String>, Option<String>)> {
    let article = Article {
        url: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        cleaned_text: row.get(3)?,
        host: row.get(4)?,
        origin: row.get(5)?,
        publication_date: opt_ts(row.get(6)?),
        publication_date_estimated: row.get::<_, i64>(7)? != 0,
        analyzed_at: opt_ts(row.get(8)?),
        readability: ReadabilityMetrics {
            words: row.get(9)?,
            sentences: row.get(10)?,
            syllables: row.get(11)?,
            complex_words: row.get(12)?,
            avg_words_per_sentence: row.get(13)?,
            avg_syllables_per_word: row.get(14)?,
            flesch_reading_ease: row.get(15)?,
            flesch_kincaid_grade: row.get(16)?,
            smog_index: row.get(17)?,
            automated_readability_index: row.get(18)?,
        },
        summary: row.get(19)?,
        summary_status: SummaryStatus::parse(&row.get::<_, String>(20)?)
            .unwrap_or(SummaryStatus::Absent),
        summary_model: row.get(21)?,
        prompt_version: row.get(22)?,
        summary_generated_at: opt_ts(row.get(23)?),
        summary_error: row.get(24)?,
        embedding: None,
        embedding_model: row.get(26)?,
        embedding_updated_at: opt_ts(row.get(27)?),
        summary_embedding: None,
        summary_embedding_model: row.get(29)?,
        summary_embedding_updated_at: opt_ts(row.get(30)?),
    };
    // Embedding JSON is decoded outside the rusqlite row mapper so a corrupt
    // column surfaces as an error instead of a panic.
    let embedding_raw: Option<String> = row.get(25)?;
    let summary_embedding_raw: Option<String> = row.get(28)?;
    Ok((article, embedding_raw, summary_embedding_raw))
}

fn finish_article(
    (mut article, embedding_raw, summary_embedding_raw): (
        Article,
        Option<String>,
        Option<String>,
    ),
) -> Result<Article> {
    article.embedding = opt_vec(embedding_raw)?;
    article.summary_embedding = opt_vec(summary_embedding_raw)?;
    Ok(article)
}

/// Upsert an article keyed on URL. Returns `true` when a new row was created.
///
/// Content fields are replaced; derived state is preserved. Publication dates
/// follow the earlier-wins rule: an article ingested without a feed date gets
/// the current time (flagged as estimated), and a later re-scan may only
/// replace a stored date with an earlier one.
pub fn upsert_article(conn: &Connection, article: &Article) -> Result<bool> {
    let existing: Option<(Option<i64>, i64)> = conn
        .query_row(
            "SELECT publication_date, publication_date_estimated FROM articles WHERE url = ?1",
            params![article.url],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let now = Utc::now();
    let incoming_date = article.publication_date.map(|d| d.timestamp());

    match existing {
        None => {
            // Initial ingest: a missing feed date is stamped with now() and
            // flagged so a real date can later replace it.
            let (date, estimated) = match incoming_date {
                Some(ts) => (ts, false),
                None => (now.timestamp(), true),
            };

            conn.execute(
                r#"
                INSERT INTO articles (
                    url, title, content, cleaned_text, host, origin,
                    publication_date, publication_date_estimated, analyzed_at,
                    words, sentences, syllables, complex_words,
                    avg_words_per_sentence, avg_syllables_per_word,
                    flesch_reading_ease, flesch_kincaid_grade, smog_index,
                    automated_readability_index, summary_status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                          ?13, ?14, ?15, ?16, ?17, ?18, ?19, 'absent')
                "#,
                params![
                    article.url,
                    article.title,
                    article.content,
                    article.cleaned_text,
                    article.host,
                    article.origin,
                    date,
                    estimated as i64,
                    now.timestamp(),
                    article.readability.words,
                    article.readability.sentences,
                    article.readability.syllables,
                    article.readability.complex_words,
                    article.readability.avg_words_per_sentence,
                    article.readability.avg_syllables_per_word,
                    article.readability.flesch_reading_ease,
                    article.readability.flesch_kincaid_grade,
                    article.readability.smog_index,
                    article.readability.automated_readability_index,
                ],
            )?;
            Ok(true)
        }
        Some((stored_date, stored_estimated)) => {
            // Earlier date wins. A feed date that post-dates the stored value
            // is flagged rather than written, because ingest-stamped dates
            // have been observed to drift into the future once feeds start
            // supplying real timestamps.
            let (date, estimated): (Option<i64>, bool) = match (stored_date, incoming_date) {
                (Some(stored), Some(incoming)) if incoming < stored => (Some(incoming), false),
                (Some(stored), Some(incoming)) if incoming > stored => {
                    if stored_estimated != 0 {
                        warn!(
                            url = %article.url,
                            "Feed date {} post-dates estimated ingest date {}; keeping stored value",
                            incoming, stored
                        );
                    }
                    (Some(stored), stored_estimated != 0)
                }
                (Some(stored), _) => (Some(stored), stored_estimated != 0),
                (None, incoming) => (incoming, false),
            };

            conn.execute(
                r#"
                UPDATE articles SET
                    title = ?2, content = ?3, cleaned_text = ?4, host = ?5,
                    origin = ?6, publication_date = ?7,
                    publication_date_estimated = ?8, analyzed_at = ?9,
                    words = ?10, sentences = ?11, syllables = ?12,
                    complex_words = ?13, avg_words_per_sentence = ?14,
                    avg_syllables_per_word = ?15, flesch_reading_ease = ?16,
                    flesch_kincaid_grade = ?17, smog_index = ?18,
                    automated_readability_index = ?19
                WHERE url = ?1
                "#,
                params![
                    article.url,
                    article.title,
                    article.content,
                    article.cleaned_text,
                    article.host,
                    article.origin,
                    date,
                    estimated as i64,
                    now.timestamp(),
                    article.readability.words,
                    article.readability.sentences,
                    article.readability.syllables,
                    article.readability.complex_words,
                    article.readability.avg_words_per_sentence,
                    article.readability.avg_syllables_per_word,
                    article.readability.flesch_reading_ease,
                    article.readability.flesch_kincaid_grade,
                    article.readability.smog_index,
                    article.readability.automated_readability_index,
                ],
            )?;
            Ok(false)
        }
    }
}

pub fn get_article(conn: &Connection, url: &str) -> Result<Option<Article>> {
    let sql = format!("SELECT {} FROM articles WHERE url = ?1", ARTICLE_COLUMNS);
    let row = conn
        .query_row(&sql, params![url], row_to_article)
        .optional()?;
    row.map(finish_article).transpose()
}

/// Persist a completed summary and clear any previous error.
pub fn complete_summary(
    conn: &Connection,
    url: &str,
    summary: &str,
    model: &str,
    prompt_version: &str,
) -> Result<bool> {
    let changed = conn.execute(
        r#"
        UPDATE articles SET
            summary = ?2,
            summary_status = 'completed',
            summary_model = ?3,
            prompt_version = ?4,
            summary_generated_at = ?5,
            summary_error = NULL
        WHERE url = ?1
        "#,
        params![url, summary, model, prompt_version, Utc::now().timestamp()],
    )?;
    if changed > 0 {
        info!(url = %url, model = %model, "Summary stored");
    }
    Ok(changed > 0)
}

pub fn set_summary_status(
    conn: &Connection,
    url: &str,
    status: SummaryStatus,
    error: Option<&str>,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE articles SET summary_status = ?2, summary_error = ?3 WHERE url = ?1",
        params![url, status.as_str(), error],
    )?;
    Ok(changed > 0)
}

pub fn update_content_embedding(
    conn: &Connection,
    url: &str,
    embedding: &[f32],
    model: &str,
) -> Result<bool> {
    let encoded = serde_json::to_string(embedding)?;
    let changed = conn.execute(
        "UPDATE articles SET embedding = ?2, embedding_model = ?3,
         embedding_updated_at = ?4 WHERE url = ?1",
        params![url, encoded, model, Utc::now().timestamp()],
    )?;
    Ok(changed > 0)
}

pub fn update_summary_embedding(
    conn: &Connection,
    url: &str,
    embedding: &[f32],
    model: &str,
) -> Result<bool> {
    let encoded = serde_json::to_string(embedding)?;
    let changed = conn.execute(
        "UPDATE articles SET summary_embedding = ?2, summary_embedding_model = ?3,
         summary_embedding_updated_at = ?4 WHERE url = ?1",
        params![url, encoded, model, Utc::now().timestamp()],
    )?;
    Ok(changed > 0)
}

fn query_articles(conn: &Connection, where_clause: &str, limit: Option<usize>) -> Result<Vec<Article>> {
    let mut sql = format!(
        "SELECT {} FROM articles WHERE {} ORDER BY url ASC",
        ARTICLE_COLUMNS, where_clause
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_article)?;

    let mut articles = Vec::new();
    for row in rows {
        articles.push(finish_article(row?)?);
    }
    Ok(articles)
}

/// Articles the summary backlog sweep should pick up: no completed summary,
/// not currently being processed, and with some content to summarize.
pub fn articles_missing_summary(conn: &Connection, limit: usize) -> Result<Vec<Article>> {
    query_articles(
        conn,
        "summary_status IN ('absent', 'pending', 'failed')
         AND (length(cleaned_text) > 0 OR length(content) > 0)",
        Some(limit),
    )
}

pub fn articles_missing_content_embedding(conn: &Connection, limit: usize) -> Result<Vec<Article>> {
    query_articles(conn, "embedding IS NULL", Some(limit))
}

pub fn articles_missing_summary_embedding(conn: &Connection, limit: usize) -> Result<Vec<Article>> {
    query_articles(
        conn,
        "summary_status = 'completed' AND summary_embedding IS NULL",
        Some(limit),
    )
}

/// Stable URL order keeps the greedy rolling grouping deterministic for
/// identical inputs.
pub fn articles_with_embedding(conn: &Connection) -> Result<Vec<Article>> {
    query_articles(conn, "embedding IS NOT NULL", None)
}
