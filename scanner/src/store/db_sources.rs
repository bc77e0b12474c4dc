//! Source collection: configured feeds, unique on URL

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use shared::model::Source;
use tracing::debug;

/// Create the sources table
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_refreshed INTEGER
        )
        "#,
        [],
    )
    .context("Failed to create sources table")?;

    Ok(())
}

fn row_to_source(row: &Row<'_>) -> rusqlite::Result<Source> {
    let created: i64 = row.get(3)?;
    let updated: i64 = row.get(4)?;
    let refreshed: Option<i64> = row.get(5)?;
    Ok(Source {
        id: row.get(0)?,
        url: row.get(1)?,
        name: row.get(2)?,
        created_at: Utc.timestamp_opt(created, 0).single().unwrap_or_default(),
        updated_at: Utc.timestamp_opt(updated, 0).single().unwrap_or_default(),
        last_refreshed: refreshed.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
    })
}

/// Register a source, ignoring duplicates by URL. Returns the stored row.
pub fn add_source(conn: &Connection, url: &str, name: &str) -> Result<Source> {
    let now = Utc::now().timestamp();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO sources (url, name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![url, name, now],
    )?;

    if inserted > 0 {
        debug!(url = %url, name = %name, "Registered source");
    }

    get_source_by_url(conn, url)?
        .ok_or_else(|| anyhow::anyhow!("Source missing immediately after insert: {}", url))
}

pub fn get_source_by_url(conn: &Connection, url: &str) -> Result<Option<Source>> {
    Ok(conn
        .query_row(
            "SELECT id, url, name, created_at, updated_at, last_refreshed
             FROM sources WHERE url = ?1",
            params![url],
            row_to_source,
        )
        .optional()?)
}

pub fn get_source_by_id(conn: &Connection, id: i64) -> Result<Option<Source>> {
    Ok(conn
        .query_row(
            "SELECT id, url, name, created_at, updated_at, last_refreshed
             FROM sources WHERE id = ?1",
            params![id],
            row_to_source,
        )
        .optional()?)
}

/// Every configured feed URL, in registration order. The fan-out job uses
/// the position in this list to stagger scan start times.
pub fn source_urls(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT url FROM sources ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Stamp `last_refreshed`. Only successful scans call this; a failed scan
/// attempt leaves the previous value in place.
pub fn touch_source_refreshed(conn: &Connection, url: &str) -> Result<()> {
    let now = Utc::now().timestamp();
    conn.execute(
        "UPDATE sources SET last_refreshed = ?2, updated_at = ?2 WHERE url = ?1",
        params![url, now],
    )?;
    Ok(())
}
