//! RSS/Atom feed fetching and entry extraction
//!
//! Parsing proper is delegated to feed-rs; this module fetches the document,
//! maps entries into the scanner's own shape, and probes the per-entry date
//! fields. feed-rs folds the format zoo (Atom `published`/`updated`, RSS
//! `pubDate`, Dublin Core and PRISM dates) into the `published` and
//! `updated` entry fields, so the probe order here is published first,
//! updated second.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use std::time::Duration;
use tracing::{debug, warn};

/// One feed entry, reduced to what the scan pipeline needs.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub url: String,
    pub title: String,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub publication_date: Option<DateTime<Utc>>,
}

/// A parsed feed: its title and the extracted entries.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

/// Fetches and parses feeds with a shared HTTP client.
pub struct FeedClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl FeedClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create feed HTTP client")?;
        Ok(Self { client, timeout })
    }

    /// Fetches the feed document and extracts its entries. Entries without a
    /// resolvable link are dropped with a warning.
    pub async fn fetch_and_parse(&self, feed_url: &str, user_agent: &str) -> Result<ParsedFeed> {
        let response = self
            .client
            .get(feed_url)
            .timeout(self.timeout)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .with_context(|| format!("Failed to fetch feed {}", feed_url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Feed {} returned status {}", feed_url, status);
        }

        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read feed body from {}", feed_url))?;

        let feed = feed_rs::parser::parse(body.as_ref())
            .with_context(|| format!("Failed to parse feed {}", feed_url))?;

        let title = feed.title.map(|t| t.content);
        let mut entries = Vec::with_capacity(feed.entries.len());
        for entry in feed.entries {
            match extract_entry(&entry) {
                Some(extracted) => entries.push(extracted),
                None => warn!(feed = %feed_url, entry_id = %entry.id, "Feed entry has no link, skipping"),
            }
        }

        debug!(feed = %feed_url, entries = entries.len(), "Feed parsed");
        Ok(ParsedFeed { title, entries })
    }
}

/// Maps a feed-rs entry into the scanner's shape. Returns `None` when the
/// entry carries no usable link.
pub fn extract_entry(entry: &Entry) -> Option<FeedEntry> {
    let url = entry
        .links
        .first()
        .map(|link| link.href.clone())
        .or_else(|| {
            // Some feeds put the permalink in the id field.
            if entry.id.starts_with("http://") || entry.id.starts_with("https://") {
                Some(entry.id.clone())
            } else {
                None
            }
        })?;

    Some(FeedEntry {
        url,
        title: entry
            .title
            .as_ref()
            .map(|t| t.content.clone())
            .unwrap_or_default(),
        summary: entry.summary.as_ref().map(|s| s.content.clone()),
        author: entry.authors.first().map(|a| a.name.clone()),
        tags: entry
            .categories
            .iter()
            .map(|c| c.label.clone().unwrap_or_else(|| c.term.clone()))
            .collect(),
        publication_date: entry_publication_date(entry),
    })
}

/// Probes the entry date fields in preference order: the explicit publication
/// date first, the last-updated stamp as a fallback. A missing date stays
/// `None`; the article upsert stamps ingest time and flags it as estimated.
pub fn entry_publication_date(entry: &Entry) -> Option<DateTime<Utc>> {
    entry.published.or(entry.updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_fixture(xml: &str) -> ParsedFeed {
        let feed = feed_rs::parser::parse(xml.as_bytes()).unwrap();
        let entries = feed
            .entries
            .iter()
            .filter_map(extract_entry)
            .collect::<Vec<_>>();
        ParsedFeed {
            title: feed.title.map(|t| t.content),
            entries,
        }
    }

    #[test]
    fn test_rss_pub_date_probing() {
        let feed = parse_fixture(
            r#"<?xml version="1.0"?>
            <rss version="2.0">
              <channel>
                <title>Example News</title>
                <item>
                  <title>First story</title>
                  <link>https://news.example.com/1</link>
                  <pubDate>Tue, 30 Sep 2025 19:50:52 GMT</pubDate>
                </item>
              </channel>
            </rss>"#,
        );

        assert_eq!(feed.title.as_deref(), Some("Example News"));
        assert_eq!(feed.entries.len(), 1);
        let entry = &feed.entries[0];
        assert_eq!(entry.url, "https://news.example.com/1");
        assert_eq!(entry.title, "First story");
        let date = entry.publication_date.expect("pubDate should parse");
        assert_eq!(date.to_rfc3339(), "2025-09-30T19:50:52+00:00");
    }

    #[test]
    fn test_atom_updated_fallback() {
        let feed = parse_fixture(
            r#"<?xml version="1.0"?>
            <feed xmlns="http://www.w3.org/2005/Atom">
              <title>Atom Feed</title>
              <id>urn:feed</id>
              <updated>2025-01-01T00:00:00Z</updated>
              <entry>
                <title>Entry</title>
                <id>urn:entry-1</id>
                <link href="https://news.example.com/atom/1"/>
                <updated>2025-02-02T12:00:00Z</updated>
              </entry>
            </feed>"#,
        );

        assert_eq!(feed.entries.len(), 1);
        let date = feed.entries[0].publication_date.unwrap();
        assert_eq!(date.to_rfc3339(), "2025-02-02T12:00:00+00:00");
    }

    #[test]
    fn test_entry_without_link_is_dropped() {
        let feed = parse_fixture(
            r#"<?xml version="1.0"?>
            <rss version="2.0">
              <channel>
                <title>Example</title>
                <item>
                  <title>No link here</title>
                </item>
              </channel>
            </rss>"#,
        );
        assert!(feed.entries.is_empty());
    }

    #[test]
    fn test_entry_missing_date_stays_none() {
        let feed = parse_fixture(
            r#"<?xml version="1.0"?>
            <rss version="2.0">
              <channel>
                <title>Example</title>
                <item>
                  <title>Dateless</title>
                  <link>https://news.example.com/2</link>
                </item>
              </channel>
            </rss>"#,
        );
        assert_eq!(feed.entries.len(), 1);
        assert!(feed.entries[0].publication_date.is_none());
    }
}
