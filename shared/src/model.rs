//! Data model for articles, sources, and topic groups
//!
//! Articles are keyed by canonical URL: the upsert path in the scanner and the
//! summary/embedding jobs all address an article through its URL. Topic groups
//! come in two flavors: the rolling collection rewritten by the maintenance
//! pipeline and the daily collection rewritten atomically by the daily builder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing state of an article summary (or a group's shared summary).
///
/// The state advances `Absent -> Processing -> (Completed | Failed)`; a failed
/// summary may re-enter `Processing` when the job is re-enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    #[default]
    Absent,
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SummaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Absent => "absent",
            SummaryStatus::Pending => "pending",
            SummaryStatus::Processing => "processing",
            SummaryStatus::Completed => "completed",
            SummaryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "absent" | "" => Ok(SummaryStatus::Absent),
            "pending" => Ok(SummaryStatus::Pending),
            "processing" => Ok(SummaryStatus::Processing),
            "completed" => Ok(SummaryStatus::Completed),
            "failed" => Ok(SummaryStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid summary status: {}", s)),
        }
    }

    /// Whether a summary job should run for an article in this state.
    /// Completed summaries are never regenerated; failed ones may be retried.
    pub fn needs_summary(&self) -> bool {
        !matches!(self, SummaryStatus::Completed | SummaryStatus::Processing)
    }
}

/// Flat readability metrics produced by the text analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ReadabilityMetrics {
    pub words: u32,
    pub sentences: u32,
    pub syllables: u32,
    pub complex_words: u32,
    pub avg_words_per_sentence: f64,
    pub avg_syllables_per_word: f64,
    pub flesch_reading_ease: f64,
    pub flesch_kincaid_grade: f64,
    pub smog_index: f64,
    pub automated_readability_index: f64,
}

/// A single news item, uniquely identified by canonical URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Canonical article URL; the unique key across the whole system.
    pub url: String,
    pub title: String,
    /// Raw HTML content as fetched.
    pub content: String,
    /// Tag-stripped, whitespace-collapsed text.
    pub cleaned_text: String,
    /// Hostname of the article URL.
    pub host: Option<String>,
    /// URL of the feed the article came from.
    pub origin: String,
    /// Publication timestamp in UTC.
    pub publication_date: Option<DateTime<Utc>>,
    /// True when the publication date was stamped at ingest because the feed
    /// provided none. Such dates lose to any earlier feed-provided date.
    pub publication_date_estimated: bool,
    /// When the readability analysis last ran.
    pub analyzed_at: Option<DateTime<Utc>>,
    pub readability: ReadabilityMetrics,

    // Summary block
    pub summary: Option<String>,
    pub summary_status: SummaryStatus,
    pub summary_model: Option<String>,
    pub prompt_version: Option<String>,
    pub summary_generated_at: Option<DateTime<Utc>>,
    pub summary_error: Option<String>,

    // Content embedding block
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub embedding_updated_at: Option<DateTime<Utc>>,

    // Summary embedding block
    pub summary_embedding: Option<Vec<f32>>,
    pub summary_embedding_model: Option<String>,
    pub summary_embedding_updated_at: Option<DateTime<Utc>>,
}

impl Article {
    /// Creates a bare article for the given URL with every derived field empty.
    pub fn new(url: impl Into<String>, origin: impl Into<String>) -> Self {
        let url = url.into();
        let host = crate::utils::host_of(&url);
        Self {
            url,
            title: String::new(),
            content: String::new(),
            cleaned_text: String::new(),
            host,
            origin: origin.into(),
            publication_date: None,
            publication_date_estimated: false,
            analyzed_at: None,
            readability: ReadabilityMetrics::default(),
            summary: None,
            summary_status: SummaryStatus::Absent,
            summary_model: None,
            prompt_version: None,
            summary_generated_at: None,
            summary_error: None,
            embedding: None,
            embedding_model: None,
            embedding_updated_at: None,
            summary_embedding: None,
            summary_embedding_model: None,
            summary_embedding_updated_at: None,
        }
    }

    /// Text used to build the content embedding: title plus cleaned text,
    /// falling back to raw content when cleaning produced nothing.
    pub fn embedding_text(&self) -> String {
        let body = if self.cleaned_text.trim().is_empty() {
            self.content.as_str()
        } else {
            self.cleaned_text.as_str()
        };
        format!("{} {}", self.title, body).trim().to_string()
    }

    /// Content used for summary generation, preferring cleaned text.
    pub fn summary_source_text(&self) -> &str {
        if self.cleaned_text.trim().is_empty() {
            &self.content
        } else {
            &self.cleaned_text
        }
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }

    pub fn has_summary_embedding(&self) -> bool {
        self.summary_embedding
            .as_ref()
            .is_some_and(|e| !e.is_empty())
    }

    /// Whether the article can participate in daily topic grouping.
    pub fn daily_topic_eligible(&self) -> bool {
        self.summary_status == SummaryStatus::Completed && self.has_summary_embedding()
    }
}

/// A configured feed that yields articles on scan. Unique on URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Advanced only by a successful scan.
    pub last_refreshed: Option<DateTime<Utc>>,
}

/// Denormalized article reference carried inside a topic group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRef {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Similarity to the group anchor, where known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

/// A cluster of semantically close articles in the rolling topic collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicGroup {
    pub topic_id: String,
    pub articles: Vec<ArticleRef>,
    pub shared_summary: Option<String>,
    pub summary_status: SummaryStatus,
    pub created_at: DateTime<Utc>,
}

/// A topic group produced by the daily builder for the trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTopic {
    /// `yyyymmdd_i` where `i` is the 1-based group index of the rebuild.
    pub topic_id: String,
    pub article_count: usize,
    pub articles: Vec<ArticleRef>,
    pub combined_summary: Option<String>,
    pub combined_summary_status: SummaryStatus,
    pub combined_summary_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}
