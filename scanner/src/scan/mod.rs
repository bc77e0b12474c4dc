//! Per-source scan pipeline
//!
//! One scan: parse the feed, fetch every advertised article with bounded
//! concurrency, run readability analysis, and upsert by canonical URL. The
//! scan never fails because individual articles fail; it aggregates a
//! failure breakdown and reports. Feed-level failures (unreachable feed,
//! unparseable XML) do fail the scan and are retried by the task policy.

pub mod extract;
pub mod feed;
pub mod readability;

use chrono::Utc;
use futures_util::future::join_all;
use shared::config::ScannerConfig;
use shared::model::Article;
use shared::scan::{FailureKind, ScanReport};
use shared::utils::host_of;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::runtime::CancelFlag;
use crate::store::NewsStore;
use extract::ContentExtractor;
use feed::{FeedClient, FeedEntry};

/// Result of one source scan: the report plus the URLs of newly created
/// articles, which the scan job fans out into summary/embedding/topic jobs.
#[derive(Debug)]
pub struct ScanOutput {
    pub report: ScanReport,
    pub new_articles: Vec<String>,
}

enum ArticleOutcome {
    Stored { url: String, newly_created: bool },
    Failed(FailureKind),
    Skipped,
}

/// Orchestrates per-source scans.
pub struct SourceScanner {
    feed: FeedClient,
    extractor: ContentExtractor,
    config: Arc<ScannerConfig>,
}

impl SourceScanner {
    pub fn new(config: Arc<ScannerConfig>) -> anyhow::Result<Self> {
        Ok(Self {
            feed: FeedClient::new(config.request_timeout())?,
            extractor: ContentExtractor::new(config.request_timeout())?,
            config,
        })
    }

    /// Scans one source end to end.
    pub async fn scan_source(
        &self,
        store: &Arc<RwLock<NewsStore>>,
        source_url: &str,
        source_name: &str,
        cancel: Option<CancelFlag>,
    ) -> ScanOutput {
        let mut report = ScanReport::new(source_url, source_name);
        info!(source = %source_name, url = %source_url, "Starting source scan");

        if url::Url::parse(source_url).is_err() {
            report.error = Some("Invalid URL format".to_string());
            report.finalize();
            return ScanOutput {
                report,
                new_articles: Vec::new(),
            };
        }

        let parsed = match self
            .feed
            .fetch_and_parse(source_url, extract::random_user_agent())
            .await
        {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(source = %source_url, "Failed to parse RSS feed: {:#}", e);
                report.error = Some(format!("RSS parsing failed: {:#}", e));
                report.finalize();
                return ScanOutput {
                    report,
                    new_articles: Vec::new(),
                };
            }
        };

        if parsed.entries.is_empty() {
            info!(source = %source_url, "No articles found in feed");
            report.finalize();
            return ScanOutput {
                report,
                new_articles: Vec::new(),
            };
        }

        report.stats.total = parsed.entries.len();
        debug!(source = %source_url, total = parsed.entries.len(), "Feed entries found");

        // Bounded fan-out: at most max_concurrent_scans extractions in
        // flight for one source, with a smoothing delay that grows every
        // five articles.
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_scans));
        let total = parsed.entries.len();

        let tasks = parsed.entries.iter().enumerate().map(|(index, entry)| {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return ArticleOutcome::Skipped,
                };

                if let Some(flag) = &cancel {
                    if flag.load(Ordering::SeqCst) {
                        return ArticleOutcome::Skipped;
                    }
                }

                if index > 0 {
                    let delay = self.config.request_delay_ms * (index as u64 / 5);
                    if delay > 0 {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }

                self.process_article(store, source_url, entry, index, total)
                    .await
            }
        });

        let outcomes = join_all(tasks).await;

        let mut new_articles = Vec::new();
        for outcome in outcomes {
            match outcome {
                ArticleOutcome::Stored { url, newly_created } => {
                    report.stats.scanned += 1;
                    if newly_created {
                        new_articles.push(url);
                    }
                }
                ArticleOutcome::Failed(kind) => {
                    report.stats.record_failure(kind);
                }
                ArticleOutcome::Skipped => {
                    report.stats.record_failure(FailureKind::Other);
                }
            }
        }
        report.stats.failed = report.stats.total - report.stats.scanned;

        add_scan_warnings(&mut report);
        report.finalize();

        info!(
            source = %source_name,
            scanned = report.stats.scanned,
            total = report.stats.total,
            failed = report.stats.failed,
            "Scan completed"
        );

        ScanOutput {
            report,
            new_articles,
        }
    }

    /// Fetches, analyzes, and stores one article with per-article retry.
    async fn process_article(
        &self,
        store: &Arc<RwLock<NewsStore>>,
        source_url: &str,
        entry: &FeedEntry,
        index: usize,
        total: usize,
    ) -> ArticleOutcome {
        debug!(url = %entry.url, "Processing article {}/{}", index + 1, total);

        let mut attempt: u32 = 0;
        loop {
            match self
                .extractor
                .extract(&entry.url, extract::random_user_agent())
                .await
            {
                Ok(content) => {
                    return self
                        .analyze_and_store(store, source_url, entry, content)
                        .await;
                }
                Err(e) => {
                    // Server errors get exponential backoff; 429/403 are
                    // surfaced immediately as a failure class.
                    if e.is_retryable() && attempt < self.config.max_retries {
                        let backoff = Duration::from_secs(1u64 << attempt);
                        warn!(
                            url = %entry.url,
                            "Retrying HTTP {} (attempt {}/{}) in {:?}",
                            e.status.unwrap_or_default(),
                            attempt + 1,
                            self.config.max_retries + 1,
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }
                    debug!(url = %entry.url, "Article failed: {}", e);
                    return ArticleOutcome::Failed(e.kind);
                }
            }
        }
    }

    async fn analyze_and_store(
        &self,
        store: &Arc<RwLock<NewsStore>>,
        source_url: &str,
        entry: &FeedEntry,
        content: extract::ExtractedContent,
    ) -> ArticleOutcome {
        let mut article = Article::new(&entry.url, source_url);
        article.title = entry.title.clone();
        article.host = host_of(&entry.url);
        article.publication_date = entry.publication_date;
        article.readability = readability::analyze(&content.text);
        article.content = content.html;
        article.cleaned_text = content.text;
        article.analyzed_at = Some(Utc::now());

        let mut store = store.write().await;
        match store.upsert_article(&article).await {
            Ok(newly_created) => ArticleOutcome::Stored {
                url: entry.url.clone(),
                newly_created,
            },
            Err(e) => {
                error!(url = %entry.url, "Failed to store article: {:#}", e);
                ArticleOutcome::Failed(FailureKind::Other)
            }
        }
    }
}

/// Warning heuristics mirrored from the diagnosis thresholds; warnings are
/// advisory and accumulate alongside the single diagnosis string.
fn add_scan_warnings(report: &mut ScanReport) {
    let stats = report.stats;
    if stats.failed == 0 {
        return;
    }
    let failed = stats.failed as f64;

    if stats.http_403 as f64 > failed * 0.5 {
        report.add_warning("High number of 403 errors suggests bot detection. Consider user-agent rotation.");
    }
    if stats.http_429 as f64 > failed * 0.3 {
        report.add_warning("Rate limiting detected. Consider slower request timing.");
    }
    if stats.no_content as f64 > failed * 0.8 && report.source_url.to_lowercase().contains("google")
    {
        report.add_warning(
            "Google News feeds often contain redirect URLs. Consider direct publisher feeds.",
        );
    }
}
