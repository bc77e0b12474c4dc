//! Daily-topic builder
//!
//! Rebuilds the daily topic collection for the trailing window. Pairwise
//! grouping is delegated to the ML service at a stricter threshold than the
//! rolling pipeline: the daily view should surface only major events, so
//! precision beats recall. The collection swap is atomic; a failed rebuild
//! leaves the previous snapshot intact.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use shared::model::{ArticleRef, DailyTopic, SummaryStatus};
use shared::utils::truncate_chars;
use tracing::{info, warn};

use super::{JobContext, JobExecutor};
use crate::provider::ChatMessage;
use crate::runtime::JobError;

/// Total cap on concatenated summaries per combined-summary request.
const COMBINED_SUMMARY_CAP: usize = 4000;

pub(super) async fn rebuild_daily_topics(
    exec: &JobExecutor,
    ctx: &JobContext,
) -> Result<serde_json::Value, JobError> {
    info!("Starting daily topics generation");
    let started = Utc::now();

    let response = exec
        .ml
        .generate_daily_topics(
            exec.config.daily_window_days,
            exec.config.daily_similarity_threshold,
            exec.config.daily_min_group_size,
            exec.config.daily_max_articles,
        )
        .await?;

    if !response.success {
        return Err(JobError::Upstream(
            response
                .error
                .unwrap_or_else(|| "ML service failed to generate topics".to_string()),
        ));
    }

    info!(
        groups = response.topic_groups.len(),
        articles_processed = response.articles_processed,
        articles_grouped = response.articles_grouped,
        "ML service returned topic groups"
    );

    if response.topic_groups.is_empty() {
        // Nothing met the criteria; the previous snapshot stays up rather
        // than replacing the daily view with an empty one.
        info!("No topic groups met the criteria");
        return Ok(json!({
            "success": true,
            "message": "No topic groups met the criteria",
            "topic_groups_created": 0,
            "articles_processed": response.articles_processed,
        }));
    }

    // Largest stories first; the topic id encodes the presentation rank.
    let mut ml_groups = response.topic_groups;
    ml_groups.sort_by(|a, b| b.articles.len().cmp(&a.articles.len()));

    let window_end = Utc::now();
    let window_start = window_end - ChronoDuration::days(exec.config.daily_window_days as i64);
    let date_tag = window_end.format("%Y%m%d").to_string();

    let mut topics: Vec<DailyTopic> = Vec::with_capacity(ml_groups.len());

    for (index, group) in ml_groups.iter().enumerate() {
        ctx.check_cancelled()?;

        let topic_id = format!("{}_{}", date_tag, index + 1);
        let articles: Vec<ArticleRef> = group
            .articles
            .iter()
            .map(|article| ArticleRef {
                url: article
                    .get("url")
                    .and_then(|u| u.as_str())
                    .unwrap_or_default()
                    .to_string(),
                title: article
                    .get("title")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
                summary: article
                    .get("summary")
                    .and_then(|s| s.as_str())
                    .map(|s| s.to_string()),
                similarity: article.get("similarity_score").and_then(|s| s.as_f64()),
            })
            .collect();

        let (combined_summary, status, error) =
            generate_combined_summary(exec, &articles).await;

        info!(
            topic = %topic_id,
            articles = articles.len(),
            summary_status = status.as_str(),
            "Daily topic assembled"
        );

        topics.push(DailyTopic {
            topic_id,
            article_count: articles.len(),
            articles,
            combined_summary,
            combined_summary_status: status,
            combined_summary_error: error,
            created_at: Utc::now(),
            window_start,
            window_end,
        });
    }

    ctx.check_cancelled()?;

    // Atomic swap: delete-many + insert-many in one transaction. Partial
    // progress is never visible to readers.
    {
        let mut store = exec.store.write().await;
        store.replace_daily_topics(&topics).await?;
    }

    let duration = (Utc::now() - started).num_milliseconds() as f64 / 1000.0;
    info!(
        topic_groups = topics.len(),
        duration_seconds = duration,
        "Daily topics rebuild completed"
    );

    Ok(json!({
        "success": true,
        "topic_groups_created": topics.len(),
        "articles_processed": response.articles_processed,
        "articles_grouped": response.articles_grouped,
        "duration_seconds": duration,
    }))
}

/// Combined summary from the concatenated per-article summaries.
async fn generate_combined_summary(
    exec: &JobExecutor,
    articles: &[ArticleRef],
) -> (Option<String>, SummaryStatus, Option<String>) {
    let summaries: Vec<&str> = articles
        .iter()
        .filter_map(|a| a.summary.as_deref())
        .filter(|s| !s.trim().is_empty())
        .collect();

    if summaries.is_empty() {
        return (
            None,
            SummaryStatus::Failed,
            Some("No article summaries available".to_string()),
        );
    }

    let content = format!(
        "Topic group with {} related articles.\n\n{}",
        articles.len(),
        truncate_chars(&summaries.join("\n\n"), COMBINED_SUMMARY_CAP)
    );
    let messages = [
        ChatMessage::system(&exec.prompt.text),
        ChatMessage::user(content),
    ];

    match exec.gateway.generate(&messages).await {
        Some(response) => match response.text() {
            Some(summary) => (
                Some(summary.to_string()),
                SummaryStatus::Completed,
                None,
            ),
            None => (
                None,
                SummaryStatus::Failed,
                Some("Empty combined summary returned".to_string()),
            ),
        },
        None => {
            warn!("Provider unavailable for combined summary");
            (
                None,
                SummaryStatus::Failed,
                Some("Provider unavailable".to_string()),
            )
        }
    }
}
