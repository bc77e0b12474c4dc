//! Summary jobs: single-article summarization and the backlog sweep
//!
//! The single-article job is a small state machine over `summary_status`:
//! a completed summary is never regenerated (repeated submissions are safe),
//! a failure is recorded on the article and surfaced to the retry policy.

use serde_json::json;
use shared::model::SummaryStatus;
use shared::task::{JobPayload, QueueClass};
use tracing::{debug, info, warn};

use super::{JobContext, JobExecutor};
use crate::provider::ChatMessage;
use crate::runtime::JobError;

/// Generates a summary for one article.
pub(super) async fn summarize(
    exec: &JobExecutor,
    ctx: &JobContext,
    article_url: &str,
) -> Result<serde_json::Value, JobError> {
    info!(article = %article_url, "Generating summary");

    let article = {
        let store = exec.store.read().await;
        store.get_article(article_url).await?
    };
    let Some(article) = article else {
        return Err(JobError::NotFound(format!("article {}", article_url)));
    };

    // Idempotence: repeated submissions of a completed article are no-ops.
    if article.summary_status == SummaryStatus::Completed {
        if let Some(existing) = article.summary.as_deref().filter(|s| !s.is_empty()) {
            debug!(article = %article_url, "Article already has summary");
            return Ok(json!({
                "success": true,
                "article_url": article_url,
                "summary": existing,
                "status": "already_completed",
            }));
        }
    }

    {
        let mut store = exec.store.write().await;
        store
            .set_summary_status(article_url, SummaryStatus::Processing, None)
            .await?;
    }

    let content = article.summary_source_text();
    if content.trim().is_empty() {
        warn!(article = %article_url, "No content available for summary");
        let mut store = exec.store.write().await;
        store
            .set_summary_status(
                article_url,
                SummaryStatus::Failed,
                Some("No content available"),
            )
            .await?;
        return Err(JobError::Validation("no content available".to_string()));
    }

    ctx.check_cancelled()?;

    let user_content = if article.title.is_empty() {
        format!("Content: {}", content)
    } else {
        format!("Title: {}\n\nContent: {}", article.title, content)
    };
    let messages = [
        ChatMessage::system(&exec.prompt.text),
        ChatMessage::user(user_content),
    ];

    let response = exec.gateway.generate(&messages).await;

    match response {
        Some(response) => match response.text() {
            Some(summary) => {
                let summary = summary.to_string();
                let mut store = exec.store.write().await;
                store
                    .complete_summary(
                        article_url,
                        &summary,
                        &response.model,
                        &exec.prompt.version,
                    )
                    .await?;
                drop(store);

                // A fresh summary feeds the daily-topic pipeline through its
                // own embedding.
                if let Err(e) = exec
                    .runtime
                    .submit(
                        JobPayload::SummaryEmbedding {
                            article_url: article_url.to_string(),
                        },
                        QueueClass::Normal,
                        4,
                        None,
                    )
                    .await
                {
                    warn!(article = %article_url, "Failed to queue summary embedding: {:#}", e);
                }

                Ok(json!({
                    "success": true,
                    "article_url": article_url,
                    "summary": summary,
                    "model": response.model,
                    "prompt_version": exec.prompt.version,
                }))
            }
            None => {
                let mut store = exec.store.write().await;
                store
                    .set_summary_status(
                        article_url,
                        SummaryStatus::Failed,
                        Some("Empty summary returned from provider"),
                    )
                    .await?;
                Err(JobError::Upstream("empty summary".to_string()))
            }
        },
        None => {
            let error = "Provider unavailable after multiple retries";
            let mut store = exec.store.write().await;
            store
                .set_summary_status(article_url, SummaryStatus::Failed, Some(error))
                .await?;
            Err(JobError::Upstream(error.to_string()))
        }
    }
}

/// Periodic sweep: queue individual summary jobs for articles still missing
/// one. Runs below scan priority so fresh articles keep flowing.
pub(super) async fn backlog_sweep(
    exec: &JobExecutor,
    ctx: &JobContext,
    batch_size: usize,
) -> Result<serde_json::Value, JobError> {
    info!(batch_size, "Processing summary backlog");

    let articles = {
        let store = exec.store.read().await;
        store.articles_missing_summary(batch_size).await?
    };

    if articles.is_empty() {
        info!("No articles need summaries");
        return Ok(json!({
            "success": true,
            "articles_queued": 0,
            "message": "No articles need summaries",
        }));
    }

    ctx.check_cancelled()?;

    let mut queued = 0usize;
    for article in &articles {
        match exec
            .runtime
            .submit(
                JobPayload::Summarize {
                    article_url: article.url.clone(),
                },
                QueueClass::Normal,
                3,
                None,
            )
            .await
        {
            Ok(_) => queued += 1,
            Err(e) => warn!(article = %article.url, "Failed to queue summary: {:#}", e),
        }
    }

    info!(queued, "Summary backlog sweep completed");
    Ok(json!({
        "success": true,
        "articles_queued": queued,
    }))
}
