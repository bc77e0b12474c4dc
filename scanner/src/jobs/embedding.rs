//! Embedding jobs: per-article vectors and the batch backfill
//!
//! Embeddings are idempotent writes keyed on URL: a present vector is never
//! recomputed, so concurrent attempts either no-op or overwrite with the
//! latest value.

use serde_json::json;
use shared::model::SummaryStatus;
use shared::task::{JobPayload, QueueClass};
use tracing::{debug, info, warn};

use super::{JobContext, JobExecutor};
use crate::runtime::JobError;

/// Generates and stores the content embedding for one article.
pub(super) async fn content_embedding(
    exec: &JobExecutor,
    ctx: &JobContext,
    article_url: &str,
) -> Result<serde_json::Value, JobError> {
    let article = {
        let store = exec.store.read().await;
        store.get_article(article_url).await?
    };
    let Some(article) = article else {
        return Err(JobError::NotFound(format!("article {}", article_url)));
    };

    if article.has_embedding() {
        debug!(article = %article_url, "Content embedding already exists");
        return Ok(json!({
            "success": true,
            "article_url": article_url,
            "status": "already_present",
        }));
    }

    let text = article.embedding_text();
    if text.is_empty() {
        return Err(JobError::Validation(format!(
            "no text content for embedding: {}",
            article_url
        )));
    }

    ctx.check_cancelled()?;

    let (embedding, model) = exec.ml.generate_embedding(&text, article_url).await?;
    let dimensions = embedding.len();

    {
        let mut store = exec.store.write().await;
        store
            .update_content_embedding(article_url, &embedding, &model)
            .await?;
    }

    info!(article = %article_url, dimensions, model = %model, "Content embedding stored");
    Ok(json!({
        "success": true,
        "article_url": article_url,
        "dimensions": dimensions,
        "model": model,
    }))
}

/// Generates and stores the summary embedding for one article.
///
/// Preconditions: a completed summary and no existing summary embedding.
/// An article that is not ready yet is skipped rather than failed: the
/// producer/consumer ordering between summary and embedding jobs is not
/// guaranteed, and the next sweep will pick it up.
pub(super) async fn summary_embedding(
    exec: &JobExecutor,
    ctx: &JobContext,
    article_url: &str,
) -> Result<serde_json::Value, JobError> {
    let article = {
        let store = exec.store.read().await;
        store.get_article(article_url).await?
    };
    let Some(article) = article else {
        return Err(JobError::NotFound(format!("article {}", article_url)));
    };

    if article.summary_status != SummaryStatus::Completed {
        debug!(article = %article_url, "Summary not completed yet, skipping embedding");
        return Ok(json!({
            "success": true,
            "article_url": article_url,
            "status": "skipped_summary_not_completed",
        }));
    }

    if article.has_summary_embedding() {
        debug!(article = %article_url, "Summary embedding already exists");
        return Ok(json!({
            "success": true,
            "article_url": article_url,
            "status": "already_present",
        }));
    }

    let Some(summary) = article.summary.as_deref().filter(|s| !s.trim().is_empty()) else {
        return Err(JobError::Validation(format!(
            "completed summary is empty: {}",
            article_url
        )));
    };

    ctx.check_cancelled()?;

    let (embedding, model) = exec.ml.generate_embedding(summary, article_url).await?;
    let dimensions = embedding.len();

    {
        let mut store = exec.store.write().await;
        store
            .update_summary_embedding(article_url, &embedding, &model)
            .await?;
    }

    info!(article = %article_url, dimensions, model = %model, "Summary embedding stored");
    Ok(json!({
        "success": true,
        "article_url": article_url,
        "dimensions": dimensions,
        "model": model,
    }))
}

/// Backfill: queue individual embedding jobs for every article missing a
/// content or summary embedding, up to the batch size per kind.
pub(super) async fn backfill(
    exec: &JobExecutor,
    ctx: &JobContext,
    batch_size: usize,
) -> Result<serde_json::Value, JobError> {
    info!(batch_size, "Starting embedding backfill");

    let (missing_content, missing_summary) = {
        let store = exec.store.read().await;
        (
            store.articles_missing_content_embedding(batch_size).await?,
            store.articles_missing_summary_embedding(batch_size).await?,
        )
    };

    ctx.check_cancelled()?;

    let mut queued_content = 0usize;
    let mut queued_summary = 0usize;

    for article in &missing_content {
        match exec
            .runtime
            .submit(
                JobPayload::ContentEmbedding {
                    article_url: article.url.clone(),
                },
                QueueClass::Normal,
                4,
                None,
            )
            .await
        {
            Ok(_) => queued_content += 1,
            Err(e) => warn!(article = %article.url, "Failed to queue content embedding: {:#}", e),
        }
    }

    for article in &missing_summary {
        match exec
            .runtime
            .submit(
                JobPayload::SummaryEmbedding {
                    article_url: article.url.clone(),
                },
                QueueClass::Normal,
                4,
                None,
            )
            .await
        {
            Ok(_) => queued_summary += 1,
            Err(e) => warn!(article = %article.url, "Failed to queue summary embedding: {:#}", e),
        }
    }

    info!(
        queued_content,
        queued_summary, "Embedding backfill queued jobs"
    );
    Ok(json!({
        "success": true,
        "content_embeddings_queued": queued_content,
        "summary_embeddings_queued": queued_summary,
    }))
}
