//! Topic jobs: per-new-article analysis and the rolling topic pipeline
//!
//! Similarity math is delegated to the ML service; this module owns the
//! greedy anchor-and-mark grouping, the atomic rewrite of the rolling
//! collection, and shared-summary generation. Anchors iterate in stable URL
//! order so identical inputs produce identical groups.

use serde_json::json;
use shared::model::{ArticleRef, SummaryStatus, TopicGroup};
use shared::utils::truncate_chars;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::{JobContext, JobExecutor};
use crate::provider::ChatMessage;
use crate::runtime::JobError;

/// Similarity floor for the per-new-article neighbor lookup. Looser than the
/// rolling grouping threshold: this is exploratory logging, not group
/// formation.
const TOPIC_ANALYSIS_THRESHOLD: f64 = 0.7;
const TOPIC_ANALYSIS_LIMIT: usize = 10;

/// Candidate pool size per anchor during rolling grouping.
const GROUPING_CANDIDATE_LIMIT: usize = 20;

/// Per-article content cap inside a shared-summary request.
const SHARED_SUMMARY_ARTICLE_CAP: usize = 500;
/// Total content cap for one shared-summary request.
const SHARED_SUMMARY_TOTAL_CAP: usize = 4000;

/// Per-new-article analysis: make sure the embedding exists, then log the
/// nearest neighbors. Writes no topic groups itself.
pub(super) async fn topic_analysis(
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

    if !article.has_embedding() {
        let text = article.embedding_text();
        if text.is_empty() {
            return Err(JobError::Validation(format!(
                "no text content for embedding: {}",
                article_url
            )));
        }
        let (embedding, model) = exec.ml.generate_embedding(&text, article_url).await?;
        let mut store = exec.store.write().await;
        store
            .update_content_embedding(article_url, &embedding, &model)
            .await?;
        debug!(article = %article_url, "Generated missing embedding during topic analysis");
    }

    ctx.check_cancelled()?;

    let reference = json!({ "url": article.url, "title": article.title });
    let similar = exec
        .ml
        .find_similar_articles(&reference, TOPIC_ANALYSIS_LIMIT, TOPIC_ANALYSIS_THRESHOLD)
        .await?;

    info!(
        article = %article_url,
        similar_count = similar.len(),
        "Topic analysis found neighbors"
    );
    for neighbor in similar.iter().take(3) {
        debug!(
            article = %article_url,
            similarity = neighbor.similarity_score,
            neighbor = %neighbor.article.get("url").and_then(|u| u.as_str()).unwrap_or("?"),
            "Similar article"
        );
    }

    Ok(json!({
        "success": true,
        "article_url": article_url,
        "similar_count": similar.len(),
    }))
}

/// The weekly maintenance pipeline: embedding backfill, rolling grouping,
/// shared summaries. Sequential stages, one implementation, runs on the
/// reactor like every other job.
pub(super) async fn rolling_pipeline(
    exec: &JobExecutor,
    ctx: &JobContext,
) -> Result<serde_json::Value, JobError> {
    info!("Starting rolling topic pipeline");

    // Stage 1: let the ML service work through the embedding backlog so the
    // grouping below sees as many vectors as possible.
    let batch = match exec
        .ml
        .batch_generate_embeddings(exec.config.embedding_backfill_batch)
        .await
    {
        Ok(batch) => {
            info!(
                processed = batch.processed,
                failed = batch.failed,
                "Batch embedding stage completed"
            );
            Some(batch)
        }
        Err(e) => {
            // Grouping still works on whatever embeddings already exist.
            warn!("Batch embedding stage failed, continuing: {}", e);
            None
        }
    };

    ctx.check_cancelled()?;

    // Stage 2: greedy anchor-and-mark grouping.
    let groups = build_rolling_groups(exec, ctx).await?;
    let group_count = groups.len();

    {
        let mut store = exec.store.write().await;
        store.replace_rolling_topics(&groups).await?;
    }

    ctx.check_cancelled()?;

    // Stage 3: shared summaries for groups that lack one.
    let summary_stats = generate_shared_summaries(exec, ctx).await?;

    info!(group_count, "Rolling topic pipeline completed");
    Ok(json!({
        "success": true,
        "embeddings_processed": batch.map(|b| b.processed),
        "topic_groups": group_count,
        "shared_summaries": summary_stats,
    }))
}

/// Greedy single-pass grouping: each unprocessed article anchors a candidate
/// query; a group forms when, counting the anchor, it reaches the minimum
/// size. All members are marked processed so they cannot join later groups.
async fn build_rolling_groups(
    exec: &JobExecutor,
    ctx: &JobContext,
) -> Result<Vec<TopicGroup>, JobError> {
    let articles = {
        let store = exec.store.read().await;
        store.articles_with_embedding().await?
    };

    info!(candidates = articles.len(), "Grouping articles by topic");

    let mut processed: HashSet<String> = HashSet::new();
    let mut groups: Vec<TopicGroup> = Vec::new();

    for article in &articles {
        if processed.contains(&article.url) {
            continue;
        }
        ctx.check_cancelled()?;

        let reference = json!({ "url": article.url, "title": article.title });
        let similar = match exec
            .ml
            .find_similar_articles(
                &reference,
                GROUPING_CANDIDATE_LIMIT,
                exec.config.rolling_similarity_threshold,
            )
            .await
        {
            Ok(similar) => similar,
            Err(JobError::RateLimited { retry_after }) => {
                return Err(JobError::RateLimited { retry_after });
            }
            Err(e) => {
                warn!(anchor = %article.url, "Similarity search failed, skipping anchor: {}", e);
                continue;
            }
        };

        let members: Vec<&crate::ml::SimilarArticle> = similar
            .iter()
            .filter(|s| {
                s.article
                    .get("url")
                    .and_then(|u| u.as_str())
                    .is_some_and(|url| !processed.contains(url))
            })
            .collect();

        // The anchor counts toward the minimum group size.
        if members.len() + 1 < exec.config.rolling_min_group_size {
            continue;
        }

        let mut refs = vec![ArticleRef {
            url: article.url.clone(),
            title: article.title.clone(),
            summary: article.summary.clone(),
            similarity: None,
        }];
        processed.insert(article.url.clone());

        for member in members {
            let url = member
                .article
                .get("url")
                .and_then(|u| u.as_str())
                .unwrap_or_default()
                .to_string();
            processed.insert(url.clone());
            refs.push(ArticleRef {
                url,
                title: member
                    .article
                    .get("title")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
                summary: member
                    .article
                    .get("summary")
                    .and_then(|s| s.as_str())
                    .map(|s| s.to_string()),
                similarity: Some(member.similarity_score),
            });
        }

        groups.push(TopicGroup {
            topic_id: format!("topic_{}", groups.len() + 1),
            articles: refs,
            shared_summary: None,
            summary_status: SummaryStatus::Absent,
            created_at: chrono::Utc::now(),
        });
    }

    info!(
        groups = groups.len(),
        grouped_articles = processed.len(),
        "Rolling grouping completed"
    );
    Ok(groups)
}

/// Generates a shared summary for every rolling group lacking one.
async fn generate_shared_summaries(
    exec: &JobExecutor,
    ctx: &JobContext,
) -> Result<serde_json::Value, JobError> {
    let pending = {
        let store = exec.store.read().await;
        store.rolling_topics_without_summary().await?
    };

    let mut generated = 0usize;
    let mut failed = 0usize;

    for group in &pending {
        ctx.check_cancelled()?;

        let content = match shared_summary_content(exec, group).await {
            Some(content) => content,
            None => {
                warn!(topic = %group.topic_id, "No content found for shared summary");
                failed += 1;
                continue;
            }
        };

        let messages = [
            ChatMessage::system(&exec.prompt.text),
            ChatMessage::user(content),
        ];
        let summary = exec
            .gateway
            .generate(&messages)
            .await
            .and_then(|r| r.text().map(|t| t.to_string()));

        let mut store = exec.store.write().await;
        match summary {
            Some(summary) => {
                store
                    .set_rolling_shared_summary(
                        &group.topic_id,
                        Some(&summary),
                        SummaryStatus::Completed,
                    )
                    .await?;
                generated += 1;
            }
            None => {
                store
                    .set_rolling_shared_summary(&group.topic_id, None, SummaryStatus::Failed)
                    .await?;
                failed += 1;
            }
        }
    }

    info!(generated, failed, "Shared summary generation completed");
    Ok(json!({ "generated": generated, "failed": failed }))
}

/// Concatenated titles and capped per-article content for one group.
async fn shared_summary_content(exec: &JobExecutor, group: &TopicGroup) -> Option<String> {
    let store = exec.store.read().await;
    let mut parts: Vec<String> = Vec::new();

    for reference in &group.articles {
        let article = store.get_article(&reference.url).await.ok().flatten();
        let Some(article) = article else { continue };

        if !article.title.is_empty() {
            parts.push(format!("Title: {}", article.title));
        }
        let content = article.summary_source_text();
        if !content.trim().is_empty() {
            parts.push(format!(
                "Content: {}",
                truncate_chars(content, SHARED_SUMMARY_ARTICLE_CAP)
            ));
        }
    }

    if parts.is_empty() {
        return None;
    }
    Some(truncate_chars(&parts.join("\n\n"), SHARED_SUMMARY_TOTAL_CAP))
}
