//! Scan jobs: fan-out trigger, per-source scan, manual refresh
//!
//! The fan-out trigger queues one scan per configured source with staggered
//! start times so the upstream fetchers never see the whole source list at
//! once. Each scan that creates new articles submits the downstream job
//! triple (summary, embedding, topic analysis) explicitly.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use shared::scan::ScanOutcome;
use shared::task::{JobPayload, QueueClass};
use tracing::{debug, info, warn};

use super::{JobContext, JobExecutor};
use crate::runtime::JobError;

/// Low-priority fan-out: one staggered scan task per source.
pub(super) async fn scan_trigger(
    exec: &JobExecutor,
    ctx: &JobContext,
) -> Result<serde_json::Value, JobError> {
    info!("Triggering scheduled scans for all sources");

    let source_urls = {
        let store = exec.store.read().await;
        store.source_urls().await?
    };

    if source_urls.is_empty() {
        info!("No sources configured for scanning");
        return Ok(json!({
            "success": true,
            "sources_queued": 0,
            "message": "No sources to scan",
        }));
    }

    ctx.check_cancelled()?;

    // Backpressure: when the normal queue is already deep, push the whole
    // schedule further out instead of piling on.
    let backlog = {
        let store = exec.store.read().await;
        store.queue_depth(QueueClass::Normal).await?
    };
    let mut stagger = exec.config.scan_stagger_seconds;
    if backlog > exec.config.backlog_soft_cap {
        warn!(
            backlog,
            soft_cap = exec.config.backlog_soft_cap,
            "Normal queue backlog above soft cap, doubling scan stagger"
        );
        stagger *= 2;
    }

    let now = Utc::now();
    let mut queued = 0usize;
    let mut submit_failures = 0usize;

    for (index, source_url) in source_urls.iter().enumerate() {
        let not_before = now + ChronoDuration::seconds((stagger * index as u64) as i64);
        let submit = exec
            .runtime
            .submit(
                JobPayload::ScanSource {
                    source_url: source_url.clone(),
                },
                QueueClass::Normal,
                5,
                Some(not_before),
            )
            .await;

        // One failed submission does not stop the fan-out; report partial
        // submission instead.
        match submit {
            Ok(task_id) => {
                debug!(source = %source_url, task_id = %task_id, "Queued scan in {}s", stagger * index as u64);
                queued += 1;
            }
            Err(e) => {
                warn!(source = %source_url, "Failed to queue scan: {:#}", e);
                submit_failures += 1;
            }
        }
    }

    let total_duration = stagger * source_urls.len().saturating_sub(1) as u64;
    info!(
        queued,
        submit_failures, total_duration, "Scheduled scan trigger completed"
    );

    Ok(json!({
        "success": true,
        "sources_queued": queued,
        "submit_failures": submit_failures,
        "stagger_seconds": stagger,
        "total_duration_seconds": total_duration,
    }))
}

/// Normal-priority scan of one source.
pub(super) async fn scan_source(
    exec: &JobExecutor,
    ctx: &JobContext,
    source_url: &str,
) -> Result<serde_json::Value, JobError> {
    let source_name = {
        let store = exec.store.read().await;
        store
            .get_source_by_url(source_url)
            .await?
            .map(|s| s.name)
            .unwrap_or_else(|| source_url.to_string())
    };

    run_scan(exec, ctx, source_url, &source_name).await
}

/// High-priority manual refresh, resolved by source id.
pub(super) async fn manual_refresh(
    exec: &JobExecutor,
    ctx: &JobContext,
    source_id: i64,
    source_url: &str,
) -> Result<serde_json::Value, JobError> {
    info!(source_id, source = %source_url, "Manual refresh requested");

    let source_name = {
        let store = exec.store.read().await;
        store
            .get_source_by_id(source_id)
            .await?
            .map(|s| s.name)
            .unwrap_or_else(|| source_url.to_string())
    };

    run_scan(exec, ctx, source_url, &source_name).await
}

/// Shared scan body: run the pipeline, advance the source freshness stamp on
/// success, and chain the downstream job triple for every new article.
async fn run_scan(
    exec: &JobExecutor,
    ctx: &JobContext,
    source_url: &str,
    source_name: &str,
) -> Result<serde_json::Value, JobError> {
    ctx.check_cancelled()?;
    debug!(task_id = %ctx.task_id, source = %source_url, "Scan job starting");

    let output = exec
        .scanner
        .scan_source(&exec.store, source_url, source_name, Some(ctx.cancel.clone()))
        .await;

    if let Some(error) = &output.report.error {
        // Feed-level failure: surface as retryable so the scan policy
        // (120s/240s/480s) applies. last_refreshed is success-only, so a
        // failed attempt does not advance it.
        return Err(JobError::Upstream(error.clone()));
    }

    {
        let mut store = exec.store.write().await;
        store.touch_source_refreshed(source_url).await?;
    }

    ctx.check_cancelled()?;

    for article_url in &output.new_articles {
        spawn_article_jobs(exec, article_url).await;
    }

    if output.report.has_high_failure_rate() {
        warn!(
            source = %source_name,
            scanned = output.report.stats.scanned,
            total = output.report.stats.total,
            failure_rate = output.report.stats.failure_rate(),
            diagnosis = output.report.diagnosis.as_deref().unwrap_or(""),
            "Source scan completed with high failures"
        );
    }

    let outcome = ScanOutcome::from(&output.report);
    Ok(serde_json::to_value(&outcome).map_err(anyhow::Error::from)?)
}

/// The explicit new-article chain: summary (4), content embedding (3), topic
/// analysis (2), all on the normal queue.
async fn spawn_article_jobs(exec: &JobExecutor, article_url: &str) {
    let jobs = [
        (
            JobPayload::Summarize {
                article_url: article_url.to_string(),
            },
            4u8,
        ),
        (
            JobPayload::ContentEmbedding {
                article_url: article_url.to_string(),
            },
            3u8,
        ),
        (
            JobPayload::TopicAnalysis {
                article_url: article_url.to_string(),
            },
            2u8,
        ),
    ];

    for (payload, priority) in jobs {
        let name = payload.name();
        if let Err(e) = exec
            .runtime
            .submit(payload, QueueClass::Normal, priority, None)
            .await
        {
            // A failed child submission is logged, not fatal: the periodic
            // sweeps will pick the article up later.
            warn!(
                article = %article_url,
                job = name.as_str(),
                "Failed to queue follow-up job: {:#}",
                e
            );
        }
    }
    debug!(article = %article_url, "Queued follow-up job triple");
}
