//! Tests for the persistence layer: articles, sources, topics, and the broker

use crate::store::NewsStore;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use shared::model::{Article, ArticleRef, DailyTopic, SummaryStatus, TopicGroup};
use shared::task::{JobPayload, QueueClass, TaskRecord, TaskState};
use tempfile::TempDir;

async fn test_store() -> (TempDir, NewsStore) {
    let temp_dir = TempDir::new().unwrap();
    let mut store = NewsStore::new(temp_dir.path(), 5).unwrap();
    store.initialize().await.unwrap();
    (temp_dir, store)
}

fn sample_article(url: &str) -> Article {
    let mut article = Article::new(url, "https://news.example.com/rss");
    article.title = "Sample headline".to_string();
    article.content = "<p>Sample body</p>".to_string();
    article.cleaned_text = "Sample body".to_string();
    article.publication_date = Some(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
    article
}

fn queued_record(id: &str, payload: JobPayload, queue: QueueClass, priority: u8) -> TaskRecord {
    let now = Utc::now();
    TaskRecord {
        id: id.to_string(),
        name: payload.name().as_str().to_string(),
        queue,
        priority,
        state: TaskState::Queued,
        payload: serde_json::to_value(&payload).unwrap(),
        last_error: None,
        attempt: 0,
        not_before: now,
        submitted_at: now,
        completed_at: None,
    }
}

fn scan_payload(url: &str) -> JobPayload {
    JobPayload::ScanSource {
        source_url: url.to_string(),
    }
}

// ---------------------------------------------------------------------
// Articles
// ---------------------------------------------------------------------

#[tokio::test]
async fn test_article_upsert_round_trip() {
    let (_dir, mut store) = test_store().await;
    let article = sample_article("https://news.example.com/a/1");

    let created = store.upsert_article(&article).await.unwrap();
    assert!(created);

    let read = store
        .get_article("https://news.example.com/a/1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read.url, article.url);
    assert_eq!(read.title, article.title);
    assert_eq!(read.cleaned_text, article.cleaned_text);
    assert_eq!(read.origin, article.origin);
    assert_eq!(read.publication_date, article.publication_date);
    assert!(!read.publication_date_estimated);
    assert_eq!(read.summary_status, SummaryStatus::Absent);
    assert!(read.analyzed_at.is_some());
}

#[tokio::test]
async fn test_rescan_preserves_derived_state() {
    let (_dir, mut store) = test_store().await;
    let url = "https://news.example.com/a/2";
    store.upsert_article(&sample_article(url)).await.unwrap();

    store
        .complete_summary(url, "A summary.", "test-model", "abcd1234")
        .await
        .unwrap();
    store
        .update_content_embedding(url, &[0.1, 0.2, 0.3], "mini-lm")
        .await
        .unwrap();

    // Re-scan: same URL, refreshed content
    let mut refreshed = sample_article(url);
    refreshed.title = "Updated headline".to_string();
    let created = store.upsert_article(&refreshed).await.unwrap();
    assert!(!created, "re-scan must not create a new article");

    let read = store.get_article(url).await.unwrap().unwrap();
    assert_eq!(read.title, "Updated headline");
    // Derived state untouched by the upsert
    assert_eq!(read.summary.as_deref(), Some("A summary."));
    assert_eq!(read.summary_status, SummaryStatus::Completed);
    assert_eq!(read.prompt_version.as_deref(), Some("abcd1234"));
    assert_eq!(read.embedding.as_deref(), Some(&[0.1, 0.2, 0.3][..]));
    assert_eq!(read.embedding_model.as_deref(), Some("mini-lm"));
}

#[tokio::test]
async fn test_missing_publication_date_stamped_and_flagged() {
    let (_dir, mut store) = test_store().await;
    let url = "https://news.example.com/a/3";
    let mut article = sample_article(url);
    article.publication_date = None;

    let before = Utc::now() - ChronoDuration::seconds(2);
    store.upsert_article(&article).await.unwrap();
    let after = Utc::now() + ChronoDuration::seconds(2);

    let read = store.get_article(url).await.unwrap().unwrap();
    let stamped = read.publication_date.unwrap();
    assert!(stamped > before && stamped < after);
    assert!(read.publication_date_estimated);
}

#[tokio::test]
async fn test_earlier_feed_date_replaces_estimated_date() {
    let (_dir, mut store) = test_store().await;
    let url = "https://news.example.com/a/4";
    let mut article = sample_article(url);
    article.publication_date = None;
    store.upsert_article(&article).await.unwrap();

    // The feed later supplies a real, earlier date
    let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    article.publication_date = Some(earlier);
    store.upsert_article(&article).await.unwrap();

    let read = store.get_article(url).await.unwrap().unwrap();
    assert_eq!(read.publication_date, Some(earlier));
    assert!(!read.publication_date_estimated);
}

#[tokio::test]
async fn test_later_feed_date_does_not_overwrite() {
    let (_dir, mut store) = test_store().await;
    let url = "https://news.example.com/a/5";
    let stored_date = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let mut article = sample_article(url);
    article.publication_date = Some(stored_date);
    store.upsert_article(&article).await.unwrap();

    article.publication_date = Some(stored_date + ChronoDuration::days(30));
    store.upsert_article(&article).await.unwrap();

    let read = store.get_article(url).await.unwrap().unwrap();
    assert_eq!(read.publication_date, Some(stored_date));
}

#[tokio::test]
async fn test_summary_status_flow() {
    let (_dir, mut store) = test_store().await;
    let url = "https://news.example.com/a/6";
    store.upsert_article(&sample_article(url)).await.unwrap();

    store
        .set_summary_status(url, SummaryStatus::Processing, None)
        .await
        .unwrap();
    let read = store.get_article(url).await.unwrap().unwrap();
    assert_eq!(read.summary_status, SummaryStatus::Processing);

    store
        .complete_summary(url, "Done.", "model-x", "deadbeef")
        .await
        .unwrap();
    let read = store.get_article(url).await.unwrap().unwrap();
    assert_eq!(read.summary_status, SummaryStatus::Completed);
    assert_eq!(read.summary.as_deref(), Some("Done."));
    assert!(read.summary_generated_at.is_some());
    assert!(read.summary_error.is_none());

    // Failure path records the error
    let url2 = "https://news.example.com/a/7";
    store.upsert_article(&sample_article(url2)).await.unwrap();
    store
        .set_summary_status(url2, SummaryStatus::Failed, Some("No content available"))
        .await
        .unwrap();
    let read = store.get_article(url2).await.unwrap().unwrap();
    assert_eq!(read.summary_status, SummaryStatus::Failed);
    assert_eq!(read.summary_error.as_deref(), Some("No content available"));
}

#[tokio::test]
async fn test_backlog_queries() {
    let (_dir, mut store) = test_store().await;

    store
        .upsert_article(&sample_article("https://news.example.com/b/1"))
        .await
        .unwrap();
    store
        .upsert_article(&sample_article("https://news.example.com/b/2"))
        .await
        .unwrap();
    store
        .complete_summary("https://news.example.com/b/2", "S", "m", "v")
        .await
        .unwrap();

    // b/1 needs a summary, b/2 does not
    let missing = store.articles_missing_summary(10).await.unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].url, "https://news.example.com/b/1");

    // Both miss content embeddings; only b/2 misses a summary embedding
    assert_eq!(
        store.articles_missing_content_embedding(10).await.unwrap().len(),
        2
    );
    let missing_summary_emb = store.articles_missing_summary_embedding(10).await.unwrap();
    assert_eq!(missing_summary_emb.len(), 1);
    assert_eq!(missing_summary_emb[0].url, "https://news.example.com/b/2");

    store
        .update_content_embedding("https://news.example.com/b/1", &[1.0, 0.0], "m")
        .await
        .unwrap();
    let with_embedding = store.articles_with_embedding().await.unwrap();
    assert_eq!(with_embedding.len(), 1);
    assert!(with_embedding[0].has_embedding());
}

// ---------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------

#[tokio::test]
async fn test_source_registration_unique_on_url() {
    let (_dir, mut store) = test_store().await;

    let first = store
        .add_source("https://news.example.com/rss", "Example News")
        .await
        .unwrap();
    let duplicate = store
        .add_source("https://news.example.com/rss", "Renamed")
        .await
        .unwrap();
    assert_eq!(first.id, duplicate.id);
    assert_eq!(duplicate.name, "Example News");

    store
        .add_source("https://other.example.com/rss", "Other")
        .await
        .unwrap();
    let urls = store.source_urls().await.unwrap();
    assert_eq!(
        urls,
        vec![
            "https://news.example.com/rss".to_string(),
            "https://other.example.com/rss".to_string()
        ]
    );
}

#[tokio::test]
async fn test_last_refreshed_is_success_only() {
    let (_dir, mut store) = test_store().await;
    store
        .add_source("https://news.example.com/rss", "Example News")
        .await
        .unwrap();

    let source = store
        .get_source_by_url("https://news.example.com/rss")
        .await
        .unwrap()
        .unwrap();
    assert!(source.last_refreshed.is_none());

    store
        .touch_source_refreshed("https://news.example.com/rss")
        .await
        .unwrap();
    let source = store
        .get_source_by_url("https://news.example.com/rss")
        .await
        .unwrap()
        .unwrap();
    assert!(source.last_refreshed.is_some());
}

// ---------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------

fn sample_daily_topic(id: &str, count: usize) -> DailyTopic {
    let now = Utc::now();
    DailyTopic {
        topic_id: id.to_string(),
        article_count: count,
        articles: (0..count)
            .map(|i| ArticleRef {
                url: format!("https://news.example.com/{}/{}", id, i),
                title: format!("Article {}", i),
                summary: Some("s".to_string()),
                similarity: None,
            })
            .collect(),
        combined_summary: Some("combined".to_string()),
        combined_summary_status: SummaryStatus::Completed,
        combined_summary_error: None,
        created_at: now,
        window_start: now - ChronoDuration::days(7),
        window_end: now,
    }
}

#[tokio::test]
async fn test_daily_topics_atomic_replacement() {
    let (_dir, mut store) = test_store().await;

    let old: Vec<DailyTopic> = (1..=7)
        .map(|i| sample_daily_topic(&format!("20250101_{}", i), 5))
        .collect();
    store.replace_daily_topics(&old).await.unwrap();
    assert_eq!(store.daily_topics().await.unwrap().len(), 7);

    let new: Vec<DailyTopic> = (1..=4)
        .map(|i| sample_daily_topic(&format!("20250102_{}", i), 5 + i))
        .collect();
    store.replace_daily_topics(&new).await.unwrap();

    // Only the new snapshot is visible, never a mix
    let read = store.daily_topics().await.unwrap();
    assert_eq!(read.len(), 4);
    assert!(read.iter().all(|t| t.topic_id.starts_with("20250102_")));
    // Presentation order: largest group first
    assert_eq!(read[0].article_count, 9);
    assert_eq!(read[3].article_count, 6);
}

#[tokio::test]
async fn test_rolling_topics_shared_summary_update() {
    let (_dir, mut store) = test_store().await;

    let group = TopicGroup {
        topic_id: "topic_1".to_string(),
        articles: vec![
            ArticleRef {
                url: "https://news.example.com/t/1".to_string(),
                title: "One".to_string(),
                summary: None,
                similarity: None,
            },
            ArticleRef {
                url: "https://news.example.com/t/2".to_string(),
                title: "Two".to_string(),
                summary: None,
                similarity: Some(0.8),
            },
        ],
        shared_summary: None,
        summary_status: SummaryStatus::Absent,
        created_at: Utc::now(),
    };
    store.replace_rolling_topics(&[group]).await.unwrap();

    assert_eq!(store.rolling_topics_without_summary().await.unwrap().len(), 1);

    store
        .set_rolling_shared_summary("topic_1", Some("Shared."), SummaryStatus::Completed)
        .await
        .unwrap();
    assert!(store
        .rolling_topics_without_summary()
        .await
        .unwrap()
        .is_empty());

    let groups = store.rolling_topics().await.unwrap();
    assert_eq!(groups[0].shared_summary.as_deref(), Some("Shared."));
    assert_eq!(groups[0].articles.len(), 2);
    assert_eq!(groups[0].articles[1].similarity, Some(0.8));
}

// ---------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------

#[tokio::test]
async fn test_dispatch_order_class_before_priority() {
    let (_dir, mut store) = test_store().await;

    // A: high/5, B: normal/10, C: low/10; dispatch order must be A, B, C
    store
        .enqueue_task(&queued_record(
            "task-c",
            scan_payload("https://c.example/rss"),
            QueueClass::Low,
            10,
        ))
        .await
        .unwrap();
    store
        .enqueue_task(&queued_record(
            "task-b",
            scan_payload("https://b.example/rss"),
            QueueClass::Normal,
            10,
        ))
        .await
        .unwrap();
    store
        .enqueue_task(&queued_record(
            "task-a",
            scan_payload("https://a.example/rss"),
            QueueClass::High,
            5,
        ))
        .await
        .unwrap();

    let now = Utc::now();
    let first = store.pop_ready_task(now, 3600).await.unwrap().unwrap();
    let second = store.pop_ready_task(now, 3600).await.unwrap().unwrap();
    let third = store.pop_ready_task(now, 3600).await.unwrap().unwrap();
    assert_eq!(first.id, "task-a");
    assert_eq!(second.id, "task-b");
    assert_eq!(third.id, "task-c");
    assert!(store.pop_ready_task(now, 3600).await.unwrap().is_none());
}

#[tokio::test]
async fn test_priority_within_class_then_fifo() {
    let (_dir, mut store) = test_store().await;

    store
        .enqueue_task(&queued_record(
            "low-pri",
            scan_payload("https://1.example/rss"),
            QueueClass::Normal,
            2,
        ))
        .await
        .unwrap();
    store
        .enqueue_task(&queued_record(
            "high-pri-first",
            scan_payload("https://2.example/rss"),
            QueueClass::Normal,
            8,
        ))
        .await
        .unwrap();
    store
        .enqueue_task(&queued_record(
            "high-pri-second",
            scan_payload("https://3.example/rss"),
            QueueClass::Normal,
            8,
        ))
        .await
        .unwrap();

    let now = Utc::now();
    assert_eq!(
        store.pop_ready_task(now, 3600).await.unwrap().unwrap().id,
        "high-pri-first"
    );
    assert_eq!(
        store.pop_ready_task(now, 3600).await.unwrap().unwrap().id,
        "high-pri-second"
    );
    assert_eq!(
        store.pop_ready_task(now, 3600).await.unwrap().unwrap().id,
        "low-pri"
    );
}

#[tokio::test]
async fn test_not_before_gates_dispatch() {
    let (_dir, mut store) = test_store().await;

    let mut record = queued_record(
        "delayed",
        scan_payload("https://d.example/rss"),
        QueueClass::Normal,
        5,
    );
    record.not_before = Utc::now() + ChronoDuration::seconds(60);
    store.enqueue_task(&record).await.unwrap();

    assert!(store
        .pop_ready_task(Utc::now(), 3600)
        .await
        .unwrap()
        .is_none());

    // Visible once the clock passes not_before
    let later = Utc::now() + ChronoDuration::seconds(61);
    assert_eq!(
        store.pop_ready_task(later, 3600).await.unwrap().unwrap().id,
        "delayed"
    );
}

#[tokio::test]
async fn test_ack_success_stores_result_envelope() {
    let (_dir, mut store) = test_store().await;
    store
        .enqueue_task(&queued_record(
            "t1",
            scan_payload("https://s.example/rss"),
            QueueClass::Normal,
            5,
        ))
        .await
        .unwrap();

    let popped = store.pop_ready_task(Utc::now(), 3600).await.unwrap().unwrap();
    assert_eq!(popped.state, TaskState::Running);

    let value = serde_json::json!({ "scanned": 3, "total": 3 });
    assert!(store.ack_task_success("t1", &value, 3600).await.unwrap());

    let record = store.get_task("t1").await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Succeeded);

    let envelope = store.get_task_result("t1").await.unwrap().unwrap();
    assert_eq!(envelope.state, TaskState::Succeeded);
    assert_eq!(envelope.value.unwrap()["scanned"], 3);
}

#[tokio::test]
async fn test_retry_flow_and_exhaustion() {
    let (_dir, mut store) = test_store().await;
    store
        .enqueue_task(&queued_record(
            "t2",
            scan_payload("https://r.example/rss"),
            QueueClass::Normal,
            5,
        ))
        .await
        .unwrap();

    store.pop_ready_task(Utc::now(), 3600).await.unwrap().unwrap();
    let not_before = Utc::now() + ChronoDuration::seconds(120);
    assert!(store
        .ack_task_retry("t2", "HTTP 503", 1, not_before)
        .await
        .unwrap());

    let record = store.get_task("t2").await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Retrying);
    assert_eq!(record.attempt, 1);
    assert_eq!(record.last_error.as_deref(), Some("HTTP 503"));

    // Not dispatchable until its backoff passes
    assert!(store
        .pop_ready_task(Utc::now(), 3600)
        .await
        .unwrap()
        .is_none());
    let later = Utc::now() + ChronoDuration::seconds(121);
    let popped = store.pop_ready_task(later, 3600).await.unwrap().unwrap();
    assert_eq!(popped.attempt, 1);

    // Final failure preserves the error message
    assert!(store.ack_task_failed("t2", "HTTP 503", 3600).await.unwrap());
    let record = store.get_task("t2").await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Failed);
    assert_eq!(record.last_error.as_deref(), Some("HTTP 503"));
    let envelope = store.get_task_result("t2").await.unwrap().unwrap();
    assert_eq!(envelope.error.as_deref(), Some("HTTP 503"));
}

#[tokio::test]
async fn test_terminal_states_are_immutable() {
    let (_dir, mut store) = test_store().await;
    store
        .enqueue_task(&queued_record(
            "t3",
            scan_payload("https://i.example/rss"),
            QueueClass::Normal,
            5,
        ))
        .await
        .unwrap();

    store.pop_ready_task(Utc::now(), 3600).await.unwrap();
    store
        .ack_task_success("t3", &serde_json::json!({}), 3600)
        .await
        .unwrap();

    // No transition out of a terminal state
    assert!(!store.cancel_task("t3").await.unwrap());
    assert!(!store
        .ack_task_failed("t3", "too late", 3600)
        .await
        .unwrap());
    assert_eq!(
        store.get_task("t3").await.unwrap().unwrap().state,
        TaskState::Succeeded
    );
}

#[tokio::test]
async fn test_cancel_running_task_wins_over_ack() {
    let (_dir, mut store) = test_store().await;
    store
        .enqueue_task(&queued_record(
            "t4",
            scan_payload("https://c2.example/rss"),
            QueueClass::Normal,
            5,
        ))
        .await
        .unwrap();

    store.pop_ready_task(Utc::now(), 3600).await.unwrap();
    assert!(store.cancel_task("t4").await.unwrap());

    // The worker's late ack finds no running row
    assert!(!store
        .ack_task_success("t4", &serde_json::json!({}), 3600)
        .await
        .unwrap());
    assert_eq!(
        store.get_task("t4").await.unwrap().unwrap().state,
        TaskState::Cancelled
    );
}

#[tokio::test]
async fn test_lease_reaper_requeues_expired_tasks() {
    let (_dir, mut store) = test_store().await;
    store
        .enqueue_task(&queued_record(
            "t5",
            scan_payload("https://l.example/rss"),
            QueueClass::Normal,
            5,
        ))
        .await
        .unwrap();

    // Pop with a zero-second visibility timeout: the lease expires at once
    store.pop_ready_task(Utc::now(), 0).await.unwrap().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let reaped = store.reap_expired_leases().await.unwrap();
    assert_eq!(reaped, 1);

    // Visible again without losing identity
    let popped = store
        .pop_ready_task(Utc::now(), 3600)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(popped.id, "t5");
}

#[tokio::test]
async fn test_queue_stats_and_dead_letter() {
    let (_dir, mut store) = test_store().await;
    store
        .enqueue_task(&queued_record(
            "q1",
            scan_payload("https://q.example/rss"),
            QueueClass::Normal,
            5,
        ))
        .await
        .unwrap();
    store
        .enqueue_task(&queued_record(
            "q2",
            JobPayload::ScanTrigger {},
            QueueClass::Low,
            3,
        ))
        .await
        .unwrap();

    let stats = store.queue_stats().await.unwrap();
    assert_eq!(stats.normal_queued, 1);
    assert_eq!(stats.low_queued, 1);
    assert_eq!(stats.high_queued, 0);

    store
        .dead_letter_task(
            "bogus-1",
            &serde_json::json!({ "task": "reticulate_splines" }),
            "undecodable payload",
        )
        .await
        .unwrap();
    let stats = store.queue_stats().await.unwrap();
    assert_eq!(stats.dead_letter, 1);

    let entries = store.dead_letter_entries().await.unwrap();
    assert_eq!(entries[0].task_id, "bogus-1");
    assert_eq!(entries[0].reason, "undecodable payload");
}
