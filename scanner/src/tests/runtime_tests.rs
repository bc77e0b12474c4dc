//! End-to-end tests for the task runtime: submit, dispatch, retry routing,
//! dead-lettering, waiting, and the admin facade. Jobs chosen here never
//! reach the network.

use crate::jobs::{JobExecutor, SummaryPrompt};
use crate::ml::MlClient;
use crate::provider::{ProviderClient, ProviderGateway, ProviderKind};
use crate::runtime::admin::QueueManager;
use crate::runtime::worker::WorkerPool;
use crate::runtime::TaskRuntime;
use crate::scan::SourceScanner;
use crate::store::NewsStore;
use chrono::{Duration as ChronoDuration, Utc};
use shared::config::ScannerConfig;
use shared::task::{JobPayload, QueueClass, TaskRecord, TaskState};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::RwLock;

struct Harness {
    _dir: TempDir,
    runtime: Arc<TaskRuntime>,
    gateway: Arc<ProviderGateway>,
    pool: WorkerPool,
    store: Arc<RwLock<NewsStore>>,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let mut news_store = NewsStore::new(dir.path(), 5).unwrap();
    news_store.initialize().await.unwrap();
    let store = Arc::new(RwLock::new(news_store));

    let mut config = ScannerConfig::default();
    config.worker_count = 2;
    let config = Arc::new(config);

    // Providers point nowhere; the jobs exercised here never call them.
    let primary = ProviderClient::new(
        ProviderKind::Local,
        "",
        "test-model",
        None,
        Duration::from_secs(1),
        Duration::from_millis(10),
        90,
    )
    .unwrap();
    let gateway = Arc::new(ProviderGateway::new(primary, None, false));
    let ml = Arc::new(
        MlClient::new(
            "http://127.0.0.1:1",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap(),
    );
    let scanner = Arc::new(SourceScanner::new(config.clone()).unwrap());
    let prompt = Arc::new(SummaryPrompt::load(None));

    let runtime = Arc::new(TaskRuntime::new(store.clone()));
    let executor = Arc::new(JobExecutor::new(
        store.clone(),
        config.clone(),
        runtime.clone(),
        gateway.clone(),
        ml,
        scanner,
        prompt,
    ));
    let pool = WorkerPool::new(runtime.clone(), executor, config);

    Harness {
        _dir: dir,
        runtime,
        gateway,
        pool,
        store,
    }
}

#[tokio::test]
async fn test_scan_trigger_with_no_sources_succeeds() {
    let h = harness().await;
    h.pool.start();

    let task_id = h
        .runtime
        .submit(JobPayload::ScanTrigger {}, QueueClass::Low, 3, None)
        .await
        .unwrap();

    let envelope = h
        .runtime
        .wait_for_result(&task_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(envelope.state, TaskState::Succeeded);
    let value = envelope.value.unwrap();
    assert_eq!(value["sources_queued"], 0);

    h.pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_summarize_missing_article_fails_terminally() {
    let h = harness().await;
    h.pool.start();

    let task_id = h
        .runtime
        .submit(
            JobPayload::Summarize {
                article_url: "https://nowhere.example/missing".to_string(),
            },
            QueueClass::Normal,
            4,
            None,
        )
        .await
        .unwrap();

    let envelope = h
        .runtime
        .wait_for_result(&task_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(envelope.state, TaskState::Failed);
    assert!(envelope.error.unwrap().contains("not found"));

    // NotFound is terminal: exactly one attempt, no retries recorded
    let record = h.runtime.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Failed);
    assert_eq!(record.attempt, 0);

    h.pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_embedding_backfill_on_empty_store() {
    let h = harness().await;
    h.pool.start();

    let task_id = h
        .runtime
        .submit(
            JobPayload::EmbeddingBackfill { batch_size: 50 },
            QueueClass::Low,
            2,
            None,
        )
        .await
        .unwrap();

    let envelope = h
        .runtime
        .wait_for_result(&task_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(envelope.state, TaskState::Succeeded);
    let value = envelope.value.unwrap();
    assert_eq!(value["content_embeddings_queued"], 0);
    assert_eq!(value["summary_embeddings_queued"], 0);

    h.pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_undecodable_payload_goes_to_dead_letter() {
    let h = harness().await;

    // Inject an envelope the dispatcher cannot decode
    let now = Utc::now();
    let record = TaskRecord {
        id: "bogus-task".to_string(),
        name: "reticulate_splines".to_string(),
        queue: QueueClass::Normal,
        priority: 5,
        state: TaskState::Queued,
        payload: serde_json::json!({ "task": "reticulate_splines", "count": 3 }),
        last_error: None,
        attempt: 0,
        not_before: now,
        submitted_at: now,
        completed_at: None,
    };
    {
        let mut store = h.store.write().await;
        store.enqueue_task(&record).await.unwrap();
    }

    h.pool.start();

    let envelope = h
        .runtime
        .wait_for_result("bogus-task", Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(envelope.state, TaskState::Failed);
    assert!(envelope.error.unwrap().contains("undecodable payload"));

    let store = h.store.read().await;
    let entries = store.dead_letter_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].task_id, "bogus-task");
    drop(store);

    h.pool.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_wait_timeout_does_not_cancel_task() {
    let h = harness().await;

    let task_id = h
        .runtime
        .submit(
            JobPayload::DailyTopicsRebuild {},
            QueueClass::Low,
            2,
            Some(Utc::now() + ChronoDuration::hours(1)),
        )
        .await
        .unwrap();

    let result = h
        .runtime
        .wait_for_result(&task_id, Duration::from_millis(600))
        .await;
    assert!(result.is_err());

    // The task is still queued, untouched by the waiter timeout
    let record = h.runtime.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Queued);
}

#[tokio::test]
async fn test_cancel_queued_task() {
    let h = harness().await;

    let task_id = h
        .runtime
        .submit(
            JobPayload::ScanSource {
                source_url: "https://slow.example/rss".to_string(),
            },
            QueueClass::Normal,
            5,
            Some(Utc::now() + ChronoDuration::hours(1)),
        )
        .await
        .unwrap();

    assert!(h.runtime.cancel(&task_id).await.unwrap());
    let record = h.runtime.get_status(&task_id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Cancelled);

    // Cancelling again is a no-op: terminal states are immutable
    assert!(!h.runtime.cancel(&task_id).await.unwrap());
}

#[tokio::test]
async fn test_queue_manager_facade() {
    let h = harness().await;
    let manager = QueueManager::new(h.runtime.clone(), h.gateway.clone());

    let response = manager.trigger_scheduled_scan().await;
    assert_eq!(response["success"], true);
    let task_id = response["task_id"].as_str().unwrap().to_string();

    let status = manager.get_task_status(&task_id).await;
    assert_eq!(status["success"], true);
    assert_eq!(status["status"], "queued");

    let stats = manager.get_queue_stats().await;
    assert_eq!(stats["success"], true);
    assert_eq!(stats["queues"]["low"]["queued"], 1);

    let unknown = manager.get_task_status("no-such-task").await;
    assert_eq!(unknown["success"], false);

    let cancel = manager.cancel_task(&task_id).await;
    assert_eq!(cancel["success"], true);

    let providers = manager.get_provider_status();
    assert_eq!(providers["success"], true);
    assert_eq!(providers["providers"]["primary"]["is_cooling"], false);
    assert!(providers["providers"]["fallback"].is_null());

    let reset = manager.reset_provider_rate_limits();
    assert_eq!(reset["success"], true);
}

#[tokio::test]
async fn test_manual_refresh_wait_returns_snapshot() {
    let h = harness().await;
    {
        let mut store = h.store.write().await;
        store
            .add_source("https://unreachable.invalid/rss", "Unreachable")
            .await
            .unwrap();
    }
    h.pool.start();

    let manager = QueueManager::new(h.runtime.clone(), h.gateway.clone());
    // The feed is unreachable, so the scan fails upstream and retries; the
    // waiter times out long before the retry schedule completes.
    let response = manager
        .queue_manual_refresh(1, "https://unreachable.invalid/rss", true, Duration::from_secs(2))
        .await;
    assert_eq!(response["success"], false);
    assert_eq!(response["completed"], false);
    assert!(response["task_id"].as_str().is_some());

    h.pool.stop(Duration::from_secs(5)).await;
}
