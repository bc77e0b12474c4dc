//! Thin client for the remote embedding/topic ML service
//!
//! Request/response contracts only; the service owns the vector math. Calls
//! use a 30 second timeout except the daily-topics grouping, which compares
//! hundreds of articles pairwise and gets five minutes.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::runtime::JobError;

/// Cooling applied when the ML service rate-limits without a Retry-After.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

pub struct MlClient {
    base_url: String,
    client: reqwest::Client,
    request_timeout: Duration,
    daily_topics_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    text: &'a str,
    article_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingResponse {
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchEmbeddingResponse {
    #[serde(default)]
    pub total_articles: usize,
    #[serde(default)]
    pub processed: usize,
    #[serde(default)]
    pub failed: usize,
}

#[derive(Debug, Serialize)]
struct SimilarityRequest<'a> {
    article: &'a serde_json::Value,
    limit: usize,
    similarity_threshold: f64,
    exclude_self: bool,
}

#[derive(Debug, Deserialize)]
pub struct SimilarArticle {
    pub article: serde_json::Value,
    pub similarity_score: f64,
}

#[derive(Debug, Deserialize)]
pub struct SimilarityResponse {
    #[serde(default)]
    pub similar_articles: Vec<SimilarArticle>,
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Serialize)]
struct DailyTopicsRequest {
    days_back: u32,
    similarity_threshold: f64,
    min_group_size: usize,
    max_articles: usize,
}

#[derive(Debug, Deserialize)]
pub struct MlTopicGroup {
    #[serde(default)]
    pub articles: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct DailyTopicsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub topic_groups: Vec<MlTopicGroup>,
    #[serde(default)]
    pub articles_processed: usize,
    #[serde(default)]
    pub articles_grouped: usize,
    #[serde(default)]
    pub error: Option<String>,
}

impl MlClient {
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        daily_topics_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            request_timeout,
            daily_topics_timeout,
        })
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
        timeout: Duration,
    ) -> Result<Resp, JobError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "ML service request");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    JobError::Upstream(format!("ML service timeout on {}", path))
                } else {
                    JobError::Upstream(format!("ML service unreachable: {}", e))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            warn!("ML service rate limited on {}, retry after {:?}", path, retry_after);
            return Err(JobError::RateLimited { retry_after });
        }

        if !status.is_success() {
            return Err(JobError::Upstream(format!(
                "ML service returned {} on {}",
                status, path
            )));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| JobError::Upstream(format!("ML service bad response on {}: {}", path, e)))
    }

    /// Generates an embedding vector for the given text.
    pub async fn generate_embedding(
        &self,
        text: &str,
        article_id: &str,
    ) -> Result<(Vec<f32>, String), JobError> {
        let response: EmbeddingResponse = self
            .post(
                "/embeddings/generate",
                &EmbeddingRequest { text, article_id },
                self.request_timeout,
            )
            .await?;

        if !response.success || response.embedding.is_empty() {
            return Err(JobError::Upstream(
                "ML service failed to generate embedding".to_string(),
            ));
        }
        Ok((response.embedding, response.model_name))
    }

    /// Triggers a server-side batch embedding run.
    pub async fn batch_generate_embeddings(
        &self,
        batch_size: usize,
    ) -> Result<BatchEmbeddingResponse, JobError> {
        self.post(
            &format!("/embeddings/batch?batch_size={}", batch_size),
            &serde_json::json!({}),
            self.request_timeout,
        )
        .await
    }

    /// Finds articles similar to the given one.
    pub async fn find_similar_articles(
        &self,
        article: &serde_json::Value,
        limit: usize,
        similarity_threshold: f64,
    ) -> Result<Vec<SimilarArticle>, JobError> {
        let response: SimilarityResponse = self
            .post(
                "/similarity/search",
                &SimilarityRequest {
                    article,
                    limit,
                    similarity_threshold,
                    exclude_self: true,
                },
                self.request_timeout,
            )
            .await?;

        if !response.success {
            return Err(JobError::Upstream(
                "ML service similarity search failed".to_string(),
            ));
        }
        Ok(response.similar_articles)
    }

    /// Delegates daily-topic grouping to the ML service.
    pub async fn generate_daily_topics(
        &self,
        days_back: u32,
        similarity_threshold: f64,
        min_group_size: usize,
        max_articles: usize,
    ) -> Result<DailyTopicsResponse, JobError> {
        self.post(
            "/topics/generate-daily-topics",
            &DailyTopicsRequest {
                days_back,
                similarity_threshold,
                min_group_size,
                max_articles,
            },
            self.daily_topics_timeout,
        )
        .await
    }
}
