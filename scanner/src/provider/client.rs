//! HTTP client for a single chat-completion provider
//!
//! Both providers speak an OpenAI-style chat completions protocol. The
//! difference the gateway cares about is the system role: the remote
//! provider does not accept one, so system content is folded into the first
//! user message before the request goes out.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use super::limiter::RateLimitState;
use super::{ChatChoice, ChatMessage, ChatResponse, ChatRole};

/// Which endpoint flavor this client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Local endpoint; accepts the system role directly.
    Local,
    /// Remote endpoint; system content is prepended to the first user message.
    Remote,
}

/// Fallback cooling window applied when a 429 carries no usable retry delay.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// One configured text-generation provider.
pub struct ProviderClient {
    kind: ProviderKind,
    name: String,
    url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
    state: Mutex<RateLimitState>,
}

// Wire format of an OpenAI-style completion response.
#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<serde_json::Value>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: String,
}

impl ProviderClient {
    pub fn new(
        kind: ProviderKind,
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
        min_interval: Duration,
        quota_soft_pct: u32,
    ) -> anyhow::Result<Self> {
        let model = model.into();
        let name = match kind {
            ProviderKind::Local => format!("local ({})", model),
            ProviderKind::Remote => format!("remote ({})", model),
        };

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            kind,
            name,
            url: url.into(),
            model,
            api_key,
            client,
            state: Mutex::new(RateLimitState::new(min_interval, quota_soft_pct)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a request to this provider is currently worth making:
    /// the endpoint is configured and the provider is not cooling.
    pub fn is_available(&self) -> bool {
        if self.url.is_empty() {
            return false;
        }
        if self.kind == ProviderKind::Remote
            && self.api_key.as_deref().unwrap_or("").is_empty()
        {
            return false;
        }
        !self.state.lock().unwrap().is_cooling(Utc::now())
    }

    /// Issues a completion request. Returns `None` on any failure; a 429
    /// moves the provider into cooling as a side effect.
    pub async fn generate(&self, messages: &[ChatMessage]) -> Option<ChatResponse> {
        // Respect the minimum request interval. The wait is computed under
        // the lock but slept outside it.
        let wait = self.state.lock().unwrap().interval_wait();
        if let Some(wait) = wait {
            debug!("Enforcing request interval: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }

        let outgoing = match self.kind {
            ProviderKind::Local => messages.to_vec(),
            ProviderKind::Remote => flatten_system_messages(messages),
        };

        let payload = serde_json::json!({
            "model": self.model,
            "messages": outgoing,
            "temperature": 0.7,
            "stream": false,
        });

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        self.state.lock().unwrap().note_request();

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!("{} request timeout", self.name);
                return None;
            }
            Err(e) => {
                warn!("{} request error: {}", self.name, e);
                return None;
            }
        };

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = retry_after_from_headers(&response);
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let retry_after = retry_after
                .or_else(|| parse_retry_delay(&body))
                .unwrap_or(DEFAULT_RETRY_AFTER);
            let quota_limit = parse_quota_limit(&body);

            warn!(
                "{} rate limited, cooling for {:?} (quota limit: {:?})",
                self.name, retry_after, quota_limit
            );
            self.state
                .lock()
                .unwrap()
                .note_rate_limited(Utc::now(), retry_after, quota_limit);
            return None;
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("{} returned status {}: {}", self.name, status, body);
            return None;
        }

        let wire: WireResponse = match response.json().await {
            Ok(wire) => wire,
            Err(e) => {
                warn!("{} returned unparseable response: {}", self.name, e);
                return None;
            }
        };

        debug!("{} request successful", self.name);
        Some(normalize_response(wire, &self.model))
    }

    pub fn rate_limit_status(&self) -> serde_json::Value {
        let state = self.state.lock().unwrap();
        let now = Utc::now();
        serde_json::json!({
            "name": self.name,
            "is_cooling": state.is_cooling(now),
            "cooling_remaining_seconds": state
                .cooling_remaining(now)
                .map(|d| d.as_secs()),
            "quota_used": state.quota_used(),
            "quota_limit": state.quota_limit(),
        })
    }

    pub fn reset_rate_limits(&self) {
        self.state.lock().unwrap().reset();
    }
}

/// Folds system content into the first user message for providers that do
/// not accept a `system` role.
pub(crate) fn flatten_system_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let system_text: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect();

    if system_text.is_empty() {
        return messages.to_vec();
    }

    let prefix = format!("System: {}", system_text.join("\n"));
    let mut merged = false;
    let mut out = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            ChatRole::System => {}
            ChatRole::User if !merged => {
                out.push(ChatMessage::user(format!(
                    "{}\n\n{}",
                    prefix, message.content
                )));
                merged = true;
            }
            _ => out.push(message.clone()),
        }
    }

    // No user message to merge into: the system content becomes one.
    if !merged {
        out.insert(0, ChatMessage::user(prefix));
    }
    out
}

fn normalize_response(wire: WireResponse, default_model: &str) -> ChatResponse {
    ChatResponse {
        choices: wire
            .choices
            .into_iter()
            .map(|choice| ChatChoice {
                message: ChatMessage {
                    role: match choice.message.role.as_deref() {
                        Some("system") => ChatRole::System,
                        Some("user") => ChatRole::User,
                        _ => ChatRole::Assistant,
                    },
                    content: choice.message.content,
                },
                finish_reason: choice.finish_reason,
            })
            .collect(),
        usage: wire.usage,
        model: wire.model.unwrap_or_else(|| default_model.to_string()),
    }
}

fn retry_after_from_headers(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Extracts a retry delay from a 429 body carrying RetryInfo details in the
/// form `{"error": {"details": [{"retryDelay": "46s"}]}}`.
pub(crate) fn parse_retry_delay(body: &serde_json::Value) -> Option<Duration> {
    let details = body.get("error")?.get("details")?.as_array()?;
    for detail in details {
        if let Some(delay) = detail.get("retryDelay").and_then(|d| d.as_str()) {
            let trimmed = delay.strip_suffix('s').unwrap_or(delay);
            if let Ok(seconds) = trimmed.parse::<f64>() {
                return Some(Duration::from_secs_f64(seconds.max(0.0)));
            }
        }
    }
    None
}

/// Extracts a quota ceiling from a 429 body, either from QuotaFailure
/// violation details or a `limit: N` fragment in the error message.
pub(crate) fn parse_quota_limit(body: &serde_json::Value) -> Option<u64> {
    let error = body.get("error")?;

    if let Some(details) = error.get("details").and_then(|d| d.as_array()) {
        for detail in details {
            if let Some(violations) = detail.get("violations").and_then(|v| v.as_array()) {
                for violation in violations {
                    if let Some(value) = violation.get("quotaValue").and_then(|q| q.as_str()) {
                        if let Ok(limit) = value.parse::<u64>() {
                            return Some(limit);
                        }
                    }
                }
            }
        }
    }

    let message = error.get("message")?.as_str()?;
    let after = message.split("limit:").nth(1)?;
    after.split_whitespace().next()?.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_merges_system_into_first_user() {
        let messages = vec![
            ChatMessage::system("You are an analyst."),
            ChatMessage::user("Summarize this."),
        ];
        let out = flatten_system_messages(&messages);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, ChatRole::User);
        assert!(out[0].content.starts_with("System: You are an analyst."));
        assert!(out[0].content.ends_with("Summarize this."));
    }

    #[test]
    fn test_flatten_without_system_is_identity() {
        let messages = vec![ChatMessage::user("Hello")];
        assert_eq!(flatten_system_messages(&messages), messages);
    }

    #[test]
    fn test_flatten_with_only_system_becomes_user() {
        let messages = vec![ChatMessage::system("Rules.")];
        let out = flatten_system_messages(&messages);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, ChatRole::User);
        assert_eq!(out[0].content, "System: Rules.");
    }

    #[test]
    fn test_parse_retry_delay_formats() {
        let body = serde_json::json!({
            "error": { "details": [ { "retryDelay": "46s" } ] }
        });
        assert_eq!(parse_retry_delay(&body), Some(Duration::from_secs(46)));

        let body = serde_json::json!({
            "error": { "details": [ { "retryDelay": "46.831699407s" } ] }
        });
        let delay = parse_retry_delay(&body).unwrap();
        assert!(delay > Duration::from_secs(46) && delay < Duration::from_secs(47));

        assert_eq!(parse_retry_delay(&serde_json::json!({})), None);
    }

    #[test]
    fn test_parse_quota_limit_from_violations() {
        let body = serde_json::json!({
            "error": {
                "details": [
                    { "violations": [ { "quotaValue": "200" } ] }
                ]
            }
        });
        assert_eq!(parse_quota_limit(&body), Some(200));
    }

    #[test]
    fn test_parse_quota_limit_from_message() {
        let body = serde_json::json!({
            "error": { "message": "Resource exhausted, limit: 150 requests" }
        });
        assert_eq!(parse_quota_limit(&body), Some(150));
    }
}
