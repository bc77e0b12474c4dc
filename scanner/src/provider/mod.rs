//! Text generation providers with local→remote fallback
//!
//! The gateway fronts two chat-completion providers: a primary (local)
//! endpoint and an optional remote fallback. Each provider owns its own
//! rate-limit state (cooling window, quota counters, minimum request
//! interval); the gateway's job is ordering and retry. All responses are
//! normalized to the OpenAI-style `{choices, usage, model}` shape regardless
//! of which provider produced them.

mod client;
mod limiter;

pub use client::{ProviderClient, ProviderKind};
pub use limiter::RateLimitState;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in the canonical ordered chat form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Normalized completion choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Normalized completion response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
    pub model: String,
}

impl ChatResponse {
    /// Content of the first choice, trimmed; `None` when empty.
    pub fn text(&self) -> Option<&str> {
        let text = self.choices.first()?.message.content.trim();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Whole-sequence retry schedule: 5s, 10s, 20s.
const GATEWAY_MAX_ATTEMPTS: u32 = 3;
const GATEWAY_INITIAL_BACKOFF: Duration = Duration::from_secs(5);

/// Unified generation interface with fallback.
pub struct ProviderGateway {
    primary: ProviderClient,
    fallback: Option<ProviderClient>,
    fallback_enabled: bool,
}

impl ProviderGateway {
    pub fn new(
        primary: ProviderClient,
        fallback: Option<ProviderClient>,
        fallback_enabled: bool,
    ) -> Self {
        Self {
            primary,
            fallback,
            fallback_enabled,
        }
    }

    /// Generates a completion, trying primary then fallback, retrying the
    /// whole sequence with exponential backoff. Returns `None` when every
    /// attempt failed; rate-limit observations stay recorded on the clients
    /// so subsequent calls skip a cooling provider directly.
    pub async fn generate(&self, messages: &[ChatMessage]) -> Option<ChatResponse> {
        let mut backoff = GATEWAY_INITIAL_BACKOFF;

        for attempt in 1..=GATEWAY_MAX_ATTEMPTS {
            debug!(attempt, "Provider gateway attempt");

            if self.primary.is_available() {
                info!("Using {} for generation request", self.primary.name());
                match self.primary.generate(messages).await {
                    Some(response) => return Some(response),
                    None => warn!("{} returned no result", self.primary.name()),
                }
            } else {
                info!("{} is not available", self.primary.name());
            }

            if self.fallback_enabled {
                if let Some(fallback) = &self.fallback {
                    if fallback.is_available() {
                        info!("Falling back to {} for generation request", fallback.name());
                        match fallback.generate(messages).await {
                            Some(response) => return Some(response),
                            None => warn!("{} returned no result", fallback.name()),
                        }
                    } else {
                        warn!("{} is not available", fallback.name());
                    }
                }
            } else {
                debug!("Fallback to remote provider is disabled");
            }

            if attempt < GATEWAY_MAX_ATTEMPTS {
                info!("All providers failed, retrying in {:?}", backoff);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        error!("All providers failed or are unavailable after all retries");
        None
    }

    /// Rate-limit state of both providers, for logging and the admin surface.
    pub fn rate_limit_status(&self) -> serde_json::Value {
        serde_json::json!({
            "primary": self.primary.rate_limit_status(),
            "fallback": self.fallback.as_ref().map(|f| f.rate_limit_status()),
            "fallback_enabled": self.fallback_enabled,
        })
    }

    /// Clears cooling and quota state on both providers.
    pub fn reset_rate_limits(&self) {
        self.primary.reset_rate_limits();
        if let Some(fallback) = &self.fallback {
            fallback.reset_rate_limits();
        }
        info!("Rate limits reset for all providers");
    }
}
