//! Article content extraction
//!
//! Fetches the canonical article page and reduces it to readable text. The
//! error type carries the classified failure kind so the scan pipeline can
//! aggregate a per-source failure breakdown without re-inspecting errors.

use rand::Rng;
use regex::Regex;
use shared::scan::FailureKind;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Extraction failure with its classification.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ContentExtractionError {
    pub status: Option<u16>,
    pub kind: FailureKind,
    pub message: String,
}

impl ContentExtractionError {
    fn from_status(status: u16, url: &str) -> Self {
        Self {
            status: Some(status),
            kind: FailureKind::from_status(status),
            message: format!("HTTP {} fetching {}", status, url),
        }
    }

    /// Whether the per-article retry loop should try again: server errors
    /// only. 429/403 mean the source has deeper protection and retrying
    /// within the job would make it worse.
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Http500
    }
}

/// Extracted article content.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    /// Raw HTML as fetched.
    pub html: String,
    /// Tag-stripped, whitespace-collapsed text.
    pub text: String,
}

/// Fetches article pages with a shared HTTP client.
pub struct ContentExtractor {
    client: reqwest::Client,
    timeout: Duration,
}

impl ContentExtractor {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, timeout })
    }

    /// Fetches and cleans one article. Classifies every failure.
    pub async fn extract(
        &self,
        url: &str,
        user_agent: &str,
    ) -> Result<ExtractedContent, ContentExtractionError> {
        debug!(url = %url, "Extracting article content");

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ContentExtractionError {
                        status: None,
                        kind: FailureKind::Timeout,
                        message: format!("Timeout fetching {}", url),
                    }
                } else {
                    ContentExtractionError {
                        status: None,
                        kind: FailureKind::Other,
                        message: format!("Request error fetching {}: {}", url, e),
                    }
                }
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(ContentExtractionError::from_status(status, url));
        }

        let html = response.text().await.map_err(|e| ContentExtractionError {
            status: Some(status),
            kind: FailureKind::Other,
            message: format!("Failed to read body from {}: {}", url, e),
        })?;

        let text = clean_html_content(&html);
        if text.is_empty() {
            return Err(ContentExtractionError {
                status: Some(status),
                kind: FailureKind::NoContent,
                message: format!("No extractable content at {}", url),
            });
        }

        Ok(ExtractedContent { html, text })
    }
}

/// Strips markup down to readable text: script/style blocks removed, tags
/// dropped, common entities decoded, whitespace collapsed.
pub fn clean_html_content(html: &str) -> String {
    static SCRIPT_RE: OnceLock<Regex> = OnceLock::new();
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    static WS_RE: OnceLock<Regex> = OnceLock::new();

    let script_re = SCRIPT_RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)>").unwrap()
    });
    let tag_re = TAG_RE.get_or_init(|| Regex::new(r"(?s)<[^>]+>").unwrap());
    let ws_re = WS_RE.get_or_init(|| Regex::new(r"\s+").unwrap());

    let without_blocks = script_re.replace_all(html, " ");
    let without_tags = tag_re.replace_all(&without_blocks, " ");

    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    ws_re.replace_all(&decoded, " ").trim().to_string()
}

/// Browser user-agent strings rotated across article requests. Feeds behind
/// bot protection treat a fixed agent string as a crawler signature.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
];

/// Picks a random user agent for one request.
pub fn random_user_agent() -> &'static str {
    let index = rand::rng().random_range(0..USER_AGENTS.len());
    USER_AGENTS[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_html_strips_tags_and_scripts() {
        let html = r#"
            <html><head><style>body { color: red; }</style>
            <script>console.log("hi");</script></head>
            <body><h1>Headline</h1><p>First&nbsp;paragraph &amp; more.</p></body></html>
        "#;
        let text = clean_html_content(html);
        assert_eq!(text, "Headline First paragraph & more.");
    }

    #[test]
    fn test_clean_html_empty_page() {
        assert_eq!(clean_html_content("<html><body></body></html>"), "");
    }

    #[test]
    fn test_clean_html_collapses_whitespace() {
        let text = clean_html_content("<p>one</p>\n\n\t<p>two</p>");
        assert_eq!(text, "one two");
    }

    #[test]
    fn test_random_user_agent_is_from_pool() {
        for _ in 0..20 {
            assert!(USER_AGENTS.contains(&random_user_agent()));
        }
    }

    #[test]
    fn test_retryable_classification() {
        let err = ContentExtractionError::from_status(503, "https://a.example/x");
        assert!(err.is_retryable());
        assert_eq!(err.kind, FailureKind::Http500);

        let err = ContentExtractionError::from_status(429, "https://a.example/x");
        assert!(!err.is_retryable());
        let err = ContentExtractionError::from_status(403, "https://a.example/x");
        assert!(!err.is_retryable());
    }
}
