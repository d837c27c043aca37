//! HTTP adapters for the generative and search provider interfaces.
//!
//! The generative adapter speaks the chat-completions wire shape most hosted
//! gateways expose; the search adapter speaks a minimal JSON search API.
//! Neither adapter retries — retry policy belongs to the pipeline's fallback
//! chain, not the transport.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::*;
use super::{GenerativeProvider, SearchProvider};

/// Maximum allowed response content length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed input characters (~125k tokens).
const MAX_INPUT_CHARS: usize = 500_000;

// =============================================================================
// GENERATIVE ADAPTER
// =============================================================================

/// Chat-completions adapter for the generative provider interface.
#[derive(Debug, Clone)]
pub struct ChatCompletionsAdapter {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl ChatCompletionsAdapter {
    /// Create from API key, endpoint and model id.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Self::with_config(api_key, base_url, model, Duration::from_secs(120))
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("GENERATIVE_API_KEY")
            .map_err(|_| ProviderError::config("GENERATIVE_API_KEY not set"))?;

        let base_url = std::env::var("GENERATIVE_BASE_URL")
            .map_err(|_| ProviderError::config("GENERATIVE_BASE_URL not set"))?;

        let model = std::env::var("GENERATIVE_MODEL")
            .map_err(|_| ProviderError::config("GENERATIVE_MODEL not set"))?;

        let timeout = std::env::var("GENERATIVE_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(120));

        Self::with_config(api_key, base_url, model, timeout)
    }

    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = build_client(&api_key.into(), timeout)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Check if message indicates a refusal.
    fn is_refusal(msg: &str) -> bool {
        let l = msg.trim_start().to_lowercase();
        let first_line = l.lines().next().unwrap_or("");

        const PREFIXES: &[&str] = &[
            "refus",
            "i cannot",
            "i can't",
            "i won't",
            "i will not",
            "i am unable to",
            "i'm unable to",
            "unable to comply",
            "unable to assist",
            "unable to help",
            "unable to provide",
        ];

        PREFIXES.iter().any(|p| first_line.starts_with(p)) || l.contains("request was refused")
    }
}

// =============================================================================
// GENERATIVE API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    error: Option<ApiError>,
    /// Legacy top-level citation list some providers attach to grounded
    /// completions.
    #[serde(default)]
    citations: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    /// Structured grounding metadata, when the provider attaches it to the
    /// message rather than the top level.
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
    /// Legacy per-message citation list.
    #[serde(default)]
    citations: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}

#[derive(Deserialize)]
struct WebChunk {
    uri: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

/// Collect citations from whichever metadata shape the provider used.
///
/// Tolerates structured grounding chunks, per-message citation lists, and
/// top-level citation lists; absent metadata yields an empty list. Never
/// fails the request.
fn collect_citations(message: &ChoiceMessage, top_level: Option<&[String]>) -> Vec<String> {
    let mut out = Vec::new();

    if let Some(meta) = &message.grounding_metadata {
        for chunk in &meta.grounding_chunks {
            if let Some(uri) = chunk.web.as_ref().and_then(|w| w.uri.clone()) {
                if !uri.trim().is_empty() {
                    out.push(uri);
                }
            }
        }
    }

    if out.is_empty() {
        if let Some(cites) = &message.citations {
            out.extend(cites.iter().filter(|c| !c.trim().is_empty()).cloned());
        }
    }

    if out.is_empty() {
        if let Some(cites) = top_level {
            out.extend(cites.iter().filter(|c| !c.trim().is_empty()).cloned());
        }
    }

    out.dedup();
    out
}

#[async_trait]
impl GenerativeProvider for ChatCompletionsAdapter {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let total_chars = req.prompt.len() + req.system.as_deref().map_or(0, str::len);
        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let start = Instant::now();

        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(ApiMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ApiMessage {
            role: "user",
            content: &req.prompt,
        });

        let api_req = ChatApiRequest {
            model: &self.model,
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
            tools: req.web_search.then(|| {
                vec![ApiTool {
                    tool_type: "web_search",
                }]
            }),
        };

        let response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        let (status, ctx, body) = read_body(response, "generative").await?;

        if !status.is_success() {
            if let Ok(parsed) = serde_json::from_str::<ChatApiResponse>(&body) {
                if let Some(error) = parsed.error {
                    let message = error.message.unwrap_or_default();
                    let ctx = match error.code {
                        Some(code) => ctx.with_code(code),
                        None => ctx,
                    };
                    return Err(match status.as_u16() {
                        429 => ProviderError::rate_limited(Duration::from_secs(60), ctx),
                        _ => ProviderError::provider_with_context("generative", message, ctx),
                    });
                }
            }
            return Err(ProviderError::provider_with_context(
                "generative",
                format!("HTTP {}", status.as_u16()),
                ctx,
            ));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider("generative", format!("Invalid JSON: {e}"))
        })?;

        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            if Self::is_refusal(&message) {
                return Err(ProviderError::refused(message));
            }
            return Err(ProviderError::provider("generative", message));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ProviderError::provider("generative", "No choices in response"))?;

        let message = choice
            .message
            .ok_or_else(|| ProviderError::provider("generative", "No message in choice"))?;

        let mut text = message.content.clone().unwrap_or_default();
        if text.len() > MAX_RESPONSE_LEN {
            text.truncate(MAX_RESPONSE_LEN);
        }

        if Self::is_refusal(&text) {
            return Err(ProviderError::refused(text));
        }

        let citations = collect_citations(&message, parsed.citations.as_deref());

        Ok(GenerateResponse {
            text,
            citations,
            latency: start.elapsed(),
        })
    }
}

// =============================================================================
// SEARCH ADAPTER
// =============================================================================

/// JSON search API adapter for the search provider interface.
#[derive(Debug, Clone)]
pub struct SearchApiAdapter {
    client: reqwest::Client,
    base_url: String,
    max_results: usize,
}

impl SearchApiAdapter {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Self::with_config(api_key, base_url, Duration::from_secs(30), 8)
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("SEARCH_API_KEY")
            .map_err(|_| ProviderError::config("SEARCH_API_KEY not set"))?;
        let base_url = std::env::var("SEARCH_BASE_URL")
            .map_err(|_| ProviderError::config("SEARCH_BASE_URL not set"))?;
        Self::new(api_key, base_url)
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        max_results: usize,
    ) -> Result<Self, ProviderError> {
        let client = build_client(&api_key.into(), timeout)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            max_results,
        })
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct SearchApiRequest<'a> {
    query: &'a str,
    max_results: usize,
}

#[derive(Deserialize)]
struct SearchApiResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchApiResult>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct SearchApiResult {
    url: Option<String>,
    title: Option<String>,
    #[serde(default, alias = "snippet")]
    content: Option<String>,
}

#[async_trait]
impl SearchProvider for SearchApiAdapter {
    async fn search(&self, query: &str) -> Result<SearchResponse, ProviderError> {
        let response = self
            .client
            .post(self.search_url())
            .json(&SearchApiRequest {
                query,
                max_results: self.max_results,
            })
            .send()
            .await?;

        let (status, ctx, body) = read_body(response, "search").await?;

        if !status.is_success() {
            return Err(match status.as_u16() {
                429 => ProviderError::rate_limited(Duration::from_secs(30), ctx),
                _ => ProviderError::provider_with_context(
                    "search",
                    format!("HTTP {}", status.as_u16()),
                    ctx,
                ),
            });
        }

        let parsed: SearchApiResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider("search", format!("Invalid JSON: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(ProviderError::provider(
                "search",
                error.message.unwrap_or_default(),
            ));
        }

        let mut content = String::new();
        if let Some(answer) = parsed.answer {
            if !answer.trim().is_empty() {
                content.push_str(answer.trim());
                content.push('\n');
            }
        }

        let mut sources = Vec::new();
        for result in parsed.results {
            if let Some(snippet) = result.content {
                if !snippet.trim().is_empty() {
                    if let Some(title) = &result.title {
                        content.push_str(&format!("{title}: "));
                    }
                    content.push_str(snippet.trim());
                    content.push('\n');
                }
            }
            if let Some(url) = result.url {
                if !url.trim().is_empty() && !sources.contains(&url) {
                    sources.push(url);
                }
            }
        }

        Ok(SearchResponse {
            content: content.trim_end().to_string(),
            sources,
        })
    }
}

// =============================================================================
// SHARED HTTP PLUMBING
// =============================================================================

fn build_client(api_key: &str, timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|_| ProviderError::config("Invalid API key format"))?;
    headers.insert(AUTHORIZATION, auth_value);

    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .gzip(true)
        .build()
        .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))
}

/// Read a response body with size enforcement; returns status, error context
/// seeded with status + request id, and the body text.
async fn read_body(
    mut response: reqwest::Response,
    provider: &'static str,
) -> Result<(reqwest::StatusCode, ErrorContext, String), ProviderError> {
    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let new_len = bytes.len() + chunk.len();
        if new_len > MAX_RESPONSE_LEN {
            return Err(ProviderError::provider(
                provider,
                format!("Response too large: {new_len} bytes"),
            ));
        }
        bytes.extend_from_slice(&chunk);
    }

    let ctx = ErrorContext::new().with_status(status.as_u16());
    let ctx = match request_id {
        Some(id) => ctx.with_request_id(id),
        None => ctx,
    };

    Ok((status, ctx, String::from_utf8_lossy(&bytes).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_citations_grounding_chunks() {
        let message = ChoiceMessage {
            content: Some("text".into()),
            grounding_metadata: Some(GroundingMetadata {
                grounding_chunks: vec![
                    GroundingChunk {
                        web: Some(WebChunk {
                            uri: Some("https://a.example/one".into()),
                        }),
                    },
                    GroundingChunk { web: None },
                    GroundingChunk {
                        web: Some(WebChunk {
                            uri: Some("https://b.example/two".into()),
                        }),
                    },
                ],
            }),
            citations: None,
        };
        let cites = collect_citations(&message, None);
        assert_eq!(cites, vec!["https://a.example/one", "https://b.example/two"]);
    }

    #[test]
    fn test_collect_citations_legacy_list() {
        let message = ChoiceMessage {
            content: Some("text".into()),
            grounding_metadata: None,
            citations: Some(vec!["https://c.example".into(), "".into()]),
        };
        let cites = collect_citations(&message, None);
        assert_eq!(cites, vec!["https://c.example"]);
    }

    #[test]
    fn test_collect_citations_top_level_fallback() {
        let message = ChoiceMessage {
            content: Some("text".into()),
            grounding_metadata: None,
            citations: None,
        };
        let top = vec!["https://d.example".to_string()];
        let cites = collect_citations(&message, Some(&top));
        assert_eq!(cites, vec!["https://d.example"]);
    }

    #[test]
    fn test_collect_citations_absent() {
        let message = ChoiceMessage {
            content: Some("text".into()),
            grounding_metadata: None,
            citations: None,
        };
        assert!(collect_citations(&message, None).is_empty());
    }

    #[test]
    fn test_is_refusal() {
        assert!(ChatCompletionsAdapter::is_refusal("I cannot help with that"));
        assert!(ChatCompletionsAdapter::is_refusal(
            "Refusing: the request was refused"
        ));
        assert!(!ChatCompletionsAdapter::is_refusal(
            "Here are five topic ideas"
        ));
    }
}
