//! Core types for the provider boundary.

use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Attribution for log correlation and debugging.
///
/// Every request through a provider carries attribution so we know:
/// - Which generation run it belongs to (run_id)
/// - Which code path triggered it (caller)
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    /// Episode-generation run this request is part of.
    pub run_id: Option<Uuid>,
    /// Which code path made this call, for debugging.
    /// Use a static string like "discovery::direct" or "research::layer3".
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

// =============================================================================
// GENERATION TYPES
// =============================================================================

/// Request for text generation.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Optional system prompt.
    pub system: Option<String>,
    /// The user prompt.
    pub prompt: String,
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Whether to request JSON output.
    pub json_mode: bool,
    /// Whether to enable the provider's web-grounding tool.
    ///
    /// Grounded responses may carry citations; ungrounded ones never do.
    pub web_search: bool,
    /// Attribution for log correlation.
    pub attribution: Attribution,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>, attribution: Attribution) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature: 0.0,
            max_tokens: None,
            json_mode: false,
            web_search: false,
            attribution,
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn web_search(mut self) -> Self {
        self.web_search = true;
        self
    }
}

/// Response from a generation request.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// Generated text.
    pub text: String,
    /// Source URLs cited by the provider's grounding layer.
    ///
    /// Empty when the provider returned no citation metadata; citation
    /// extraction never fails a request.
    pub citations: Vec<String>,
    /// Time taken for the request.
    pub latency: Duration,
}

impl GenerateResponse {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
            latency: Duration::from_millis(0),
        }
    }
}

// =============================================================================
// SEARCH TYPES
// =============================================================================

/// Result of a single web search query.
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    /// Concatenated snippet text for the query.
    pub content: String,
    /// Source URLs backing the snippets.
    pub sources: Vec<String>,
}

impl SearchResponse {
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.sources.is_empty()
    }
}
