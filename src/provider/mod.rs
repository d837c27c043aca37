//! Capability interfaces for the two external services the pipeline calls.
//!
//! The pipeline depends only on these trait shapes — a generative text
//! provider (prompt → text, optionally web-grounded with citations) and a
//! web search provider (query → snippets + sources). Vendor APIs, model
//! identifiers and transport details live behind the adapters in [`http`].

pub mod error;
pub mod http;
pub mod types;

pub use error::{ErrorContext, ProviderError};
pub use http::{ChatCompletionsAdapter, SearchApiAdapter};
pub use types::*;

/// Generative text provider: prompt in, text (and optional citations) out.
///
/// Implementations must never fail on absent citation metadata; a grounded
/// call that yields no citations returns an empty list.
#[async_trait::async_trait]
pub trait GenerativeProvider: Send + Sync {
    async fn generate(&self, req: GenerateRequest) -> Result<GenerateResponse, ProviderError>;
}

/// Web search provider: query in, ranked snippets and source URLs out.
///
/// Must be callable in parallel; the caller assumes no shared rate-limit
/// state (batching and backoff are the provider's concern).
#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResponse, ProviderError>;
}
