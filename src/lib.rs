#![forbid(unsafe_code)]

//! # showrunner
//!
//! Automated episode script production for news podcasts.
//!
//! The hard part is not text generation (delegated to a generative provider
//! and a web search provider behind narrow traits) but the orchestration:
//! multi-stage topic discovery with a three-tier fallback chain, adaptive
//! layered research with parallel fan-out, deterministic word-count
//! budgeting, and a differentiation check that can trigger a single rewrite
//! pass. Every stage degrades locally on provider trouble; only exhausted
//! topic discovery and a degenerate final generation can end a run without
//! an episode.

pub mod budget;
pub mod discovery;
pub mod episode;
pub mod history;
pub mod parse;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod provider;
pub mod research;
pub mod synthesis;
pub mod validation;

pub use budget::{BudgetConfig, EpisodeLength, LengthClass, TopicDepth};
pub use episode::{EpisodeRecord, EpisodeScript, Podcast, SourceRef};
pub use pipeline::{EpisodePipeline, PipelineConfig, PipelineError};
pub use provider::{
    Attribution, ChatCompletionsAdapter, GenerateRequest, GenerateResponse, GenerativeProvider,
    ProviderError, SearchApiAdapter, SearchProvider, SearchResponse,
};
pub use synthesis::ShortScriptFallback;
