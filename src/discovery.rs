//! Topic discovery: a three-tier fallback chain producing candidate topics,
//! plus prioritization of candidates into deep-research topics.
//!
//! The tiers form an explicit ordered strategy list tried
//! attempt-until-success; a tier only hands off to the next on a hard
//! failure (no topics parsed) or a provider error, never via
//! exceptions-as-control-flow across modules.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::history::HistorySummary;
use crate::parse::parse_structured;
use crate::prompts;
use crate::provider::{
    Attribution, GenerateRequest, GenerativeProvider, SearchProvider, SearchResponse,
};

/// Number of exploratory queries tier 3 runs.
const EXPLORATORY_QUERY_COUNT: usize = 5;

/// Candidate cap after any tier; prompts ask for 5-7.
const MAX_CANDIDATES: usize = 7;

// =============================================================================
// Types
// =============================================================================

/// Which strategy produced a candidate, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryTier {
    Direct,
    SearchGrounded,
    SearchExtract,
}

/// A candidate subject for an episode segment.
///
/// Relevance and recency are heuristics, not guarantees; relevance is
/// clamped to 1-10 at construction.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateTopic {
    pub topic: String,
    pub relevance: u8,
    pub query: String,
    pub recency: Option<String>,
    pub rationale: Option<String>,
    pub key_questions: Vec<String>,
    pub provenance: DiscoveryTier,
}

impl CandidateTopic {
    pub fn new(topic: impl Into<String>, relevance: u8, query: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            relevance: relevance.clamp(1, 10),
            query: query.into(),
            recency: None,
            rationale: None,
            key_questions: Vec::new(),
            provenance: DiscoveryTier::Direct,
        }
    }
}

/// Raw candidate as the model emits it; converted with validation.
#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    relevance: Option<f64>,
    #[serde(default)]
    query: String,
    #[serde(default)]
    recency: Option<String>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    key_questions: Vec<String>,
}

impl RawCandidate {
    /// A candidate is retained only if both topic and query are present.
    fn validate(self, provenance: DiscoveryTier) -> Option<CandidateTopic> {
        if self.topic.trim().is_empty() || self.query.trim().is_empty() {
            return None;
        }
        let relevance = self.relevance.unwrap_or(5.0).round() as i64;
        Some(CandidateTopic {
            topic: self.topic,
            relevance: relevance.clamp(1, 10) as u8,
            query: self.query,
            recency: self.recency.filter(|r| !r.trim().is_empty()),
            rationale: self.rationale.filter(|r| !r.trim().is_empty()),
            key_questions: self.key_questions,
            provenance,
        })
    }
}

/// A candidate promoted to full research treatment. All scores 1-10,
/// clamped at construction.
#[derive(Debug, Clone, Serialize)]
pub struct DeepResearchTopic {
    pub topic: String,
    pub importance: u8,
    pub newsworthiness: u8,
    pub depth_potential: u8,
    pub rationale: String,
    pub key_questions: Vec<String>,
    pub search_queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawDeepTopic {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    importance: Option<f64>,
    #[serde(default)]
    newsworthiness: Option<f64>,
    #[serde(default)]
    depth_potential: Option<f64>,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    key_questions: Vec<String>,
    #[serde(default)]
    search_queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PrioritizeResponse {
    #[serde(default)]
    topics: Vec<RawDeepTopic>,
}

fn clamp_score(v: Option<f64>) -> u8 {
    (v.unwrap_or(5.0).round() as i64).clamp(1, 10) as u8
}

impl RawDeepTopic {
    fn validate(self) -> Option<DeepResearchTopic> {
        if self.topic.trim().is_empty() {
            return None;
        }
        let mut search_queries = self.search_queries;
        search_queries.retain(|q| !q.trim().is_empty());
        if search_queries.is_empty() {
            // A topic without a seed query cannot be researched.
            search_queries.push(format!("{} latest developments", self.topic));
        }
        Some(DeepResearchTopic {
            importance: clamp_score(self.importance),
            newsworthiness: clamp_score(self.newsworthiness),
            depth_potential: clamp_score(self.depth_potential),
            topic: self.topic,
            rationale: self.rationale,
            key_questions: self.key_questions,
            search_queries,
        })
    }
}

/// Why a single tier failed; drives the fall-through, never surfaces.
#[derive(Debug, Error)]
enum TierFailure {
    #[error("provider call failed: {0}")]
    Provider(#[from] crate::provider::ProviderError),
    #[error("response was not parseable: {0}")]
    Parse(String),
    #[error("no topics survived validation")]
    NoTopics,
}

// =============================================================================
// Discovery
// =============================================================================

/// Produces a ranked list of candidate topics via the three-tier chain.
pub struct TopicDiscovery {
    generative: Arc<dyn GenerativeProvider>,
    search: Arc<dyn SearchProvider>,
}

impl TopicDiscovery {
    pub fn new(generative: Arc<dyn GenerativeProvider>, search: Arc<dyn SearchProvider>) -> Self {
        Self { generative, search }
    }

    /// Run the tier chain. An empty return means every strategy was
    /// exhausted; the pipeline treats that as "no episode this run" rather
    /// than inventing topics.
    pub async fn discover(&self, theme: &str, history: &HistorySummary) -> Vec<CandidateTopic> {
        const TIERS: &[DiscoveryTier] = &[
            DiscoveryTier::Direct,
            DiscoveryTier::SearchGrounded,
            DiscoveryTier::SearchExtract,
        ];

        for &tier in TIERS {
            let attempt = match tier {
                DiscoveryTier::Direct => self.direct_generation(theme, history).await,
                DiscoveryTier::SearchGrounded => self.hybrid_merge(theme, history).await,
                DiscoveryTier::SearchExtract => self.search_then_extract(theme, history).await,
            };
            match attempt {
                Ok(topics) => {
                    info!(?tier, count = topics.len(), "topic discovery succeeded");
                    return topics;
                }
                Err(e) => {
                    warn!(?tier, error = %e, "discovery tier failed, falling through");
                }
            }
        }

        warn!("all discovery tiers exhausted");
        Vec::new()
    }

    /// Tier 1: one heavily-constrained, web-grounded generation call. A
    /// response that does not parse as a JSON array is an unconditional
    /// failure; no partial recovery is attempted here.
    async fn direct_generation(
        &self,
        theme: &str,
        history: &HistorySummary,
    ) -> Result<Vec<CandidateTopic>, TierFailure> {
        let req = GenerateRequest::new(
            prompts::discovery_direct_user_prompt(theme, history),
            Attribution::new("discovery::direct"),
        )
        .system(prompts::DISCOVERY_DIRECT_SYSTEM_PROMPT)
        .temperature(0.7)
        .max_tokens(4096)
        .web_search();

        let resp = self.generative.generate(req).await?;
        let raw: Vec<RawCandidate> =
            parse_structured(&resp.text).map_err(|e| TierFailure::Parse(e.to_string()))?;

        finish_tier(raw, DiscoveryTier::Direct)
    }

    /// Tier 2: merge direct generation with a dedicated search-grounded
    /// discovery pass. Failure of either sub-path does not fail the tier as
    /// long as the other returns at least one topic.
    async fn hybrid_merge(
        &self,
        theme: &str,
        history: &HistorySummary,
    ) -> Result<Vec<CandidateTopic>, TierFailure> {
        let (direct, grounded) = tokio::join!(
            self.direct_generation(theme, history),
            self.search_grounded(theme),
        );

        let mut merged = Vec::new();
        let mut direct_count = 0;
        let mut grounded_count = 0;

        match direct {
            Ok(topics) => {
                direct_count = topics.len();
                merged.extend(topics);
            }
            Err(e) => debug!(error = %e, "hybrid: direct sub-path failed"),
        }
        match grounded {
            Ok(topics) => {
                grounded_count = topics.len();
                merged.extend(topics);
            }
            Err(e) => debug!(error = %e, "hybrid: search-grounded sub-path failed"),
        }

        info!(
            direct = direct_count,
            grounded = grounded_count,
            "hybrid merge provenance counts"
        );

        dedup_by_topic(&mut merged);
        merged.truncate(MAX_CANDIDATES);
        if merged.is_empty() {
            return Err(TierFailure::NoTopics);
        }
        Ok(merged)
    }

    /// The search-grounded half of tier 2: a fresh-results search feeding a
    /// constrained extraction call.
    async fn search_grounded(&self, theme: &str) -> Result<Vec<CandidateTopic>, TierFailure> {
        let now = Utc::now();
        let query = format!("{} top news stories {}", theme, now.format("%B %Y"));
        let results = self.search.search(&query).await?;
        if results.is_empty() {
            return Err(TierFailure::NoTopics);
        }

        self.extract_candidates(theme, &results.content, DiscoveryTier::SearchGrounded)
            .await
    }

    /// Tier 3: generate exploratory queries (templated fallback if that
    /// fails), fan them out in parallel, and extract candidates from the
    /// combined results.
    async fn search_then_extract(
        &self,
        theme: &str,
        history: &HistorySummary,
    ) -> Result<Vec<CandidateTopic>, TierFailure> {
        let queries = match self.generate_queries(theme, history).await {
            Ok(q) => q,
            Err(e) => {
                warn!(error = %e, "query generation failed, using templated queries");
                fallback_queries(theme)
            }
        };

        let combined = self.run_searches(&queries).await;
        if combined.content.trim().is_empty() {
            return Err(TierFailure::NoTopics);
        }

        self.extract_candidates(theme, &combined.content, DiscoveryTier::SearchExtract)
            .await
    }

    /// Ask the provider for exploratory queries; any failure falls back to
    /// the templates so the query list is never empty.
    async fn generate_queries(
        &self,
        theme: &str,
        history: &HistorySummary,
    ) -> Result<Vec<String>, TierFailure> {
        let req = GenerateRequest::new(
            prompts::discovery_query_user_prompt(theme, history),
            Attribution::new("discovery::queries"),
        )
        .system(prompts::DISCOVERY_QUERY_SYSTEM_PROMPT)
        .temperature(0.5)
        .max_tokens(512)
        .json();

        let resp = self.generative.generate(req).await?;
        let mut queries: Vec<String> =
            parse_structured(&resp.text).map_err(|e| TierFailure::Parse(e.to_string()))?;
        queries.retain(|q| !q.trim().is_empty());
        queries.truncate(EXPLORATORY_QUERY_COUNT);
        if queries.is_empty() {
            return Err(TierFailure::NoTopics);
        }
        Ok(queries)
    }

    /// Execute searches in parallel with an all-or-degrade join: a failed
    /// branch is logged and dropped while surviving branches still
    /// contribute their content and sources.
    async fn run_searches(&self, queries: &[String]) -> SearchResponse {
        let results: Vec<Option<SearchResponse>> = stream::iter(queries.iter().map(|query| {
            let search = self.search.clone();
            let query = query.clone();
            async move {
                match search.search(&query).await {
                    Ok(resp) => Some(resp),
                    Err(e) => {
                        warn!(query = %query, error = %e, "exploratory search branch failed");
                        None
                    }
                }
            }
        }))
        .buffer_unordered(queries.len().max(1))
        .collect()
        .await;

        let mut combined = SearchResponse::default();
        for resp in results.into_iter().flatten() {
            if !combined.content.is_empty() {
                combined.content.push_str("\n\n");
            }
            combined.content.push_str(&resp.content);
            for source in resp.sources {
                if !combined.sources.contains(&source) {
                    combined.sources.push(source);
                }
            }
        }
        combined
    }

    /// Shared extraction call over concatenated search text.
    async fn extract_candidates(
        &self,
        theme: &str,
        combined: &str,
        provenance: DiscoveryTier,
    ) -> Result<Vec<CandidateTopic>, TierFailure> {
        let req = GenerateRequest::new(
            prompts::discovery_extract_user_prompt(theme, combined),
            Attribution::new("discovery::extract"),
        )
        .system(prompts::DISCOVERY_EXTRACT_SYSTEM_PROMPT)
        .temperature(0.3)
        .max_tokens(2048)
        .json();

        let resp = self.generative.generate(req).await?;
        let raw: Vec<RawCandidate> =
            parse_structured(&resp.text).map_err(|e| TierFailure::Parse(e.to_string()))?;

        finish_tier(raw, provenance)
    }

    // =========================================================================
    // Prioritization
    // =========================================================================

    /// Promote candidates into at most `max_topics` deep-research topics
    /// via the provider. A malformed response yields an empty list rather
    /// than an error; the pipeline then promotes deterministically.
    pub async fn prioritize(
        &self,
        candidates: &[CandidateTopic],
        history: &HistorySummary,
        max_topics: usize,
    ) -> Vec<DeepResearchTopic> {
        let req = GenerateRequest::new(
            prompts::prioritize_user_prompt(candidates, history, max_topics),
            Attribution::new("discovery::prioritize"),
        )
        .system(prompts::PRIORITIZE_SYSTEM_PROMPT)
        .temperature(0.3)
        .max_tokens(2048)
        .json();

        let resp = match self.generative.generate(req).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "prioritization call failed");
                return Vec::new();
            }
        };

        match parse_structured::<PrioritizeResponse>(&resp.text) {
            Ok(parsed) => parsed
                .topics
                .into_iter()
                .filter_map(RawDeepTopic::validate)
                .take(max_topics)
                .collect(),
            Err(e) => {
                warn!(error = %e, "prioritization parse failed; returning empty list");
                Vec::new()
            }
        }
    }
}

/// Deterministic promotion used when prioritization degrades: the top
/// candidates by relevance become research topics with neutral scores and
/// their discovery query as the seed.
pub fn promote_candidates(candidates: &[CandidateTopic], max_topics: usize) -> Vec<DeepResearchTopic> {
    let mut ranked: Vec<&CandidateTopic> = candidates.iter().collect();
    ranked.sort_by(|a, b| b.relevance.cmp(&a.relevance));

    ranked
        .into_iter()
        .take(max_topics)
        .map(|c| DeepResearchTopic {
            topic: c.topic.clone(),
            importance: c.relevance,
            newsworthiness: c.relevance,
            depth_potential: 5,
            rationale: c.rationale.clone().unwrap_or_default(),
            key_questions: if c.key_questions.is_empty() {
                vec![format!("What are the latest developments in {}?", c.topic)]
            } else {
                c.key_questions.clone()
            },
            search_queries: vec![c.query.clone()],
        })
        .collect()
}

/// The templated exploratory queries used when query generation itself
/// fails. Never empty.
pub fn fallback_queries(theme: &str) -> Vec<String> {
    let now = Utc::now();
    let month_year = now.format("%B %Y");
    vec![
        format!("latest news about {theme} {month_year}"),
        format!("{theme} breaking developments {month_year}"),
        format!("{theme} policy regulation news {month_year}"),
        format!("{theme} market financial impact {month_year}"),
        format!("{theme} expert analysis {month_year}"),
    ]
}

fn finish_tier(
    raw: Vec<RawCandidate>,
    provenance: DiscoveryTier,
) -> Result<Vec<CandidateTopic>, TierFailure> {
    let mut topics: Vec<CandidateTopic> = raw
        .into_iter()
        .filter_map(|r| r.validate(provenance))
        .collect();
    topics.truncate(MAX_CANDIDATES);
    if topics.is_empty() {
        return Err(TierFailure::NoTopics);
    }
    Ok(topics)
}

fn dedup_by_topic(topics: &mut Vec<CandidateTopic>) {
    let mut seen = std::collections::HashSet::new();
    topics.retain(|t| seen.insert(t.topic.trim().to_lowercase()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_relevance_clamped() {
        let c = CandidateTopic::new("t", 14, "q");
        assert_eq!(c.relevance, 10);
        let c = CandidateTopic::new("t", 0, "q");
        assert_eq!(c.relevance, 1);
    }

    #[test]
    fn test_raw_candidate_requires_topic_and_query() {
        let keep: RawCandidate = serde_json::from_str(
            r#"{"topic": "rate decision", "relevance": 8, "query": "central bank rate decision"}"#,
        )
        .unwrap();
        assert!(keep.validate(DiscoveryTier::SearchExtract).is_some());

        let no_query: RawCandidate =
            serde_json::from_str(r#"{"topic": "rate decision", "relevance": 8}"#).unwrap();
        assert!(no_query.validate(DiscoveryTier::SearchExtract).is_none());

        let no_topic: RawCandidate =
            serde_json::from_str(r#"{"query": "central bank rate decision"}"#).unwrap();
        assert!(no_topic.validate(DiscoveryTier::SearchExtract).is_none());
    }

    #[test]
    fn test_raw_deep_topic_seeds_missing_query() {
        let raw: RawDeepTopic = serde_json::from_str(
            r#"{"topic": "grid storage", "importance": 8, "newsworthiness": 7, "depth_potential": 9}"#,
        )
        .unwrap();
        let topic = raw.validate().unwrap();
        assert_eq!(topic.search_queries, vec!["grid storage latest developments"]);
    }

    #[test]
    fn test_deep_topic_scores_clamped() {
        let raw: RawDeepTopic = serde_json::from_str(
            r#"{"topic": "t", "importance": 99, "newsworthiness": -3, "search_queries": ["q"]}"#,
        )
        .unwrap();
        let topic = raw.validate().unwrap();
        assert_eq!(topic.importance, 10);
        assert_eq!(topic.newsworthiness, 1);
        assert_eq!(topic.depth_potential, 5);
    }

    #[test]
    fn test_fallback_queries_are_nonempty_and_themed() {
        let queries = fallback_queries("energy policy");
        assert_eq!(queries.len(), 5);
        assert!(queries[0].starts_with("latest news about energy policy"));
        assert!(queries.iter().all(|q| q.contains("energy policy")));
    }

    #[test]
    fn test_promote_candidates_orders_by_relevance() {
        let mut low = CandidateTopic::new("low", 3, "low query");
        low.rationale = Some("minor item".into());
        let high = CandidateTopic::new("high", 9, "high query");
        let promoted = promote_candidates(&[low, high], 1);
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].topic, "high");
        assert_eq!(promoted[0].importance, 9);
        assert_eq!(promoted[0].depth_potential, 5);
        assert_eq!(promoted[0].search_queries, vec!["high query"]);
        assert!(!promoted[0].key_questions.is_empty());
    }

    #[test]
    fn test_dedup_by_topic_case_insensitive() {
        let mut topics = vec![
            CandidateTopic::new("Rate Decision", 8, "q1"),
            CandidateTopic::new("rate decision", 7, "q2"),
            CandidateTopic::new("other", 5, "q3"),
        ];
        dedup_by_topic(&mut topics);
        assert_eq!(topics.len(), 2);
    }
}
