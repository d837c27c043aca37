//! Layered research: three passes of increasing depth per topic, run in
//! parallel across topics.
//!
//! Layers are strictly ordered; layer n+1's queries are derived from layer
//! n's insights, never the reverse. Every step inside a topic degrades
//! locally (empty insights, template queries, joined-insight synthesis,
//! neutral metrics) so a single topic's research never errors out and never
//! aborts its siblings.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::discovery::DeepResearchTopic;
use crate::parse::parse_structured;
use crate::prompts;
use crate::provider::{
    Attribution, GenerateRequest, GenerativeProvider, SearchProvider, SearchResponse,
};

/// Follow-up queries derived from layer-1 insights, at most this many.
const MAX_FOLLOW_UP_QUERIES: usize = 3;

/// Deep-pass query count; the template set has the same size.
const DEEP_QUERY_COUNT: usize = 5;

/// Insights kept per layer; prompts ask for 5-7.
const MAX_INSIGHTS_PER_LAYER: usize = 7;

// =============================================================================
// Types
// =============================================================================

/// Research knobs. Input ceilings are characters, not tokens: deeper layers
/// carry more accumulated material and get a larger ceiling.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    pub layer_input_ceilings: [usize; 3],
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            layer_input_ceilings: [8_000, 12_000, 16_000],
        }
    }
}

/// One research pass over a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchLayer {
    /// 1 = surface, 2 = intermediate, 3 = deep.
    pub level: u8,
    pub content: String,
    pub sources: Vec<String>,
    pub key_insights: Vec<String>,
}

/// Quality metrics for a topic's synthesized research, each 1-10.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DepthMetrics {
    pub factual_density: u8,
    pub insight_score: u8,
    pub contextual_depth: u8,
    pub overall_depth_score: u8,
}

impl DepthMetrics {
    pub fn from_scores(factual_density: u8, insight_score: u8, contextual_depth: u8) -> Self {
        let mean =
            (factual_density as f64 + insight_score as f64 + contextual_depth as f64) / 3.0;
        Self {
            factual_density,
            insight_score,
            contextual_depth,
            overall_depth_score: mean.round() as u8,
        }
    }

    /// Neutral defaults used when the scoring call degrades.
    pub fn neutral() -> Self {
        Self::from_scores(5, 5, 5)
    }
}

#[derive(Debug, Deserialize)]
struct RawMetrics {
    factual_density: Option<f64>,
    insight_score: Option<f64>,
    contextual_depth: Option<f64>,
}

/// The complete research output for one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayeredResearchResult {
    pub topic: String,
    pub layers: Vec<ResearchLayer>,
    pub synthesized_content: String,
    pub depth_metrics: DepthMetrics,
}

impl LayeredResearchResult {
    /// All source URLs across layers, de-duplicated in first-seen order.
    pub fn all_sources(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.layers
            .iter()
            .flat_map(|l| l.sources.iter())
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Runs the three-layer adaptive research process.
pub struct LayeredResearchEngine {
    generative: Arc<dyn GenerativeProvider>,
    search: Arc<dyn SearchProvider>,
    config: ResearchConfig,
}

impl LayeredResearchEngine {
    pub fn new(
        generative: Arc<dyn GenerativeProvider>,
        search: Arc<dyn SearchProvider>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            generative,
            search,
            config,
        }
    }

    /// Research every topic in parallel. Branch count is bounded by the
    /// already-small topic cap; a degraded branch still joins with whatever
    /// it gathered.
    pub async fn research_all(&self, topics: &[DeepResearchTopic]) -> Vec<LayeredResearchResult> {
        let mut results: Vec<(usize, LayeredResearchResult)> =
            stream::iter(topics.iter().enumerate().map(|(idx, topic)| async move {
                (idx, self.research_topic(topic).await)
            }))
            .buffer_unordered(topics.len().max(1))
            .collect()
            .await;

        // buffer_unordered joins in completion order; restore topic priority.
        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, r)| r).collect()
    }

    /// The three sequential layers for one topic, each feeding the next.
    pub async fn research_topic(&self, topic: &DeepResearchTopic) -> LayeredResearchResult {
        info!(topic = %topic.topic, "starting layered research");

        // Layer 1 (surface): the topic's first seed query alone.
        let seed = topic
            .search_queries
            .first()
            .cloned()
            .unwrap_or_else(|| topic.topic.clone());
        let surface = self.run_layer(topic, 1, &[seed]).await;

        // Layer 2 (intermediate): remaining seed queries plus deterministic
        // follow-ups derived from layer-1 insights.
        let mut layer2_queries: Vec<String> = topic.search_queries.iter().skip(1).cloned().collect();
        layer2_queries.extend(follow_up_queries(
            &surface.key_insights,
            MAX_FOLLOW_UP_QUERIES,
        ));
        if layer2_queries.is_empty() {
            layer2_queries.push(format!("{} detailed analysis", topic.topic));
        }
        let intermediate = self.run_layer(topic, 2, &layer2_queries).await;

        // Layer 3 (deep): sophisticated queries from the provider, template
        // substitution on failure so the layer never skips.
        let prior_insights: Vec<String> = surface
            .key_insights
            .iter()
            .chain(intermediate.key_insights.iter())
            .cloned()
            .collect();
        let deep_queries = self.deep_queries(topic, &prior_insights).await;
        let deep = self.run_layer(topic, 3, &deep_queries).await;

        let layers = vec![surface, intermediate, deep];
        let synthesized_content = self.synthesize(topic, &layers).await;
        let depth_metrics = self.score_metrics(topic, &synthesized_content).await;

        LayeredResearchResult {
            topic: topic.topic.clone(),
            layers,
            synthesized_content,
            depth_metrics,
        }
    }

    /// One layer: parallel searches with an all-or-degrade join, then a
    /// bounded-input insight extraction.
    async fn run_layer(
        &self,
        topic: &DeepResearchTopic,
        level: u8,
        queries: &[String],
    ) -> ResearchLayer {
        let results: Vec<Option<SearchResponse>> = stream::iter(queries.iter().map(|query| {
            let search = self.search.clone();
            let query = query.clone();
            async move {
                match search.search(&query).await {
                    Ok(resp) => Some(resp),
                    Err(e) => {
                        warn!(query = %query, error = %e, "research search branch failed");
                        None
                    }
                }
            }
        }))
        .buffer_unordered(queries.len().max(1))
        .collect()
        .await;

        let mut content = String::new();
        let mut sources = Vec::new();
        for resp in results.into_iter().flatten() {
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str(&resp.content);
            for source in resp.sources {
                if !sources.contains(&source) {
                    sources.push(source);
                }
            }
        }

        let key_insights = if content.trim().is_empty() {
            debug!(topic = %topic.topic, level, "layer gathered no content");
            Vec::new()
        } else {
            let ceiling = self.config.layer_input_ceilings[(level as usize - 1).min(2)];
            self.extract_insights(&topic.topic, level, &content, ceiling)
                .await
        };

        ResearchLayer {
            level,
            content,
            sources,
            key_insights,
        }
    }

    /// Extract 5-7 insights from layer content, truncated to the layer's
    /// character ceiling. Degrades to an empty list; logged only.
    async fn extract_insights(
        &self,
        topic: &str,
        level: u8,
        content: &str,
        ceiling: usize,
    ) -> Vec<String> {
        let bounded = truncate_chars(content, ceiling);

        let req = GenerateRequest::new(
            prompts::insight_user_prompt(topic, level, &bounded),
            Attribution::new("research::insights"),
        )
        .system(prompts::INSIGHT_SYSTEM_PROMPT)
        .temperature(0.2)
        .max_tokens(1024)
        .json();

        match self.generative.generate(req).await {
            Ok(resp) => match parse_structured::<Vec<String>>(&resp.text) {
                Ok(mut insights) => {
                    insights.retain(|i| !i.trim().is_empty());
                    insights.truncate(MAX_INSIGHTS_PER_LAYER);
                    insights
                }
                Err(e) => {
                    warn!(topic, level, error = %e, "insight parse failed");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(topic, level, error = %e, "insight extraction call failed");
                Vec::new()
            }
        }
    }

    /// Layer-3 query generation with the fixed template substitution on any
    /// failure, so the deep layer always has queries.
    async fn deep_queries(&self, topic: &DeepResearchTopic, insights: &[String]) -> Vec<String> {
        let req = GenerateRequest::new(
            prompts::deep_query_user_prompt(topic, insights),
            Attribution::new("research::deep_queries"),
        )
        .system(prompts::DEEP_QUERY_SYSTEM_PROMPT)
        .temperature(0.5)
        .max_tokens(512)
        .json();

        match self.generative.generate(req).await {
            Ok(resp) => match parse_structured::<Vec<String>>(&resp.text) {
                Ok(mut queries) => {
                    queries.retain(|q| !q.trim().is_empty());
                    queries.truncate(DEEP_QUERY_COUNT);
                    if queries.is_empty() {
                        deep_query_templates(&topic.topic)
                    } else {
                        queries
                    }
                }
                Err(e) => {
                    warn!(topic = %topic.topic, error = %e, "deep query parse failed, using templates");
                    deep_query_templates(&topic.topic)
                }
            },
            Err(e) => {
                warn!(topic = %topic.topic, error = %e, "deep query call failed, using templates");
                deep_query_templates(&topic.topic)
            }
        }
    }

    /// One synthesis call integrating all layers, heaviest weight on layer
    /// 3. Degrades to the joined insights so downstream stages always have
    /// narrative text.
    async fn synthesize(&self, topic: &DeepResearchTopic, layers: &[ResearchLayer]) -> String {
        let layer_refs: Vec<(u8, &[String])> = layers
            .iter()
            .map(|l| (l.level, l.key_insights.as_slice()))
            .collect();

        let req = GenerateRequest::new(
            prompts::research_synthesis_user_prompt(&topic.topic, &layer_refs),
            Attribution::new("research::synthesize"),
        )
        .system(prompts::RESEARCH_SYNTHESIS_SYSTEM_PROMPT)
        .temperature(0.4)
        .max_tokens(2048);

        match self.generative.generate(req).await {
            Ok(resp) if !resp.text.trim().is_empty() => resp.text,
            Ok(_) => {
                warn!(topic = %topic.topic, "synthesis returned empty text, joining insights");
                joined_insights(layers)
            }
            Err(e) => {
                warn!(topic = %topic.topic, error = %e, "synthesis call failed, joining insights");
                joined_insights(layers)
            }
        }
    }

    /// Depth scoring; failure yields neutral metrics and is never surfaced.
    async fn score_metrics(&self, topic: &DeepResearchTopic, synthesis: &str) -> DepthMetrics {
        let req = GenerateRequest::new(
            prompts::depth_metrics_user_prompt(&topic.topic, synthesis),
            Attribution::new("research::metrics"),
        )
        .system(prompts::DEPTH_METRICS_SYSTEM_PROMPT)
        .temperature(0.0)
        .max_tokens(256)
        .json();

        match self.generative.generate(req).await {
            Ok(resp) => match parse_structured::<RawMetrics>(&resp.text) {
                Ok(raw) => DepthMetrics::from_scores(
                    clamp_metric(raw.factual_density),
                    clamp_metric(raw.insight_score),
                    clamp_metric(raw.contextual_depth),
                ),
                Err(e) => {
                    warn!(topic = %topic.topic, error = %e, "metrics parse failed, using neutral");
                    DepthMetrics::neutral()
                }
            },
            Err(e) => {
                warn!(topic = %topic.topic, error = %e, "metrics call failed, using neutral");
                DepthMetrics::neutral()
            }
        }
    }
}

// =============================================================================
// Deterministic transforms
// =============================================================================

/// Derive follow-up queries from layer insights: salient terms of the top
/// insights with "detailed analysis" appended. A pure transform, not a
/// model call, to bound cost.
pub fn follow_up_queries(insights: &[String], max: usize) -> Vec<String> {
    insights
        .iter()
        .take(max)
        .filter_map(|insight| {
            let terms = salient_terms(insight);
            if terms.is_empty() {
                None
            } else {
                Some(format!("{terms} detailed analysis"))
            }
        })
        .collect()
}

/// The first few substantive words of an insight, punctuation stripped.
fn salient_terms(insight: &str) -> String {
    insight
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| w.chars().count() > 3)
        .take(6)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fixed deep-pass queries substituted when query generation fails.
pub fn deep_query_templates(topic: &str) -> Vec<String> {
    vec![
        format!("expert analysis {topic}"),
        format!("implications of {topic}"),
        format!("historical context {topic}"),
        format!("future predictions {topic}"),
        format!("contrasting views {topic}"),
    ]
}

fn joined_insights(layers: &[ResearchLayer]) -> String {
    layers
        .iter()
        .flat_map(|l| l.key_insights.iter())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Char-boundary-safe truncation.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn clamp_metric(v: Option<f64>) -> u8 {
    (v.unwrap_or(5.0).round() as i64).clamp(1, 10) as u8
}
