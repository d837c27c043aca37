//! Episode generation pipeline: history → discovery → layered research →
//! narrative budgeting → synthesis → differentiation.
//!
//! Stages are strictly sequential; concurrency exists only as bounded
//! fan-out inside a stage. Exactly two conditions terminate a run without
//! an episode: topic discovery exhausting all three strategies, and a
//! degenerate synthesis under the `Error` policy. Everything else degrades
//! with a logged fallback.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::budget::{topic_capacity, BudgetConfig, EpisodeLength};
use crate::discovery::{promote_candidates, TopicDiscovery};
use crate::episode::{EpisodeRecord, EpisodeScript, Podcast};
use crate::history::HistoryAnalyzer;
use crate::planner::{score_adherence, NarrativeBudgetPlanner};
use crate::provider::{GenerativeProvider, SearchProvider};
use crate::research::{LayeredResearchEngine, ResearchConfig};
use crate::synthesis::{
    concatenated_research, ContentSynthesizer, ShortScriptFallback, SynthesisError,
};
use crate::validation::DifferentiationValidator;

// =============================================================================
// Config
// =============================================================================

/// Pipeline knobs. Defaults reproduce the production policy.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How many recent episodes feed history analysis.
    pub history_window: usize,
    pub budget: BudgetConfig,
    pub research: ResearchConfig,
    /// Similarity at or above this fails differentiation.
    pub similarity_threshold: u8,
    /// Scripts shorter than this (chars) are degenerate generations.
    pub min_script_chars: usize,
    /// Deployment policy for degenerate generations.
    pub short_script_fallback: ShortScriptFallback,
    /// Rewrite passes after a failed differentiation check. Fixed at one;
    /// named so the retry cap is visible at the boundary.
    pub max_rewrite_passes: usize,
    /// Temperature for prose generation (script and rewrite).
    pub generation_temperature: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_window: 15,
            budget: BudgetConfig::default(),
            research: ResearchConfig::default(),
            similarity_threshold: 50,
            min_script_chars: 400,
            short_script_fallback: ShortScriptFallback::default(),
            max_rewrite_passes: 1,
            generation_temperature: 0.7,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// The caller-visible failures. Each carries the stage name and an
/// actionable message; infrastructure-only failures never reach here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("topic discovery exhausted all strategies")]
    TopicDiscoveryExhausted,

    #[error("{0}")]
    Synthesis(#[from] SynthesisError),
}

// =============================================================================
// Pipeline
// =============================================================================

/// One pipeline instance per provider pair. Runs are independent; no state
/// is shared across concurrent invocations.
pub struct EpisodePipeline {
    generative: Arc<dyn GenerativeProvider>,
    search: Arc<dyn SearchProvider>,
    config: PipelineConfig,
}

impl EpisodePipeline {
    pub fn new(generative: Arc<dyn GenerativeProvider>, search: Arc<dyn SearchProvider>) -> Self {
        Self::with_config(generative, search, PipelineConfig::default())
    }

    pub fn with_config(
        generative: Arc<dyn GenerativeProvider>,
        search: Arc<dyn SearchProvider>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generative,
            search,
            config,
        }
    }

    /// Plan and generate one episode script.
    ///
    /// `history` is the store's recent-episode list, ordered
    /// most-recent-first; the configured window bounds how much of it is
    /// read. The returned script and source list are the only things that
    /// outlive the run.
    pub async fn plan_and_generate_episode(
        &self,
        podcast: &Podcast,
        history: &[EpisodeRecord],
        target: EpisodeLength,
    ) -> Result<EpisodeScript, PipelineError> {
        let run_id = Uuid::new_v4();
        let target_words = target.target_words();
        info!(%run_id, podcast = %podcast.title, target_words, "episode generation started");

        // --- Stage 1: history analysis ---
        let analyzer = HistoryAnalyzer::new(self.generative.clone(), self.config.history_window);
        let summary = analyzer.analyze(history).await;
        info!(
            %run_id,
            episodes = summary.episode_count,
            topics = summary.recent_topics.len(),
            "history analyzed"
        );

        // --- Stage 2: topic discovery ---
        let discovery = TopicDiscovery::new(self.generative.clone(), self.search.clone());
        let candidates = discovery.discover(podcast.theme(), &summary).await;
        if candidates.is_empty() {
            return Err(PipelineError::TopicDiscoveryExhausted);
        }

        let capacity = topic_capacity(target_words, &self.config.budget);
        let mut topics = discovery.prioritize(&candidates, &summary, capacity).await;
        if topics.is_empty() {
            warn!(%run_id, "prioritization degraded, promoting candidates deterministically");
            topics = promote_candidates(&candidates, capacity);
        }
        info!(%run_id, selected = topics.len(), capacity, "topics selected");

        // --- Stage 3: layered research, parallel across topics ---
        let engine = LayeredResearchEngine::new(
            self.generative.clone(),
            self.search.clone(),
            self.config.research.clone(),
        );
        let research = engine.research_all(&topics).await;

        // --- Stage 4: narrative budgeting ---
        let planner =
            NarrativeBudgetPlanner::new(self.generative.clone(), self.config.budget.clone());
        let plan = planner.plan(&research, target).await;

        // --- Stage 5: content synthesis ---
        let synthesizer = ContentSynthesizer::new(
            self.generative.clone(),
            self.config.min_script_chars,
            self.config.generation_temperature,
        );
        let draft = match synthesizer.render(&plan, &research).await {
            Ok(script) => script,
            Err(e) => match self.config.short_script_fallback {
                ShortScriptFallback::Error => {
                    warn!(%run_id, error = %e, "synthesis failed, surfacing per policy");
                    return Err(e.into());
                }
                ShortScriptFallback::ConcatenateResearch => {
                    warn!(%run_id, error = %e, "synthesis failed, concatenating research per policy");
                    concatenated_research(&research)
                }
            },
        };

        // --- Stage 6: differentiation, with at most one rewrite ---
        let validator = DifferentiationValidator::new(
            self.generative.clone(),
            self.config.similarity_threshold,
        );
        let verdict = validator.validate(&draft, &summary).await;

        let content = if verdict.is_passing || self.config.max_rewrite_passes == 0 {
            draft
        } else {
            // Single rewrite, returned without a second validation round.
            info!(%run_id, similarity = verdict.similarity_score, "draft failed differentiation, rewriting once");
            synthesizer
                .rewrite(
                    &draft,
                    &verdict.redundant_elements,
                    &verdict.improvement_suggestions,
                )
                .await
        };

        let adherence_metrics = score_adherence(&plan, word_count(&content));
        let sources = collect_sources(&research);

        info!(
            %run_id,
            words = word_count(&content),
            sources = sources.len(),
            adherence = adherence_metrics.overall_adherence,
            "episode generation finished"
        );

        Ok(EpisodeScript {
            content,
            sources,
            adherence_metrics,
        })
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Union of research sources, de-duplicated in first-seen order.
fn collect_sources(research: &[crate::research::LayeredResearchResult]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    research
        .iter()
        .flat_map(|r| r.all_sources())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}
