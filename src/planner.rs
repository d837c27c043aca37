//! Narrative budgeting: turn researched topics and a word target into a
//! section-budgeted outline.
//!
//! The model-generated plan is validated and budget-enforced; any invalid
//! or unbalanced plan falls through to a fully deterministic structure so
//! the pipeline never stalls for lack of an outline.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::budget::{
    allocate, proportional_rescale, within_tolerance, BudgetConfig, EpisodeLength, TopicDepth,
};
use crate::parse::parse_structured;
use crate::prompts;
use crate::provider::{Attribution, GenerateRequest, GenerativeProvider};
use crate::research::LayeredResearchResult;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Introduction {
    #[serde(default)]
    pub approach: String,
    #[serde(default)]
    pub hook: String,
    #[serde(default)]
    pub word_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transitions {
    #[serde(default)]
    pub lead_in: String,
    #[serde(default)]
    pub lead_out: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BodySection {
    #[serde(default)]
    pub section_title: String,
    #[serde(default)]
    pub topic_reference: String,
    #[serde(default)]
    pub content_approach: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub transitions: Transitions,
    #[serde(default)]
    pub word_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conclusion {
    #[serde(default)]
    pub summarization_approach: String,
    #[serde(default)]
    pub final_thoughts: String,
    #[serde(default)]
    pub word_count: usize,
}

/// The word-budgeted outline a script must follow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NarrativeStructure {
    #[serde(default)]
    pub introduction: Introduction,
    #[serde(default)]
    pub body_sections: Vec<BodySection>,
    #[serde(default)]
    pub conclusion: Conclusion,
    #[serde(default)]
    pub overall_word_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adherence_metrics: Option<AdherenceMetrics>,
}

impl NarrativeStructure {
    /// Sum of all section word budgets.
    pub fn section_sum(&self) -> usize {
        self.introduction.word_count
            + self.body_sections.iter().map(|s| s.word_count).sum::<usize>()
            + self.conclusion.word_count
    }

    /// The validity bar for a model-generated plan: a non-empty
    /// introduction, at least one body section, and a conclusion.
    fn is_valid(&self) -> bool {
        let intro_present =
            !self.introduction.approach.trim().is_empty() || !self.introduction.hook.trim().is_empty();
        let conclusion_present = !self.conclusion.summarization_approach.trim().is_empty()
            || !self.conclusion.final_thoughts.trim().is_empty();
        intro_present && !self.body_sections.is_empty() && conclusion_present
    }
}

/// How closely content matches its planned structure, each score 0-100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdherenceMetrics {
    pub structure_score: u8,
    pub balance_score: u8,
    pub transition_score: u8,
    pub overall_adherence: u8,
}

// =============================================================================
// Planner
// =============================================================================

/// Converts selected topics and a target length into a budgeted outline.
pub struct NarrativeBudgetPlanner {
    generative: Arc<dyn GenerativeProvider>,
    budget: BudgetConfig,
}

impl NarrativeBudgetPlanner {
    pub fn new(generative: Arc<dyn GenerativeProvider>, budget: BudgetConfig) -> Self {
        Self { generative, budget }
    }

    /// Plan the episode. Total: a failed or invalid model plan falls back
    /// to the deterministic structure, and every returned plan has section
    /// budgets within tolerance of the target.
    pub async fn plan(
        &self,
        research: &[LayeredResearchResult],
        target: EpisodeLength,
    ) -> NarrativeStructure {
        let target_words = target.target_words();
        let section_count = target.class().body_section_count();

        // Weight sections by topic depth when they map one-to-one onto the
        // researched topics; equal split otherwise.
        let weights: Vec<f64> = if research.len() == section_count {
            research
                .iter()
                .map(|r| TopicDepth::from_depth_score(r.depth_metrics.overall_depth_score).weight())
                .collect()
        } else {
            vec![1.0; section_count]
        };
        let alloc = allocate(target_words, &weights, &self.budget);

        match self.request_plan(research, &alloc.body, alloc.introduction, alloc.conclusion, target_words).await {
            Ok(mut plan) if plan.is_valid() => {
                plan.overall_word_count = target_words;
                self.enforce_budget(&mut plan, target_words);
                info!(sections = plan.body_sections.len(), target_words, "narrative plan accepted");
                plan
            }
            Ok(_) => {
                warn!("model plan failed validation, using deterministic fallback");
                self.fallback_structure(research, target_words)
            }
            Err(e) => {
                warn!(error = %e, "model planning failed, using deterministic fallback");
                self.fallback_structure(research, target_words)
            }
        }
    }

    async fn request_plan(
        &self,
        research: &[LayeredResearchResult],
        section_budgets: &[usize],
        intro_words: usize,
        conclusion_words: usize,
        target_words: usize,
    ) -> Result<NarrativeStructure, PlanFailure> {
        let req = GenerateRequest::new(
            prompts::narrative_user_prompt(
                research,
                section_budgets,
                intro_words,
                conclusion_words,
                target_words,
            ),
            Attribution::new("planner::structure"),
        )
        .system(prompts::NARRATIVE_SYSTEM_PROMPT)
        .temperature(0.4)
        .max_tokens(4096)
        .json();

        let resp = self.generative.generate(req).await?;
        let plan: NarrativeStructure =
            parse_structured(&resp.text).map_err(|e| PlanFailure::Parse(e.to_string()))?;
        Ok(plan)
    }

    /// Rescale section budgets when the plan's sum drifts past the
    /// tolerance; the rounding remainder lands on the first body section.
    fn enforce_budget(&self, plan: &mut NarrativeStructure, target_words: usize) {
        let sum = plan.section_sum();
        if sum != 0 && within_tolerance(sum, target_words, &self.budget) {
            return;
        }

        warn!(sum, target_words, "plan word counts out of tolerance, rescaling");
        let mut counts = Vec::with_capacity(plan.body_sections.len() + 2);
        counts.push(plan.introduction.word_count);
        counts.extend(plan.body_sections.iter().map(|s| s.word_count));
        counts.push(plan.conclusion.word_count);

        let remainder_index = if plan.body_sections.is_empty() { 0 } else { 1 };
        let rescaled = proportional_rescale(&counts, target_words, remainder_index);

        plan.introduction.word_count = rescaled[0];
        for (section, count) in plan.body_sections.iter_mut().zip(&rescaled[1..]) {
            section.word_count = *count;
        }
        plan.conclusion.word_count = rescaled[rescaled.len() - 1];
    }

    /// The deterministic fallback: one body section per selected topic,
    /// generic transition templates, word counts summing exactly to the
    /// target with the rounding remainder on the first section.
    pub fn fallback_structure(
        &self,
        research: &[LayeredResearchResult],
        target_words: usize,
    ) -> NarrativeStructure {
        let section_count = research.len().max(1);
        let weights: Vec<f64> = if research.is_empty() {
            vec![1.0]
        } else {
            research
                .iter()
                .map(|r| TopicDepth::from_depth_score(r.depth_metrics.overall_depth_score).weight())
                .collect()
        };
        let alloc = allocate(target_words, &weights, &self.budget);

        let body_sections: Vec<BodySection> = (0..section_count)
            .map(|idx| {
                let topic = research
                    .get(idx)
                    .map(|r| r.topic.clone())
                    .unwrap_or_else(|| "the day's main story".to_string());
                BodySection {
                    section_title: topic.clone(),
                    topic_reference: topic.clone(),
                    content_approach: "Report the story from the research narrative, facts first, then analysis.".to_string(),
                    key_points: research
                        .get(idx)
                        .map(|r| {
                            r.layers
                                .iter()
                                .flat_map(|l| l.key_insights.iter())
                                .take(3)
                                .cloned()
                                .collect()
                        })
                        .unwrap_or_default(),
                    transitions: fallback_transitions(idx, section_count, &topic),
                    word_count: alloc.body[idx],
                }
            })
            .collect();

        NarrativeStructure {
            introduction: Introduction {
                approach: "Open with the single most consequential development of the episode.".to_string(),
                hook: "What changed, who it affects, and why it matters now.".to_string(),
                word_count: alloc.introduction,
            },
            body_sections,
            conclusion: Conclusion {
                summarization_approach: "Recap each story in one sentence, then the common thread.".to_string(),
                final_thoughts: "What to watch as these stories develop.".to_string(),
                word_count: alloc.conclusion,
            },
            overall_word_count: target_words,
            adherence_metrics: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum PlanFailure {
    #[error("provider call failed: {0}")]
    Provider(#[from] crate::provider::ProviderError),
    #[error("plan was not parseable: {0}")]
    Parse(String),
}

/// Generic transition templates for the fallback plan: distinct leading and
/// trailing templates for the first and last sections, the interior template
/// elsewhere.
fn fallback_transitions(idx: usize, section_count: usize, topic: &str) -> Transitions {
    let lead_in = if idx == 0 {
        format!("Let's begin by examining {topic}.")
    } else {
        "This leads us to our next topic.".to_string()
    };
    let lead_out = if idx + 1 == section_count {
        "That brings us to the end of today's stories.".to_string()
    } else {
        "This leads us to our next topic.".to_string()
    };
    Transitions { lead_in, lead_out }
}

// =============================================================================
// Adherence scoring
// =============================================================================

/// Score how closely the drafted script matches its plan.
///
/// Deterministic so the metric survives provider failure: structure from
/// plan completeness, balance from draft length against the overall budget,
/// transitions from section coverage.
pub fn score_adherence(plan: &NarrativeStructure, draft_word_count: usize) -> AdherenceMetrics {
    let mut structure: i32 = 100;
    if plan.introduction.approach.trim().is_empty() && plan.introduction.hook.trim().is_empty() {
        structure -= 40;
    }
    if plan.body_sections.is_empty() {
        structure -= 40;
    }
    if plan.conclusion.summarization_approach.trim().is_empty()
        && plan.conclusion.final_thoughts.trim().is_empty()
    {
        structure -= 20;
    }

    let balance = if plan.overall_word_count == 0 {
        0.0
    } else {
        let drift = draft_word_count.abs_diff(plan.overall_word_count) as f64
            / plan.overall_word_count as f64;
        100.0 * (1.0 - (drift / 0.25).min(1.0))
    };

    let transition = if plan.body_sections.is_empty() {
        0.0
    } else {
        let covered = plan
            .body_sections
            .iter()
            .filter(|s| {
                !s.transitions.lead_in.trim().is_empty() && !s.transitions.lead_out.trim().is_empty()
            })
            .count();
        100.0 * covered as f64 / plan.body_sections.len() as f64
    };

    let structure_score = structure.max(0) as u8;
    let balance_score = balance.round() as u8;
    let transition_score = transition.round() as u8;
    let overall =
        (structure_score as f64 + balance_score as f64 + transition_score as f64) / 3.0;

    AdherenceMetrics {
        structure_score,
        balance_score,
        transition_score,
        overall_adherence: overall.round() as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{DepthMetrics, ResearchLayer};

    fn research(topic: &str, depth: u8) -> LayeredResearchResult {
        LayeredResearchResult {
            topic: topic.into(),
            layers: vec![ResearchLayer {
                level: 1,
                content: String::new(),
                sources: Vec::new(),
                key_insights: vec!["an insight".into()],
            }],
            synthesized_content: "narrative".into(),
            depth_metrics: DepthMetrics::from_scores(depth, depth, depth),
        }
    }

    fn planner() -> NarrativeBudgetPlanner {
        struct Unreachable;
        #[async_trait::async_trait]
        impl GenerativeProvider for Unreachable {
            async fn generate(
                &self,
                _req: GenerateRequest,
            ) -> Result<crate::provider::GenerateResponse, crate::provider::ProviderError> {
                Err(crate::provider::ProviderError::config("not wired in this test"))
            }
        }
        NarrativeBudgetPlanner::new(Arc::new(Unreachable), BudgetConfig::default())
    }

    #[test]
    fn test_fallback_sums_exactly_to_target() {
        let p = planner();
        for target in [375, 800, 1500, 2500] {
            let plan = p.fallback_structure(&[research("a", 9), research("b", 5)], target);
            assert_eq!(plan.section_sum(), target, "target={target}");
            assert_eq!(plan.overall_word_count, target);
        }
    }

    #[test]
    fn test_fallback_one_section_per_topic() {
        let p = planner();
        let plan = p.fallback_structure(&[research("a", 5), research("b", 5), research("c", 5)], 1500);
        assert_eq!(plan.body_sections.len(), 3);
        assert_eq!(plan.body_sections[1].topic_reference, "b");
    }

    #[test]
    fn test_fallback_single_topic_three_minute_episode() {
        let p = planner();
        let plan = p.fallback_structure(&[research("solo", 5)], 375);
        assert_eq!(plan.body_sections.len(), 1);
        assert!((38..=56).contains(&plan.introduction.word_count));
        assert!((38..=56).contains(&plan.conclusion.word_count));
        assert_eq!(plan.section_sum(), 375);
    }

    #[test]
    fn test_fallback_transition_templates() {
        let p = planner();
        let plan = p.fallback_structure(&[research("a", 5), research("b", 5), research("c", 5)], 1500);
        assert!(plan.body_sections[0]
            .transitions
            .lead_in
            .starts_with("Let's begin by examining"));
        assert_eq!(
            plan.body_sections[1].transitions.lead_in,
            "This leads us to our next topic."
        );
        assert_eq!(
            plan.body_sections[1].transitions.lead_out,
            "This leads us to our next topic."
        );
        assert!(plan.body_sections[2]
            .transitions
            .lead_out
            .starts_with("That brings us to the end"));
    }

    #[test]
    fn test_enforce_budget_rescales_out_of_tolerance_plan() {
        let p = planner();
        let mut plan = p.fallback_structure(&[research("a", 5)], 800);
        // Blow the budget by doubling the body section.
        plan.body_sections[0].word_count *= 2;
        assert!(!within_tolerance(plan.section_sum(), 800, &BudgetConfig::default()));

        p.enforce_budget(&mut plan, 800);
        assert_eq!(plan.section_sum(), 800);
    }

    #[test]
    fn test_enforce_budget_leaves_in_tolerance_plan_alone() {
        let p = planner();
        let mut plan = p.fallback_structure(&[research("a", 5)], 800);
        plan.introduction.word_count += 10; // within 5% of 800
        let before = plan.section_sum();
        p.enforce_budget(&mut plan, 800);
        assert_eq!(plan.section_sum(), before);
    }

    #[test]
    fn test_validity_requires_intro_body_conclusion() {
        let p = planner();
        let valid = p.fallback_structure(&[research("a", 5)], 800);
        assert!(valid.is_valid());

        let mut no_body = valid.clone();
        no_body.body_sections.clear();
        assert!(!no_body.is_valid());

        let mut no_intro = valid.clone();
        no_intro.introduction.approach.clear();
        no_intro.introduction.hook.clear();
        assert!(!no_intro.is_valid());

        let mut no_conclusion = valid;
        no_conclusion.conclusion.summarization_approach.clear();
        no_conclusion.conclusion.final_thoughts.clear();
        assert!(!no_conclusion.is_valid());
    }

    #[test]
    fn test_adherence_perfect_plan_and_draft() {
        let p = planner();
        let plan = p.fallback_structure(&[research("a", 5)], 800);
        let metrics = score_adherence(&plan, 800);
        assert_eq!(metrics.structure_score, 100);
        assert_eq!(metrics.balance_score, 100);
        assert_eq!(metrics.transition_score, 100);
        assert_eq!(metrics.overall_adherence, 100);
    }

    #[test]
    fn test_adherence_penalizes_length_drift() {
        let p = planner();
        let plan = p.fallback_structure(&[research("a", 5)], 800);
        let close = score_adherence(&plan, 760);
        let far = score_adherence(&plan, 400);
        assert!(close.balance_score > far.balance_score);
        assert_eq!(far.balance_score, 0);
    }

    #[test]
    fn test_structure_parses_with_missing_fields() {
        let plan: NarrativeStructure = serde_json::from_str(
            r#"{"introduction": {"approach": "cold open"}, "body_sections": [{"section_title": "s"}]}"#,
        )
        .unwrap();
        assert_eq!(plan.introduction.approach, "cold open");
        assert_eq!(plan.body_sections.len(), 1);
        assert_eq!(plan.conclusion.word_count, 0);
        assert!(!plan.is_valid());
    }
}
