//! Content synthesis: render the final script from the outline and
//! research, under hard formatting constraints.
//!
//! A degenerate (implausibly short) generation is a hard stage failure —
//! the one synthesis condition allowed to terminate the pipeline — unless
//! the deployment policy opts into the concatenated-research fallback.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::planner::NarrativeStructure;
use crate::prompts;
use crate::provider::{Attribution, GenerateRequest, GenerativeProvider, ProviderError};
use crate::research::LayeredResearchResult;

/// What to do when generation comes back below the minimum length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShortScriptFallback {
    /// Surface an explicit generation error to the caller.
    #[default]
    Error,
    /// Return the unstructured topic syntheses concatenated instead.
    ConcatenateResearch,
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Generation produced implausibly small output.
    #[error("content synthesis produced {actual} chars (minimum {min})")]
    ContentTooShort { actual: usize, min: usize },

    #[error("content synthesis provider call failed: {0}")]
    Provider(#[from] ProviderError),
}

/// Renders final prose following the outline and research.
pub struct ContentSynthesizer {
    generative: Arc<dyn GenerativeProvider>,
    min_script_chars: usize,
    temperature: f32,
}

impl ContentSynthesizer {
    pub fn new(
        generative: Arc<dyn GenerativeProvider>,
        min_script_chars: usize,
        temperature: f32,
    ) -> Self {
        Self {
            generative,
            min_script_chars,
            temperature,
        }
    }

    /// One generation call for the whole script. The sanitized result must
    /// clear the minimum length or the stage fails hard.
    pub async fn render(
        &self,
        plan: &NarrativeStructure,
        research: &[LayeredResearchResult],
    ) -> Result<String, SynthesisError> {
        let req = GenerateRequest::new(
            prompts::script_user_prompt(plan, research),
            Attribution::new("synthesis::render"),
        )
        .system(prompts::SCRIPT_SYSTEM_PROMPT)
        .temperature(self.temperature)
        .max_tokens(8192);

        let resp = self.generative.generate(req).await?;
        let script = sanitize_script(&resp.text);

        if script.chars().count() < self.min_script_chars {
            return Err(SynthesisError::ContentTooShort {
                actual: script.chars().count(),
                min: self.min_script_chars,
            });
        }

        info!(chars = script.chars().count(), "script rendered");
        Ok(script)
    }

    /// The single differentiation rewrite: reframe only the flagged
    /// redundant elements. If the rewrite itself fails or degenerates, the
    /// original draft stands — the rewrite must never lose a usable script.
    pub async fn rewrite(
        &self,
        draft: &str,
        redundant_elements: &[String],
        suggestions: &[String],
    ) -> String {
        let req = GenerateRequest::new(
            prompts::rewrite_user_prompt(draft, redundant_elements, suggestions),
            Attribution::new("synthesis::rewrite"),
        )
        .system(prompts::REWRITE_SYSTEM_PROMPT)
        .temperature(self.temperature)
        .max_tokens(8192);

        match self.generative.generate(req).await {
            Ok(resp) => {
                let rewritten = sanitize_script(&resp.text);
                if rewritten.chars().count() < self.min_script_chars {
                    warn!(
                        chars = rewritten.chars().count(),
                        "rewrite came back degenerate, keeping original draft"
                    );
                    draft.to_string()
                } else {
                    rewritten
                }
            }
            Err(e) => {
                warn!(error = %e, "rewrite call failed, keeping original draft");
                draft.to_string()
            }
        }
    }
}

/// The deterministic stand-in used under
/// [`ShortScriptFallback::ConcatenateResearch`]: the topic syntheses joined
/// in order.
pub fn concatenated_research(research: &[LayeredResearchResult]) -> String {
    research
        .iter()
        .map(|r| r.synthesized_content.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// =============================================================================
// Sanitizer
// =============================================================================

static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("static regex"));
static STAGE_DIRECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[[^\]]{0,60}\]|\((?:pause|music|sfx|laughs?|applause|beat|intro|outro)[^)]*\)").expect("static regex"));
static SPEAKER_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^(?:host|anchor|narrator|speaker)\s*\d*\s*:\s*").expect("static regex"));
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s*").expect("static regex"));
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static regex"));

/// Strip residual formatting the hard constraints forbid: markdown, stage
/// directions, and speaker labels. Prompt constraints do most of the work;
/// this catches what slips through.
pub fn sanitize_script(raw: &str) -> String {
    let mut text = MARKDOWN_LINK.replace_all(raw, "$1").to_string();
    text = STAGE_DIRECTION.replace_all(&text, "").to_string();
    text = SPEAKER_LABEL.replace_all(&text, "").to_string();
    text = HEADING.replace_all(&text, "").to_string();
    text = text.replace("**", "").replace('*', "");
    text = BLANK_RUNS.replace_all(&text, "\n\n").to_string();
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{DepthMetrics, ResearchLayer};

    #[test]
    fn test_sanitize_strips_markdown() {
        let raw = "## Opening\n\n**Big** news about *grids* and [the report](https://x.example).";
        let clean = sanitize_script(raw);
        assert_eq!(clean, "Opening\n\nBig news about grids and the report.");
    }

    #[test]
    fn test_sanitize_strips_stage_directions_and_labels() {
        let raw = "HOST: Welcome back. [upbeat music] The auction cleared (pause) at a record.";
        let clean = sanitize_script(raw);
        assert_eq!(clean, "Welcome back.  The auction cleared  at a record.");
    }

    #[test]
    fn test_sanitize_keeps_ordinary_parentheses() {
        let raw = "The agency (founded decades ago) approved the plan.";
        assert_eq!(sanitize_script(raw), raw);
    }

    #[test]
    fn test_sanitize_collapses_blank_runs() {
        let raw = "First paragraph.\n\n\n\nSecond paragraph.";
        assert_eq!(sanitize_script(raw), "First paragraph.\n\nSecond paragraph.");
    }

    #[test]
    fn test_concatenated_research_joins_in_order() {
        let mk = |topic: &str, content: &str| LayeredResearchResult {
            topic: topic.into(),
            layers: vec![ResearchLayer {
                level: 1,
                content: String::new(),
                sources: Vec::new(),
                key_insights: Vec::new(),
            }],
            synthesized_content: content.into(),
            depth_metrics: DepthMetrics::neutral(),
        };
        let joined = concatenated_research(&[mk("a", "First narrative."), mk("b", ""), mk("c", "Second.")]);
        assert_eq!(joined, "First narrative.\n\nSecond.");
    }
}
