//! Prompt builders for every pipeline stage.
//!
//! System prompts are consts so their JSON contracts stay next to the rules;
//! user prompts are assembled by small builder fns. The structs that parse
//! these responses live with their stages — the schemas embedded here are
//! the source of truth for field names.

use crate::discovery::{CandidateTopic, DeepResearchTopic};
use crate::history::HistorySummary;
use crate::planner::NarrativeStructure;
use crate::research::LayeredResearchResult;

// =============================================================================
// History analysis
// =============================================================================

pub const HISTORY_SYSTEM_PROMPT: &str = "\
You are an editorial archivist for a news podcast. You receive compact
digests of recent episodes and produce a coverage summary used to keep new
episodes from repeating old ones.

Rules:
- List at most 10 topics, most-covered first, with the number of episodes
  each appeared in.
- List recurring themes: angles or framings that keep showing up across
  episodes, not individual stories.
- Count a topic once per episode even if it dominated the episode.

Respond with JSON only:
{
  \"topics\": [
    { \"topic\": \"...\", \"frequency\": 2 }
  ],
  \"themes\": [\"...\"]
}";

pub fn history_user_prompt(episode_digests: &[String]) -> String {
    let mut prompt = String::from("## Recent episodes (most recent first)\n\n");
    for (idx, digest) in episode_digests.iter().enumerate() {
        prompt.push_str(&format!("### Episode {}\n{}\n\n", idx + 1, digest));
    }
    prompt
}

// =============================================================================
// Topic discovery
// =============================================================================

pub const DISCOVERY_DIRECT_SYSTEM_PROMPT: &str = "\
You are a news desk editor planning the next episode of a podcast. Use web
search to ground every suggestion in reporting from the last 14 days.

Requirements:
- Produce 5-7 topic ideas. Each must be a distinct story — no overlapping
  coverage of the same event.
- Spread across categories: aim for at least one regulatory/policy item,
  one financial/market item, and one public-impact item when the beat
  allows it.
- For each topic give a 1-2 sentence rationale and 2-3 key questions an
  episode segment should answer.
- relevance is 1-10: how central the story is to this podcast's beat.
- recency is a short freshness label like \"this week\" or \"2 days ago\".
- query is the single web search that best develops the story further.
- Avoid every topic and theme listed as already covered.

Respond with a JSON array only:
[
  {
    \"topic\": \"...\",
    \"relevance\": 8,
    \"query\": \"...\",
    \"recency\": \"...\",
    \"rationale\": \"...\",
    \"key_questions\": [\"...\"]
  }
]";

pub fn discovery_direct_user_prompt(theme: &str, history: &HistorySummary) -> String {
    format!(
        "## Podcast beat\n\n{}\n\n## Already covered (avoid)\n\n{}",
        theme,
        format_coverage(history)
    )
}

pub const DISCOVERY_QUERY_SYSTEM_PROMPT: &str = "\
You generate web search queries for a news podcast's topic scouting pass.
Produce exactly 5 exploratory queries that together cover the beat from
different angles: breaking developments, policy moves, market reaction,
expert commentary, and anything under-covered given the recent-episode
summary. Queries must be concrete enough to return news results.

Respond with a JSON array of 5 strings only.";

pub fn discovery_query_user_prompt(theme: &str, history: &HistorySummary) -> String {
    format!(
        "## Podcast beat\n\n{}\n\n## Recent coverage\n\n{}",
        theme,
        format_coverage(history)
    )
}

pub const DISCOVERY_EXTRACT_SYSTEM_PROMPT: &str = "\
You extract podcast episode topics from raw web search results. The text
below is the concatenated output of several news searches.

Requirements:
- Extract 5-7 candidate topics actually supported by the search results —
  do not invent stories the results do not mention.
- relevance is 1-10 against the podcast beat; recency is a short freshness
  label taken from the results when dates are present.
- query is the follow-up web search that would best develop the topic.
- Skip candidates you cannot give both a topic and a query for.

Respond with a JSON array only:
[
  { \"topic\": \"...\", \"relevance\": 7, \"query\": \"...\", \"recency\": \"...\", \"rationale\": \"...\" }
]";

pub fn discovery_extract_user_prompt(theme: &str, combined_results: &str) -> String {
    format!(
        "## Podcast beat\n\n{}\n\n## Search results\n\n{}",
        theme, combined_results
    )
}

pub const PRIORITIZE_SYSTEM_PROMPT: &str = "\
You are the planning editor choosing which candidate stories get deep
research for the next episode. Fewer, deeper topics beat broad shallow
coverage.

For each selected topic score importance, newsworthiness and
depth_potential 1-10, give a one-sentence rationale, 2-3 key questions the
segment must answer, and 2-3 web search queries to seed research.

Rules:
- Select at most the number of topics requested, ranked best-first.
- Prefer stories orthogonal to each other and to the covered list.
- depth_potential rewards stories with documents, data or disagreement to
  dig into — not just announcements.

Respond with JSON only:
{
  \"topics\": [
    {
      \"topic\": \"...\",
      \"importance\": 8,
      \"newsworthiness\": 9,
      \"depth_potential\": 7,
      \"rationale\": \"...\",
      \"key_questions\": [\"...\"],
      \"search_queries\": [\"...\"]
    }
  ]
}";

pub fn prioritize_user_prompt(
    candidates: &[CandidateTopic],
    history: &HistorySummary,
    max_topics: usize,
) -> String {
    let mut prompt = format!("Select at most {max_topics} topics.\n\n## Candidates\n\n");
    for c in candidates {
        prompt.push_str(&format!("- {} (relevance {}", c.topic, c.relevance));
        if let Some(recency) = &c.recency {
            prompt.push_str(&format!(", {recency}"));
        }
        prompt.push(')');
        if let Some(rationale) = &c.rationale {
            prompt.push_str(&format!(" — {rationale}"));
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\n## Already covered\n\n{}",
        format_coverage(history)
    ));
    prompt
}

// =============================================================================
// Layered research
// =============================================================================

pub const INSIGHT_SYSTEM_PROMPT: &str = "\
You distill raw news search results into key insights for a research brief.

Rules:
- Produce 5-7 insights, each one self-contained sentence.
- Keep concrete facts: names, figures, dates, stated positions.
- Prefer what the results establish over what they merely speculate.
- No numbering, no markdown.

Respond with a JSON array of strings only.";

pub fn insight_user_prompt(topic: &str, level: u8, content: &str) -> String {
    format!(
        "## Topic\n\n{topic}\n\n## Research pass\n\nLayer {level} of 3\n\n## Search results\n\n{content}"
    )
}

pub const DEEP_QUERY_SYSTEM_PROMPT: &str = "\
You design the deep research pass for a news story. Given the story, the
key questions, and what the first two research passes found, produce
exactly 5 sophisticated search queries:
1. expert analysis of the story,
2. contrasting or dissenting viewpoints,
3. historical context or precedent,
4. future implications or predictions,
5. one derived directly from an unanswered key question.

Respond with a JSON array of 5 strings only.";

pub fn deep_query_user_prompt(topic: &DeepResearchTopic, insights: &[String]) -> String {
    format!(
        "## Story\n\n{}\n\n## Key questions\n\n{}\n\n## Insights so far\n\n{}",
        topic.topic,
        topic.key_questions.join("\n"),
        insights.join("\n")
    )
}

pub const RESEARCH_SYNTHESIS_SYSTEM_PROMPT: &str = "\
You write the research narrative for one podcast segment. You receive the
insights from three research passes of increasing depth.

Rules:
- 400-800 words of flowing prose, no headings, no markdown, no bullet
  lists.
- Weight the deep pass (layer 3) heaviest: expert views, context and
  implications should anchor the narrative, with layers 1-2 supplying the
  factual spine.
- Keep every load-bearing name, number and date from the insights.
- Do not editorialize beyond what the insights support.";

pub fn research_synthesis_user_prompt(topic: &str, layers: &[(u8, &[String])]) -> String {
    let mut prompt = format!("## Topic\n\n{topic}\n\n");
    for (level, insights) in layers {
        prompt.push_str(&format!("## Layer {level} insights\n\n"));
        for insight in *insights {
            prompt.push_str(&format!("- {insight}\n"));
        }
        prompt.push('\n');
    }
    prompt
}

pub const DEPTH_METRICS_SYSTEM_PROMPT: &str = "\
You score a research narrative on three dimensions, each 1-10:
- factual_density: concrete verifiable facts per unit of text.
- insight_score: analysis that goes beyond restating the facts.
- contextual_depth: historical grounding and forward-looking implications.

Respond with JSON only:
{ \"factual_density\": 7, \"insight_score\": 6, \"contextual_depth\": 8 }";

pub fn depth_metrics_user_prompt(topic: &str, synthesis: &str) -> String {
    format!("## Topic\n\n{topic}\n\n## Narrative\n\n{synthesis}")
}

// =============================================================================
// Narrative planning
// =============================================================================

pub const NARRATIVE_SYSTEM_PROMPT: &str = "\
You plan the narrative structure of a news podcast episode. You receive
the researched topics and per-section word budgets; produce an outline
that a script writer will follow exactly.

Rules:
- The introduction needs an approach (how it opens) and a hook (the line
  of tension that pulls the listener in).
- Each body section covers one researched angle, names the topic it draws
  from, lists 2-4 key points, and carries lead-in and lead-out transition
  sentences.
- The conclusion needs a summarization approach and closing thoughts.
- Use the word budgets provided for every word_count field; the totals
  must add up to the overall target.

Respond with JSON only:
{
  \"introduction\": { \"approach\": \"...\", \"hook\": \"...\", \"word_count\": 90 },
  \"body_sections\": [
    {
      \"section_title\": \"...\",
      \"topic_reference\": \"...\",
      \"content_approach\": \"...\",
      \"key_points\": [\"...\"],
      \"transitions\": { \"lead_in\": \"...\", \"lead_out\": \"...\" },
      \"word_count\": 300
    }
  ],
  \"conclusion\": { \"summarization_approach\": \"...\", \"final_thoughts\": \"...\", \"word_count\": 90 },
  \"overall_word_count\": 800
}";

pub fn narrative_user_prompt(
    research: &[LayeredResearchResult],
    section_budgets: &[usize],
    intro_words: usize,
    conclusion_words: usize,
    target_words: usize,
) -> String {
    let mut prompt = format!(
        "Overall target: {target_words} words. Introduction: {intro_words} words. \
         Conclusion: {conclusion_words} words. Body section budgets in order: {section_budgets:?}.\n\n"
    );
    for result in research {
        prompt.push_str(&format!(
            "## Researched topic: {}\n\n{}\n\n",
            result.topic, result.synthesized_content
        ));
    }
    prompt
}

// =============================================================================
// Script synthesis
// =============================================================================

pub const SCRIPT_SYSTEM_PROMPT: &str = "\
You write the final script for a news podcast episode, following the
outline and research exactly.

Hard constraints — violating any of these makes the script unusable:
- No speaker labels or host names.
- No audio stage directions (no [music], (pause), *laughs* or similar).
- No markdown: no headings, bullets, bold or links.
- No references to specific dates, days of the week, or publication
  cadence (\"yesterday\", \"this Tuesday\", \"last week's episode\").
- Standard punctuation only.

Soft constraints:
- Hit each section's word budget within a few percent.
- Use each section's lead-in and lead-out transitions, reworded to flow.
- Keep all names, figures and reported facts from the research narrative;
  relative time references are the thing to avoid, not the facts.";

pub fn script_user_prompt(
    structure: &NarrativeStructure,
    research: &[LayeredResearchResult],
) -> String {
    let outline = serde_json::to_string_pretty(structure).unwrap_or_default();
    let mut prompt = format!("## Outline\n\n{outline}\n\n## Research narratives\n\n");
    for result in research {
        prompt.push_str(&format!(
            "### {}\n\n{}\n\n",
            result.topic, result.synthesized_content
        ));
    }
    prompt.push_str("Write the complete script now, plain prose only.");
    prompt
}

// =============================================================================
// Differentiation validation
// =============================================================================

pub const VALIDATION_SYSTEM_PROMPT: &str = "\
You audit a draft podcast script against the show's recent coverage for
redundancy.

Scoring:
- similarity_score is 0-100: 0 means entirely new ground, 100 means a
  rehash of prior episodes.
- unique_elements: topics, perspectives or framings the draft introduces
  that the history does not contain.
- redundant_elements: specific passages or angles that repeat prior
  coverage.
- is_passing is true only when similarity_score is below 50 AND the draft
  introduces topics or perspectives that are not dominant in the history.
- improvement_suggestions: concrete reframings for each redundant element.

Respond with JSON only:
{
  \"similarity_score\": 35,
  \"unique_elements\": [\"...\"],
  \"redundant_elements\": [\"...\"],
  \"is_passing\": true,
  \"improvement_suggestions\": [\"...\"]
}";

pub fn validation_user_prompt(draft: &str, history: &HistorySummary) -> String {
    format!(
        "## Recent coverage\n\n{}\n\n## Draft script\n\n{}",
        format_coverage(history),
        draft
    )
}

pub const REWRITE_SYSTEM_PROMPT: &str = "\
You revise a podcast script that overlaps too much with prior episodes.
Rework ONLY the flagged redundant elements: change the analytical framing
of those passages — a different angle, lens or line of argument — not just
the wording. Leave the unique material intact, keep the section structure
and word budgets, and obey the same hard constraints as the original
script (no speaker labels, no stage directions, no markdown, no relative
date references, standard punctuation).";

pub fn rewrite_user_prompt(
    draft: &str,
    redundant_elements: &[String],
    suggestions: &[String],
) -> String {
    let mut prompt = String::from("## Redundant elements to reframe\n\n");
    for element in redundant_elements {
        prompt.push_str(&format!("- {element}\n"));
    }
    if !suggestions.is_empty() {
        prompt.push_str("\n## Suggested reframings\n\n");
        for suggestion in suggestions {
            prompt.push_str(&format!("- {suggestion}\n"));
        }
    }
    prompt.push_str(&format!("\n## Current script\n\n{draft}"));
    prompt
}

// =============================================================================
// Shared formatting
// =============================================================================

/// Render a history summary as prompt text.
fn format_coverage(history: &HistorySummary) -> String {
    if history.episode_count == 0 {
        return "No prior episodes.".to_string();
    }

    let mut out = String::new();
    if history.recent_topics.is_empty() {
        out.push_str("Topics: (unavailable)\n");
    } else {
        out.push_str("Topics:\n");
        for t in &history.recent_topics {
            out.push_str(&format!("- {} ({} episodes)\n", t.topic, t.frequency));
        }
    }
    if !history.recurrent_themes.is_empty() {
        out.push_str("Recurring themes:\n");
        for theme in &history.recurrent_themes {
            out.push_str(&format!("- {theme}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::TopicFrequency;

    fn sample_history() -> HistorySummary {
        HistorySummary {
            recent_topics: vec![TopicFrequency {
                topic: "grid storage auctions".into(),
                frequency: 3,
            }],
            covered_sources: Default::default(),
            recurrent_themes: vec!["regulator vs. utility framing".into()],
            episode_count: 5,
        }
    }

    #[test]
    fn test_coverage_formatting_includes_topics_and_themes() {
        let text = format_coverage(&sample_history());
        assert!(text.contains("grid storage auctions (3 episodes)"));
        assert!(text.contains("regulator vs. utility framing"));
    }

    #[test]
    fn test_coverage_formatting_empty_history() {
        let empty = HistorySummary::empty(0);
        assert_eq!(format_coverage(&empty), "No prior episodes.");
    }

    #[test]
    fn test_prioritize_prompt_carries_cap() {
        let candidates = vec![CandidateTopic::new(
            "offshore wind permits",
            9,
            "offshore wind permitting backlog",
        )];
        let prompt = prioritize_user_prompt(&candidates, &sample_history(), 2);
        assert!(prompt.contains("at most 2 topics"));
        assert!(prompt.contains("offshore wind permits"));
    }
}
