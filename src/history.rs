//! History analysis: summarize prior episodes to steer away from repeats.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::episode::EpisodeRecord;
use crate::parse::parse_structured;
use crate::prompts;
use crate::provider::{Attribution, GenerateRequest, GenerativeProvider};

/// Transcript prefix used when an episode has no bullet points.
const TRANSCRIPT_PREFIX_CHARS: usize = 600;

/// A topic and the number of recent episodes it appeared in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicFrequency {
    pub topic: String,
    #[serde(default)]
    pub frequency: u32,
}

/// Summary of a bounded window of prior episodes.
///
/// Built fresh per planning run and read-only downstream; the episode store
/// owns the underlying records.
#[derive(Debug, Clone, Default)]
pub struct HistorySummary {
    pub recent_topics: Vec<TopicFrequency>,
    pub covered_sources: BTreeSet<String>,
    pub recurrent_themes: Vec<String>,
    pub episode_count: usize,
}

impl HistorySummary {
    /// Summary with no AI-derived content, only the structural count.
    pub fn empty(episode_count: usize) -> Self {
        Self {
            episode_count,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    topics: Vec<TopicFrequency>,
    #[serde(default)]
    themes: Vec<String>,
}

/// Summarizes the recent-episode window into topics, themes and sources.
pub struct HistoryAnalyzer {
    generative: Arc<dyn GenerativeProvider>,
    /// Window size L: at most this many most-recent episodes are considered.
    window: usize,
}

impl HistoryAnalyzer {
    pub fn new(generative: Arc<dyn GenerativeProvider>, window: usize) -> Self {
        Self { generative, window }
    }

    /// Analyze the episode list (ordered most-recent-first).
    ///
    /// Total: provider or parse failure degrades the AI-derived fields to
    /// empty, but `episode_count` and the union of declared sources are
    /// always correct. Zero episodes yields the all-empty first-episode
    /// summary.
    pub async fn analyze(&self, episodes: &[EpisodeRecord]) -> HistorySummary {
        let window: Vec<&EpisodeRecord> = episodes.iter().take(self.window).collect();
        if window.is_empty() {
            debug!("no prior episodes; first-episode summary");
            return HistorySummary::empty(0);
        }

        let covered_sources: BTreeSet<String> = window
            .iter()
            .flat_map(|e| e.sources.iter().map(|s| s.url.clone()))
            .collect();

        let digests: Vec<String> = window.iter().map(|e| episode_digest(e)).collect();

        let req = GenerateRequest::new(
            prompts::history_user_prompt(&digests),
            Attribution::new("history::summarize"),
        )
        .system(prompts::HISTORY_SYSTEM_PROMPT)
        .temperature(0.2)
        .max_tokens(2048)
        .json();

        let (recent_topics, recurrent_themes) = match self.generative.generate(req).await {
            Ok(resp) => match parse_structured::<HistoryResponse>(&resp.text) {
                Ok(parsed) => {
                    let mut topics = parsed.topics;
                    topics.truncate(10);
                    (topics, parsed.themes)
                }
                Err(e) => {
                    warn!(error = %e, "history summary parse failed; degrading to metadata-only");
                    (Vec::new(), Vec::new())
                }
            },
            Err(e) => {
                warn!(error = %e, "history summary call failed; degrading to metadata-only");
                (Vec::new(), Vec::new())
            }
        };

        HistorySummary {
            recent_topics,
            covered_sources,
            recurrent_themes,
            episode_count: window.len(),
        }
    }
}

/// Compact representation of one episode for the consolidated prompt:
/// bullet points when present, a truncated transcript prefix otherwise.
fn episode_digest(episode: &EpisodeRecord) -> String {
    if let Some(bullets) = &episode.bullet_points {
        if !bullets.is_empty() {
            return bullets
                .iter()
                .map(|b| format!("- {b}"))
                .collect::<Vec<_>>()
                .join("\n");
        }
    }

    match &episode.content {
        Some(content) if !content.trim().is_empty() => {
            let prefix: String = content.chars().take(TRANSCRIPT_PREFIX_CHARS).collect();
            prefix
        }
        _ => "(no transcript available)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::SourceRef;
    use chrono::Utc;
    use std::time::Duration;

    struct FailingProvider;

    #[async_trait::async_trait]
    impl GenerativeProvider for FailingProvider {
        async fn generate(
            &self,
            _req: GenerateRequest,
        ) -> Result<crate::provider::GenerateResponse, crate::provider::ProviderError> {
            Err(crate::provider::ProviderError::Timeout(
                Duration::from_secs(120),
                None,
            ))
        }
    }

    struct ScriptedProvider(String);

    #[async_trait::async_trait]
    impl GenerativeProvider for ScriptedProvider {
        async fn generate(
            &self,
            _req: GenerateRequest,
        ) -> Result<crate::provider::GenerateResponse, crate::provider::ProviderError> {
            Ok(crate::provider::GenerateResponse::text_only(self.0.clone()))
        }
    }

    fn episode(bullets: Option<Vec<&str>>, content: Option<&str>, urls: &[&str]) -> EpisodeRecord {
        EpisodeRecord {
            content: content.map(String::from),
            bullet_points: bullets.map(|b| b.into_iter().map(String::from).collect()),
            sources: urls
                .iter()
                .map(|u| SourceRef {
                    url: u.to_string(),
                    title: None,
                })
                .collect(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_zero_episodes_is_first_episode_summary() {
        let analyzer = HistoryAnalyzer::new(Arc::new(FailingProvider), 15);
        let summary = analyzer.analyze(&[]).await;
        assert_eq!(summary.episode_count, 0);
        assert!(summary.recent_topics.is_empty());
        assert!(summary.covered_sources.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_structural_metadata() {
        let analyzer = HistoryAnalyzer::new(Arc::new(FailingProvider), 15);
        let episodes = vec![
            episode(None, Some("transcript one"), &["https://a.example"]),
            episode(Some(vec!["point"]), None, &["https://b.example", "https://a.example"]),
        ];
        let summary = analyzer.analyze(&episodes).await;
        assert_eq!(summary.episode_count, 2);
        assert!(summary.recent_topics.is_empty());
        assert_eq!(summary.covered_sources.len(), 2);
        assert!(summary.covered_sources.contains("https://a.example"));
    }

    #[tokio::test]
    async fn test_parsed_topics_capped_at_ten() {
        let topics: Vec<String> = (0..14)
            .map(|i| format!("{{\"topic\": \"t{i}\", \"frequency\": 1}}"))
            .collect();
        let raw = format!("{{\"topics\": [{}], \"themes\": [\"x\"]}}", topics.join(","));
        let analyzer = HistoryAnalyzer::new(Arc::new(ScriptedProvider(raw)), 15);
        let summary = analyzer.analyze(&[episode(None, Some("t"), &[])]).await;
        assert_eq!(summary.recent_topics.len(), 10);
        assert_eq!(summary.recurrent_themes, vec!["x"]);
    }

    #[tokio::test]
    async fn test_window_limits_episode_count() {
        let analyzer = HistoryAnalyzer::new(Arc::new(FailingProvider), 2);
        let episodes = vec![
            episode(None, Some("a"), &[]),
            episode(None, Some("b"), &[]),
            episode(None, Some("c"), &["https://outside.example"]),
        ];
        let summary = analyzer.analyze(&episodes).await;
        assert_eq!(summary.episode_count, 2);
        // The third episode is outside the window; its source is not unioned.
        assert!(summary.covered_sources.is_empty());
    }

    #[test]
    fn test_digest_prefers_bullets() {
        let e = episode(Some(vec!["first", "second"]), Some("long transcript"), &[]);
        let digest = episode_digest(&e);
        assert!(digest.contains("- first"));
        assert!(!digest.contains("long transcript"));
    }

    #[test]
    fn test_digest_truncates_transcript() {
        let long = "x".repeat(5000);
        let e = episode(None, Some(&long), &[]);
        assert_eq!(episode_digest(&e).chars().count(), TRANSCRIPT_PREFIX_CHARS);
    }
}
