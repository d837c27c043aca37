//! Store-boundary types.
//!
//! The pipeline consumes the episode store but does not own it: it reads a
//! podcast record and an ordered recent-episode list, and hands back only
//! the generated script and its source list. Persistence, IDs and audio
//! attachment are external responsibilities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::planner::AdherenceMetrics;

/// Podcast record as read from the episode store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Podcast {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// The podcast's standing editorial prompt (theme, audience, tone).
    #[serde(default)]
    pub prompt: String,
    /// Preferred source URLs configured for the podcast, if any.
    #[serde(default)]
    pub sources: Vec<SourceRef>,
}

impl Podcast {
    /// The podcast's theme line for query templates: the standing prompt
    /// when present, the title otherwise.
    pub fn theme(&self) -> &str {
        if self.prompt.trim().is_empty() {
            &self.title
        } else {
            &self.prompt
        }
    }
}

/// A source reference attached to a podcast or episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// One prior episode, ordered most-recent-first in the store's listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// Full transcript, when stored.
    #[serde(default)]
    pub content: Option<String>,
    /// Compact bullet-point representation, preferred over the transcript
    /// for token economy.
    #[serde(default)]
    pub bullet_points: Option<Vec<String>>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    pub created_at: DateTime<Utc>,
}

/// The pipeline's output: everything the external store needs to persist a
/// new episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeScript {
    pub content: String,
    /// De-duplicated source URLs gathered across research and generation.
    pub sources: Vec<String>,
    pub adherence_metrics: AdherenceMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_theme_prefers_prompt() {
        let podcast = Podcast {
            title: "The Daily Grid".into(),
            description: String::new(),
            prompt: "Energy policy and grid infrastructure news".into(),
            sources: Vec::new(),
        };
        assert_eq!(podcast.theme(), "Energy policy and grid infrastructure news");
    }

    #[test]
    fn test_theme_falls_back_to_title() {
        let podcast = Podcast {
            title: "The Daily Grid".into(),
            description: String::new(),
            prompt: "   ".into(),
            sources: Vec::new(),
        };
        assert_eq!(podcast.theme(), "The Daily Grid");
    }

    #[test]
    fn test_episode_record_deserializes_with_missing_fields() {
        let json = r#"{"created_at": "2026-07-01T12:00:00Z"}"#;
        let record: EpisodeRecord = serde_json::from_str(json).unwrap();
        assert!(record.content.is_none());
        assert!(record.bullet_points.is_none());
        assert!(record.sources.is_empty());
    }
}
