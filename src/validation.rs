//! Differentiation validation: score the draft against recent coverage and
//! drive the single rewrite pass.
//!
//! The validator fails open: provider or parse failures yield a passing
//! result with a conservative default similarity, so validator
//! infrastructure problems never block episode creation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::history::HistorySummary;
use crate::parse::parse_structured;
use crate::prompts;
use crate::provider::{Attribution, GenerateRequest, GenerativeProvider};

/// Similarity reported when the assessment itself degrades; comfortably
/// below any sane passing threshold.
const FAIL_OPEN_SIMILARITY: u8 = 30;

/// Outcome of the differentiation check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// 0 = entirely new ground, 100 = rehash of prior episodes.
    pub similarity_score: u8,
    pub unique_elements: Vec<String>,
    pub redundant_elements: Vec<String>,
    pub is_passing: bool,
    pub improvement_suggestions: Vec<String>,
    /// Present only when a failing draft was rewritten.
    pub improved_content: Option<String>,
}

impl ValidationResult {
    /// The automatic pass: no history means any draft is unique.
    pub fn auto_pass() -> Self {
        Self {
            similarity_score: 0,
            unique_elements: Vec::new(),
            redundant_elements: Vec::new(),
            is_passing: true,
            improvement_suggestions: Vec::new(),
            improved_content: None,
        }
    }

    /// The fail-open result used on provider or parse failure.
    pub fn fail_open() -> Self {
        Self {
            similarity_score: FAIL_OPEN_SIMILARITY,
            ..Self::auto_pass()
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawValidation {
    #[serde(default)]
    similarity_score: Option<f64>,
    #[serde(default)]
    unique_elements: Vec<String>,
    #[serde(default)]
    redundant_elements: Vec<String>,
    #[serde(default)]
    is_passing: Option<bool>,
    #[serde(default)]
    improvement_suggestions: Vec<String>,
}

/// Scores drafts against the history summary.
pub struct DifferentiationValidator {
    generative: Arc<dyn GenerativeProvider>,
    /// Similarity at or above this fails the draft.
    similarity_threshold: u8,
}

impl DifferentiationValidator {
    pub fn new(generative: Arc<dyn GenerativeProvider>, similarity_threshold: u8) -> Self {
        Self {
            generative,
            similarity_threshold,
        }
    }

    /// Assess a draft. Total: auto-pass with zero similarity when there is
    /// no history, fail-open on any provider or parse failure.
    pub async fn validate(&self, draft: &str, history: &HistorySummary) -> ValidationResult {
        if history.episode_count == 0 {
            info!("no prior episodes, differentiation auto-pass");
            return ValidationResult::auto_pass();
        }

        let req = GenerateRequest::new(
            prompts::validation_user_prompt(draft, history),
            Attribution::new("validation::similarity"),
        )
        .system(prompts::VALIDATION_SYSTEM_PROMPT)
        .temperature(0.1)
        .max_tokens(2048)
        .json();

        let resp = match self.generative.generate(req).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "validation call failed, failing open");
                return ValidationResult::fail_open();
            }
        };

        let raw: RawValidation = match parse_structured(&resp.text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "validation parse failed, failing open");
                return ValidationResult::fail_open();
            }
        };

        let similarity_score =
            (raw.similarity_score.unwrap_or(0.0).round() as i64).clamp(0, 100) as u8;

        // The model's verdict is advisory; the threshold is the contract.
        let is_passing = raw.is_passing.unwrap_or(true)
            && similarity_score < self.similarity_threshold;

        info!(
            similarity_score,
            is_passing,
            redundant = raw.redundant_elements.len(),
            "differentiation assessed"
        );

        ValidationResult {
            similarity_score,
            unique_elements: raw.unique_elements,
            redundant_elements: raw.redundant_elements,
            is_passing,
            improvement_suggestions: raw.improvement_suggestions,
            improved_content: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    struct FailingProvider;

    #[async_trait::async_trait]
    impl GenerativeProvider for FailingProvider {
        async fn generate(
            &self,
            _req: GenerateRequest,
        ) -> Result<crate::provider::GenerateResponse, crate::provider::ProviderError> {
            Err(crate::provider::ProviderError::provider("generative", "down"))
        }
    }

    fn history_with(count: usize) -> HistorySummary {
        HistorySummary {
            episode_count: count,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_zero_history_always_passes() {
        let v = DifferentiationValidator::new(
            Arc::new(ScriptedProvider(r#"{"similarity_score": 95, "is_passing": false}"#.into())),
            50,
        );
        let result = v.validate("any draft at all", &history_with(0)).await;
        assert!(result.is_passing);
        assert_eq!(result.similarity_score, 0);
    }

    #[tokio::test]
    async fn test_provider_error_fails_open() {
        let v = DifferentiationValidator::new(Arc::new(FailingProvider), 50);
        let result = v.validate("draft", &history_with(4)).await;
        assert!(result.is_passing);
        assert_eq!(result.similarity_score, FAIL_OPEN_SIMILARITY);
    }

    #[tokio::test]
    async fn test_malformed_response_fails_open() {
        let v = DifferentiationValidator::new(
            Arc::new(ScriptedProvider("the model rambled instead of JSON".into())),
            50,
        );
        let result = v.validate("draft", &history_with(4)).await;
        assert!(result.is_passing);
    }

    #[tokio::test]
    async fn test_high_similarity_fails_even_if_model_passes() {
        let v = DifferentiationValidator::new(
            Arc::new(ScriptedProvider(
                r#"{"similarity_score": 72, "is_passing": true, "redundant_elements": ["same framing"]}"#.into(),
            )),
            50,
        );
        let result = v.validate("draft", &history_with(4)).await;
        assert!(!result.is_passing);
        assert_eq!(result.similarity_score, 72);
        assert_eq!(result.redundant_elements, vec!["same framing"]);
    }

    #[tokio::test]
    async fn test_model_fail_verdict_respected_below_threshold() {
        let v = DifferentiationValidator::new(
            Arc::new(ScriptedProvider(
                r#"{"similarity_score": 40, "is_passing": false}"#.into(),
            )),
            50,
        );
        let result = v.validate("draft", &history_with(4)).await;
        assert!(!result.is_passing);
    }

    #[tokio::test]
    async fn test_similarity_clamped_to_range() {
        let v = DifferentiationValidator::new(
            Arc::new(ScriptedProvider(r#"{"similarity_score": 240}"#.into())),
            50,
        );
        let result = v.validate("draft", &history_with(2)).await;
        assert_eq!(result.similarity_score, 100);
        assert!(!result.is_passing);
    }
}
