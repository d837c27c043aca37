//! Word-count policy: named constants and deterministic allocation math.
//!
//! Everything here is a pure function of the target length, so topic counts
//! and section budgets can be tested without any provider in the loop. The
//! historical heuristics (125 words per spoken minute, one topic per 300
//! words) are configuration fields, not inlined magic numbers.

use serde::{Deserialize, Serialize};

// =============================================================================
// Config
// =============================================================================

/// Word-count policy knobs.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    /// Spoken-delivery pace used to convert minutes to words.
    pub words_per_minute: usize,
    /// One research topic is selected per this many target words.
    pub words_per_topic: usize,
    /// Hard ceiling on topics per episode; fewer, deeper topics for longer
    /// episodes is intentional.
    pub max_topics_per_episode: usize,
    /// Fraction of the target spent on the introduction (10-15% band).
    pub intro_fraction: f64,
    /// Fraction of the target spent on the conclusion (10-15% band).
    pub conclusion_fraction: f64,
    /// Relative tolerance on the section sum before rescaling kicks in.
    pub tolerance: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            words_per_minute: 125,
            words_per_topic: 300,
            max_topics_per_episode: 3,
            intro_fraction: 0.12,
            conclusion_fraction: 0.12,
            tolerance: 0.05,
        }
    }
}

// =============================================================================
// Length classes
// =============================================================================

/// Content-length class with fixed word targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthClass {
    Short,
    Medium,
    Long,
}

impl LengthClass {
    /// Target word count for this class.
    pub fn target_words(self) -> usize {
        match self {
            LengthClass::Short => 800,
            LengthClass::Medium => 1500,
            LengthClass::Long => 2500,
        }
    }

    /// Planned body section count for this class.
    pub fn body_section_count(self) -> usize {
        match self {
            LengthClass::Short => 3,
            LengthClass::Medium => 4,
            LengthClass::Long => 5,
        }
    }

    /// Classify an explicit word count into the band anchored at each
    /// class target.
    pub fn for_words(words: usize) -> Self {
        if words <= 800 {
            LengthClass::Short
        } else if words <= 1500 {
            LengthClass::Medium
        } else {
            LengthClass::Long
        }
    }
}

/// Requested episode length: a class or an explicit word count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeLength {
    Class(LengthClass),
    Words(usize),
}

impl EpisodeLength {
    pub fn target_words(self) -> usize {
        match self {
            EpisodeLength::Class(c) => c.target_words(),
            EpisodeLength::Words(w) => w,
        }
    }

    pub fn class(self) -> LengthClass {
        match self {
            EpisodeLength::Class(c) => c,
            EpisodeLength::Words(w) => LengthClass::for_words(w),
        }
    }
}

impl From<LengthClass> for EpisodeLength {
    fn from(c: LengthClass) -> Self {
        EpisodeLength::Class(c)
    }
}

// =============================================================================
// Topic capacity
// =============================================================================

/// How many deep-research topics an episode of `target_words` supports:
/// `clamp(1, max, target / words_per_topic)`. Monotone in the target.
pub fn topic_capacity(target_words: usize, config: &BudgetConfig) -> usize {
    (target_words / config.words_per_topic).clamp(1, config.max_topics_per_episode)
}

// =============================================================================
// Topic depth weights
// =============================================================================

/// Depth treatment for a topic, weighting its share of the body budget
/// relative to an equal split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicDepth {
    Deep,
    Medium,
    Overview,
}

impl TopicDepth {
    pub fn weight(self) -> f64 {
        match self {
            TopicDepth::Deep => 1.5,
            TopicDepth::Medium => 1.0,
            TopicDepth::Overview => 0.7,
        }
    }

    /// Map an overall depth score (1-10) to a depth treatment.
    pub fn from_depth_score(score: u8) -> Self {
        match score {
            8..=10 => TopicDepth::Deep,
            1..=4 => TopicDepth::Overview,
            _ => TopicDepth::Medium,
        }
    }
}

// =============================================================================
// Allocation
// =============================================================================

/// Per-section word budgets summing exactly to the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionAllocation {
    pub introduction: usize,
    pub body: Vec<usize>,
    pub conclusion: usize,
}

impl SectionAllocation {
    pub fn total(&self) -> usize {
        self.introduction + self.body.iter().sum::<usize>() + self.conclusion
    }
}

/// Allocate a word target across intro, weighted body sections, and
/// conclusion. Any rounding remainder lands on the first body section so
/// the totals always sum exactly to `target_words`.
pub fn allocate(
    target_words: usize,
    body_weights: &[f64],
    config: &BudgetConfig,
) -> SectionAllocation {
    debug_assert!(!body_weights.is_empty());

    let introduction = (target_words as f64 * config.intro_fraction).round() as usize;
    let conclusion = (target_words as f64 * config.conclusion_fraction).round() as usize;
    let body_total = target_words.saturating_sub(introduction + conclusion);

    let weight_sum: f64 = body_weights.iter().sum();
    let mut body: Vec<usize> = body_weights
        .iter()
        .map(|w| (body_total as f64 * w / weight_sum).floor() as usize)
        .collect();

    let allocated: usize = body.iter().sum();
    if let Some(first) = body.first_mut() {
        *first += body_total - allocated;
    }

    SectionAllocation {
        introduction,
        body,
        conclusion,
    }
}

/// Whether a section sum is within the configured tolerance of the target.
pub fn within_tolerance(sum: usize, target_words: usize, config: &BudgetConfig) -> bool {
    let drift = sum.abs_diff(target_words) as f64;
    drift <= target_words as f64 * config.tolerance
}

/// Proportionally rescale section counts to sum exactly to the target,
/// pushing the rounding remainder onto `remainder_index`.
pub fn proportional_rescale(values: &[usize], target_words: usize, remainder_index: usize) -> Vec<usize> {
    let sum: usize = values.iter().sum();
    if sum == 0 {
        let mut out = vec![0; values.len()];
        if let Some(v) = out.get_mut(remainder_index) {
            *v = target_words;
        }
        return out;
    }

    let factor = target_words as f64 / sum as f64;
    let mut out: Vec<usize> = values
        .iter()
        .map(|&v| (v as f64 * factor).floor() as usize)
        .collect();

    let allocated: usize = out.iter().sum();
    if let Some(v) = out.get_mut(remainder_index) {
        *v += target_words - allocated;
    }
    out
}
