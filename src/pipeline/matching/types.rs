use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One actionable span of a transcript, in normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Position in the transcript's fragment sequence.
    pub index: usize,
    /// Normalized text, including any carried-over action verb.
    pub text: String,
    /// Action verb in effect for this fragment, own or inherited.
    pub action: Option<String>,
    /// True when `action` was carried over from an earlier subpart.
    pub inherited_action: bool,
}

impl Fragment {
    pub fn new(index: usize, text: &str) -> Self {
        Self {
            index,
            text: text.to_string(),
            action: None,
            inherited_action: false,
        }
    }
}

/// A scored association between a fragment and a catalog test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub test_id: String,
    pub test_name: String,
    pub category: String,
    /// Cosine similarity of the best synonym, 0.0 for lexical-only candidates.
    pub score: f32,
    pub matched_synonym: String,
}

/// Descending score, then shorter synonym, then `test_id`.
pub fn rank_order(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    rank_score(b.score)
        .total_cmp(&rank_score(a.score))
        .then_with(|| a.matched_synonym.len().cmp(&b.matched_synonym.len()))
        .then_with(|| a.test_id.cmp(&b.test_id))
}

/// NaN sorts below every real score.
fn rank_score(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Embedding,
    Llm,
    Skipped,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::Llm => "llm",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Negation,
    Symptom,
    NoIntent,
    LlmRejected,
    /// The fragment could not be encoded and the arbiter had nothing to work with.
    EncoderFailure,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negation => "negation",
            Self::Symptom => "symptom",
            Self::NoIntent => "no_intent",
            Self::LlmRejected => "llm_rejected",
            Self::EncoderFailure => "encoder_failure",
        }
    }
}

/// How a single fragment was resolved. One per fragment, in transcript order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub index: usize,
    pub fragment_text: String,
    pub method: MatchMethod,
    /// Accepted matches, applied as detections.
    pub matches: Vec<MatchCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Test names a negated fragment refers to, applied as removals.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removals: Vec<String>,
    /// Context handed to the arbiter, when it was consulted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<MatchCandidate>,
    /// Absorbed stage error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ChunkOutcome {
    pub fn embedding(fragment: &Fragment, matches: Vec<MatchCandidate>) -> Self {
        Self::resolved(fragment, MatchMethod::Embedding, matches)
    }

    pub fn llm(fragment: &Fragment, selected: MatchCandidate, candidates: Vec<MatchCandidate>) -> Self {
        let mut outcome = Self::resolved(fragment, MatchMethod::Llm, vec![selected]);
        outcome.candidates = candidates;
        outcome
    }

    pub fn skipped(fragment: &Fragment, reason: SkipReason) -> Self {
        Self {
            index: fragment.index,
            fragment_text: fragment.text.clone(),
            method: MatchMethod::Skipped,
            matches: Vec::new(),
            skip_reason: Some(reason),
            removals: Vec::new(),
            candidates: Vec::new(),
            detail: None,
        }
    }

    pub fn negated(fragment: &Fragment, removals: Vec<String>) -> Self {
        let mut outcome = Self::skipped(fragment, SkipReason::Negation);
        outcome.removals = removals;
        outcome
    }

    pub fn with_candidates(mut self, candidates: Vec<MatchCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn resolved(fragment: &Fragment, method: MatchMethod, matches: Vec<MatchCandidate>) -> Self {
        Self {
            index: fragment.index,
            fragment_text: fragment.text.clone(),
            method,
            matches,
            skip_reason: None,
            removals: Vec::new(),
            candidates: Vec::new(),
            detail: None,
        }
    }
}

/// Final per-test entry of a match call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedTest {
    pub name: String,
    pub test_id: String,
    pub method: MatchMethod,
    pub score: f32,
}

/// Response of `match_stream` / `match_fragment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub request_id: Uuid,
    pub processed_at: DateTime<Utc>,
    pub transcript: String,
    pub threshold: f32,
    /// Ordered by test name.
    pub detected_tests: Vec<DetectedTest>,
    pub removed_tests: Vec<String>,
    pub trace: Vec<ChunkOutcome>,
}

impl MatchResult {
    pub fn detected_names(&self) -> Vec<&str> {
        self.detected_tests.iter().map(|t| t.name.as_str()).collect()
    }
}
