use std::sync::Arc;

use super::embedder::{EmbeddingEncoder, EncoderError};
use super::types::{rank_order, MatchCandidate};
use crate::models::MedicalTest;

/// Ranked candidates for one fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchReport {
    /// Top-N tests by best synonym similarity.
    pub candidates: Vec<MatchCandidate>,
    /// The subset of `candidates` at or above the threshold.
    pub accepted: Vec<MatchCandidate>,
}

impl MatchReport {
    pub fn is_conclusive(&self) -> bool {
        !self.accepted.is_empty()
    }
}

/// Cosine similarity between a fragment and every embedded synonym.
#[derive(Clone)]
pub struct EmbeddingMatcher {
    encoder: Arc<dyn EmbeddingEncoder>,
    top_n: usize,
}

impl EmbeddingMatcher {
    pub fn new(encoder: Arc<dyn EmbeddingEncoder>, top_n: usize) -> Self {
        Self {
            encoder,
            top_n: top_n.max(1),
        }
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    pub fn dimension(&self) -> usize {
        self.encoder.dimension()
    }

    pub fn model_id(&self) -> &str {
        self.encoder.model_id()
    }

    /// True when `test`'s vectors live in this encoder's space.
    pub fn can_compare(&self, test: &MedicalTest) -> bool {
        test.has_embeddings()
            && test.embedding_source() == self.model_id()
            && test.synonym_embeddings[0].len() == self.dimension()
    }

    /// Encode the normalized fragment and rank the catalog against it.
    pub fn match_fragment(
        &self,
        text: &str,
        tests: &[MedicalTest],
        threshold: f32,
    ) -> Result<MatchReport, EncoderError> {
        let query = self.encoder.encode(text)?;
        Ok(self.match_vector(&query, tests, threshold))
    }

    pub fn match_vector(&self, query: &[f32], tests: &[MedicalTest], threshold: f32) -> MatchReport {
        let candidates = self.rank(query, tests);
        let accepted = candidates
            .iter()
            .filter(|c| c.score >= threshold)
            .cloned()
            .collect();
        MatchReport {
            candidates,
            accepted,
        }
    }

    /// Best synonym per test, top-N overall. Tests without embeddings are skipped.
    pub fn rank(&self, query: &[f32], tests: &[MedicalTest]) -> Vec<MatchCandidate> {
        let mut scored: Vec<MatchCandidate> = tests
            .iter()
            .filter_map(|test| best_synonym(query, test))
            .collect();

        scored.sort_by(rank_order);
        scored.truncate(self.top_n);
        scored
    }
}

fn best_synonym(query: &[f32], test: &MedicalTest) -> Option<MatchCandidate> {
    let mut best: Option<(f32, &str)> = None;

    for (synonym, embedding) in test.embedded_synonyms() {
        let score = cosine_similarity(query, embedding);
        let better = match best {
            None => true,
            Some((top, top_syn)) => score > top || (score == top && synonym.len() < top_syn.len()),
        };
        if better {
            best = Some((score, synonym));
        }
    }

    best.map(|(score, synonym)| MatchCandidate {
        test_id: test.id.clone(),
        test_name: test.name.clone(),
        category: test.category.clone(),
        score,
        matched_synonym: synonym.to_string(),
    })
}

/// Magnitude-invariant similarity; 0.0 for empty, zero or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
