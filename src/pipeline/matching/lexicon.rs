//! Literal name/synonym index over one catalog snapshot.

use super::normalize::{contains_term, normalize};
use super::types::MatchCandidate;
use crate::models::MedicalTest;

struct LexiconEntry {
    test_id: String,
    test_name: String,
    category: String,
    has_embeddings: bool,
    /// Normalized name and synonyms, longest first.
    terms: Vec<String>,
}

/// Word-boundary lookup of test names and synonyms inside fragment text.
pub struct TestLexicon {
    entries: Vec<LexiconEntry>,
}

impl TestLexicon {
    pub fn from_tests(tests: &[MedicalTest]) -> Self {
        let entries = tests
            .iter()
            .map(|test| {
                let mut terms: Vec<String> = std::iter::once(&test.name)
                    .chain(test.synonyms.iter())
                    .map(|t| normalize(t))
                    .filter(|t| !t.is_empty())
                    .collect();
                terms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
                terms.dedup();
                LexiconEntry {
                    test_id: test.id.clone(),
                    test_name: test.name.clone(),
                    category: test.category.clone(),
                    has_embeddings: test.has_embeddings(),
                    terms,
                }
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when any test name or synonym occurs in the text.
    pub fn mentions_any(&self, normalized: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.terms.iter().any(|t| contains_term(normalized, t)))
    }

    /// Every test literally mentioned, in catalog order. Each hit records the
    /// longest matching term; the score is 0.0 since no similarity was computed.
    pub fn mentions(&self, normalized: &str) -> Vec<MatchCandidate> {
        self.hits(normalized, |_| true)
    }

    /// Mentioned tests that have no embeddings and so never surface from
    /// vector search.
    pub fn mentions_without_embeddings(&self, normalized: &str) -> Vec<MatchCandidate> {
        self.hits(normalized, |e| !e.has_embeddings)
    }

    fn hits(&self, normalized: &str, keep: impl Fn(&LexiconEntry) -> bool) -> Vec<MatchCandidate> {
        self.entries
            .iter()
            .filter(|e| keep(e))
            .filter_map(|e| {
                e.terms
                    .iter()
                    .find(|t| contains_term(normalized, t))
                    .map(|term| MatchCandidate {
                        test_id: e.test_id.clone(),
                        test_name: e.test_name.clone(),
                        category: e.category.clone(),
                        score: 0.0,
                        matched_synonym: term.clone(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<MedicalTest> {
        vec![
            MedicalTest::new("cbc", "CBC", "Hematology", &["complete blood count", "hemogram"]),
            MedicalTest::new("ct-head", "CT Head", "CT-Scan", &["ct brain", "head ct"])
                .with_embeddings(vec![vec![1.0], vec![1.0]]),
            MedicalTest::new("esr", "ESR", "Hematology", &["sed rate"]),
        ]
    }

    #[test]
    fn finds_name_and_synonym_mentions() {
        let lexicon = TestLexicon::from_tests(&catalog());
        let hits = lexicon.mentions("check cbc and sed rate");
        let ids: Vec<_> = hits.iter().map(|h| h.test_id.as_str()).collect();
        assert_eq!(ids, ["cbc", "esr"]);
        assert_eq!(hits[1].matched_synonym, "sed rate");
    }

    #[test]
    fn ignores_terms_inside_other_words() {
        let lexicon = TestLexicon::from_tests(&catalog());
        assert!(!lexicon.mentions_any("ask the doctor about esrd"));
    }

    #[test]
    fn prefers_longest_term() {
        let lexicon = TestLexicon::from_tests(&catalog());
        let hits = lexicon.mentions("order ct head today");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].matched_synonym, "ct head");
    }

    #[test]
    fn filters_to_tests_without_embeddings() {
        let lexicon = TestLexicon::from_tests(&catalog());
        let hits = lexicon.mentions_without_embeddings("do head ct and cbc");
        let ids: Vec<_> = hits.iter().map(|h| h.test_id.as_str()).collect();
        assert_eq!(ids, ["cbc"]);
    }

    #[test]
    fn empty_catalog_mentions_nothing() {
        let lexicon = TestLexicon::from_tests(&[]);
        assert!(lexicon.is_empty());
        assert!(lexicon.mentions("check cbc").is_empty());
    }
}
