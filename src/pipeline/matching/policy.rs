//! Keyword policy for the linguistic filters and the chunker.
//!
//! Every list is a `KeywordSet` compiled to a single word-boundary regex over
//! normalized text. Callers can start from `KeywordPolicy::default()` and swap
//! or extend individual sets without touching the pipeline.

use regex::Regex;

use super::normalize::normalize;

/// Words that cancel or exclude a test.
pub const NEGATION_WORDS: &[&str] = &[
    "don't",
    "dont",
    "do not",
    "no",
    "not",
    "no need",
    "not required",
    "not needed",
    "avoid",
    "skip",
    "no longer",
    "stop",
    "already have",
    "already done",
    "cancel",
    "remove",
    "drop",
    "exclude",
];

/// Imperative verbs that signal a test order.
pub const ORDER_KEYWORDS: &[&str] = &[
    "check",
    "test",
    "do",
    "order",
    "get",
    "send",
    "investigate",
    "take",
    "include",
    "add",
];

/// Observations that describe the patient rather than request a test.
pub const SYMPTOM_KEYWORDS: &[&str] = &[
    "pain",
    "pressure",
    "heaviness",
    "fatigue",
    "breathlessness",
    "dizziness",
    "weakness",
    "palpitation",
    "palpitations",
    "swelling",
    "fever",
    "chills",
    "cough",
    "nausea",
    "vomiting",
    "headache",
];

/// Determiners that point back at a test already under discussion.
pub const REFERENCE_WORDS: &[&str] = &[
    "this test",
    "that test",
    "these tests",
    "those tests",
    "the same",
    "this",
    "that",
    "it",
];

/// Coordinators that separate list items inside one sentence.
pub const CONJUNCTIONS: &[&str] = &["and", "plus", "along with", "with", "as well as", "also"];

/// A compiled list of phrases matched on word boundaries.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    words: Vec<String>,
    pattern: Option<Regex>,
}

impl KeywordSet {
    pub fn new<S: AsRef<str>>(words: &[S]) -> Result<Self, regex::Error> {
        let mut normalized: Vec<String> = words
            .iter()
            .map(|w| normalize(w.as_ref()))
            .filter(|w| !w.is_empty())
            .collect();
        normalized.sort();
        normalized.dedup();
        let pattern = compile(&normalized)?;
        Ok(Self {
            words: normalized,
            pattern,
        })
    }

    /// A new set holding these words plus `extra`.
    pub fn extended<S: AsRef<str>>(&self, extra: &[S]) -> Result<Self, regex::Error> {
        let mut all: Vec<String> = self.words.clone();
        all.extend(extra.iter().map(|w| w.as_ref().to_string()));
        Self::new(&all)
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn is_match(&self, normalized: &str) -> bool {
        self.pattern
            .as_ref()
            .is_some_and(|re| re.is_match(normalized))
    }

    /// Leftmost (longest at that position) keyword in the text.
    pub fn first_match<'t>(&self, normalized: &'t str) -> Option<&'t str> {
        self.pattern
            .as_ref()
            .and_then(|re| re.find(normalized))
            .map(|m| m.as_str())
    }

    /// The text with every keyword occurrence removed and spacing re-collapsed.
    pub fn strip(&self, normalized: &str) -> String {
        let kept = match &self.pattern {
            Some(re) => re.replace_all(normalized, " "),
            None => normalized.into(),
        };
        kept.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

fn compile(words: &[String]) -> Result<Option<Regex>, regex::Error> {
    if words.is_empty() {
        return Ok(None);
    }
    // Longest first so "no need" wins over "no" at the same position.
    let mut ordered: Vec<&String> = words.iter().collect();
    ordered.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let alternation = ordered
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{alternation})\b")).map(Some)
}

/// The full set of keyword lists the pipeline consults.
#[derive(Debug, Clone)]
pub struct KeywordPolicy {
    pub order: KeywordSet,
    pub negation: KeywordSet,
    pub symptom: KeywordSet,
    pub reference: KeywordSet,
    conjunctions: KeywordSet,
    splitter: Regex,
}

impl KeywordPolicy {
    pub fn new(
        order: KeywordSet,
        negation: KeywordSet,
        symptom: KeywordSet,
        reference: KeywordSet,
        conjunctions: KeywordSet,
    ) -> Result<Self, regex::Error> {
        let splitter = build_splitter(&conjunctions)?;
        Ok(Self {
            order,
            negation,
            symptom,
            reference,
            conjunctions,
            splitter,
        })
    }

    pub fn with_conjunctions(mut self, conjunctions: KeywordSet) -> Result<Self, regex::Error> {
        self.splitter = build_splitter(&conjunctions)?;
        self.conjunctions = conjunctions;
        Ok(self)
    }

    pub fn conjunctions(&self) -> &KeywordSet {
        &self.conjunctions
    }

    /// Split one normalized sentence on commas, `&` and conjunctions.
    pub fn split_subparts<'t>(&self, sentence: &'t str) -> Vec<&'t str> {
        self.splitter.split(sentence).collect()
    }

    /// The action keyword a subpart carries: a negation wins over an order verb.
    pub fn action_keyword<'t>(&self, normalized: &'t str) -> Option<&'t str> {
        self.negation
            .first_match(normalized)
            .or_else(|| self.order.first_match(normalized))
    }

    /// What a fragment asks for, without the verbs that ask for it. The action
    /// is kept on the fragment, so the encoder only sees the test wording.
    /// Falls back to the whole text when nothing else is left.
    pub fn strip_actions(&self, normalized: &str) -> String {
        let content = self.order.strip(&self.negation.strip(normalized));
        if content.is_empty() {
            normalized.to_string()
        } else {
            content
        }
    }
}

impl Default for KeywordPolicy {
    fn default() -> Self {
        let set = |words: &[&str]| KeywordSet::new(words).expect("Invalid built-in keyword list");
        Self::new(
            set(ORDER_KEYWORDS),
            set(NEGATION_WORDS),
            set(SYMPTOM_KEYWORDS),
            set(REFERENCE_WORDS),
            set(CONJUNCTIONS),
        )
        .expect("Invalid built-in conjunction list")
    }
}

fn build_splitter(conjunctions: &KeywordSet) -> Result<Regex, regex::Error> {
    match compile(conjunctions.words())? {
        Some(words) => Regex::new(&format!("{}|[,&]", words.as_str())),
        None => Regex::new("[,&]"),
    }
}
