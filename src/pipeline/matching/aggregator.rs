//! Session state machine folding chunk outcomes into detected/removed tests.
//!
//! Per test name: `unseen -> detected -> removed -> detected ...`. Outcomes
//! must be applied in fragment order; the state is owned by one request.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::types::{ChunkOutcome, DetectedTest, MatchMethod};

/// Best-known evidence for a detected test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEntry {
    pub test_id: String,
    pub score: f32,
    pub method: MatchMethod,
}

/// State change produced by one outcome, used for the debug trace.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Detected { name: String, score: f32 },
    Upgraded { name: String, from: f32, to: f32 },
    /// Repeat mention that did not improve the score.
    Ignored { name: String, score: f32 },
    Removed { name: String },
    /// Removal target that was never detected.
    RemovalIgnored { name: String },
    Redetected { name: String, score: f32 },
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    detected: BTreeMap<String, DetectedEntry>,
    removed: BTreeSet<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one outcome. Removals are processed before detections.
    pub fn apply(&mut self, outcome: &ChunkOutcome) -> Vec<Transition> {
        let mut transitions = Vec::new();

        for name in &outcome.removals {
            transitions.push(self.remove(name));
        }

        if outcome.method != MatchMethod::Skipped {
            for candidate in &outcome.matches {
                let entry = DetectedEntry {
                    test_id: candidate.test_id.clone(),
                    score: candidate.score,
                    method: outcome.method,
                };
                transitions.push(self.detect(&candidate.test_name, entry));
            }
        }

        transitions
    }

    fn detect(&mut self, name: &str, entry: DetectedEntry) -> Transition {
        let score = entry.score;

        if let Some(existing) = self.detected.get_mut(name) {
            if score > existing.score {
                let from = existing.score;
                *existing = entry;
                return Transition::Upgraded {
                    name: name.to_string(),
                    from,
                    to: score,
                };
            }
            return Transition::Ignored {
                name: name.to_string(),
                score,
            };
        }

        let redetected = self.removed.remove(name);
        self.detected.insert(name.to_string(), entry);
        if redetected {
            Transition::Redetected {
                name: name.to_string(),
                score,
            }
        } else {
            Transition::Detected {
                name: name.to_string(),
                score,
            }
        }
    }

    fn remove(&mut self, name: &str) -> Transition {
        if self.detected.remove(name).is_some() {
            self.removed.insert(name.to_string());
            Transition::Removed {
                name: name.to_string(),
            }
        } else {
            Transition::RemovalIgnored {
                name: name.to_string(),
            }
        }
    }

    pub fn is_detected(&self, name: &str) -> bool {
        self.detected.contains_key(name)
    }

    pub fn entry(&self, name: &str) -> Option<&DetectedEntry> {
        self.detected.get(name)
    }

    /// Detected tests ordered by name.
    pub fn detected_tests(&self) -> Vec<DetectedTest> {
        self.detected
            .iter()
            .map(|(name, entry)| DetectedTest {
                name: name.clone(),
                test_id: entry.test_id.clone(),
                method: entry.method,
                score: entry.score,
            })
            .collect()
    }

    pub fn removed_tests(&self) -> Vec<String> {
        self.removed.iter().cloned().collect()
    }
}
