use std::sync::Arc;

use super::normalize::{fold, normalize};
use super::policy::KeywordPolicy;
use super::types::Fragment;

/// Characters that end a sentence in dictated text.
const SENTENCE_TERMINATORS: &[char] = &['.', ';', '?', '!', '\n'];

/// Splits a transcript into fragments.
pub trait Chunker {
    fn chunk(&self, transcript: &str) -> Vec<Fragment>;
}

/// Sentence + conjunction chunker for dictated test orders.
///
/// "Check CBC and RBS" becomes `["check cbc", "check rbs"]`: a subpart without
/// its own action keyword inherits the one from the nearest preceding subpart
/// of the same sentence.
pub struct TranscriptChunker {
    policy: Arc<KeywordPolicy>,
}

impl TranscriptChunker {
    pub fn new(policy: Arc<KeywordPolicy>) -> Self {
        Self { policy }
    }
}

impl Default for TranscriptChunker {
    fn default() -> Self {
        Self::new(Arc::new(KeywordPolicy::default()))
    }
}

impl Chunker for TranscriptChunker {
    fn chunk(&self, transcript: &str) -> Vec<Fragment> {
        let mut fragments = Vec::new();

        for sentence in fold(transcript).split(SENTENCE_TERMINATORS) {
            let sentence = normalize(sentence);
            if sentence.is_empty() {
                continue;
            }

            let mut carried: Option<String> = None;

            for part in self.policy.split_subparts(&sentence) {
                let part = clean_subpart(part);
                if !part.chars().any(|c| c.is_ascii_alphanumeric()) {
                    continue;
                }

                let mut fragment = Fragment::new(fragments.len(), part);
                match self.policy.action_keyword(part) {
                    Some(own) => {
                        fragment.action = Some(own.to_string());
                        carried = Some(own.to_string());
                    }
                    None => {
                        if let Some(verb) = &carried {
                            fragment.text = format!("{verb} {part}");
                            fragment.action = Some(verb.clone());
                            fragment.inherited_action = true;
                        }
                    }
                }
                fragments.push(fragment);
            }
        }

        fragments
    }
}

fn clean_subpart(part: &str) -> &str {
    part.trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ':' | '-' | '"' | '\''))
}
