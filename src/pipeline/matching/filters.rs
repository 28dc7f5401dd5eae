//! Linguistic gates applied to each fragment before any similarity search.
//!
//! Order of application: negation, symptom, intent. A fragment rejected by one
//! gate never reaches the embedding matcher or the arbiter, except that a
//! negated fragment is still resolved to produce removals.

use super::lexicon::TestLexicon;
use super::policy::KeywordPolicy;
use super::types::Fragment;

/// Any negation word present.
pub fn is_negated(policy: &KeywordPolicy, fragment: &Fragment) -> bool {
    policy.negation.is_match(&fragment.text)
}

/// Symptom vocabulary without an accompanying order verb.
pub fn is_symptom_description(policy: &KeywordPolicy, fragment: &Fragment) -> bool {
    policy.symptom.is_match(&fragment.text) && !policy.order.is_match(&fragment.text)
}

/// An order verb together with either a reference word ("this test", "that")
/// or a literal mention of a known test.
pub fn has_order_intent(policy: &KeywordPolicy, fragment: &Fragment, lexicon: &TestLexicon) -> bool {
    if !policy.order.is_match(&fragment.text) {
        return false;
    }
    policy.reference.is_match(&fragment.text) || lexicon.mentions_any(&fragment.text)
}
