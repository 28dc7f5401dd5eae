//! Text canonicalization shared by every matching stage.
//!
//! Accents are folded (NFKD, then non-ASCII dropped), case is folded and
//! whitespace runs collapse to a single space. `normalize` is idempotent.

use unicode_normalization::UnicodeNormalization;

/// Fold diacritics and case without touching whitespace or punctuation.
pub fn fold(text: &str) -> String {
    text.nfkd()
        .filter(|c| c.is_ascii())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Canonical form used for keyword checks, synonym lookup and encoding.
pub fn normalize(text: &str) -> String {
    fold(text).split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word-boundary containment on already-normalized text.
///
/// `contains_term("do ct head", "ct")` is true, `contains_term("doctor", "ct")`
/// is not. An empty term never matches.
pub fn contains_term(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }

    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(term) {
        let start = from + pos;
        let end = start + term.len();
        let left_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let right_ok = end == bytes.len() || !is_word_byte(bytes[end]);
        if left_ok && right_ok {
            return true;
        }
        from = start + 1;
        while from < haystack.len() && !haystack.is_char_boundary(from) {
            from += 1;
        }
    }
    false
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
