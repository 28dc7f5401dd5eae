//! Prompt construction and reply parsing for the fallback arbiter.

use std::sync::LazyLock;

use regex::Regex;

use super::arbiter::{ArbiterError, ArbiterRequest, ArbiterVerdict};

pub const ARBITER_SYSTEM_PROMPT: &str = "You map a doctor's dictated order to one test from a \
short candidate list. You never invent tests that are not in the list. Output valid JSON only.";

/// Sentinel the model uses for "none of these".
pub const NONE_SELECTION: &str = "none";

/// Build the user prompt listing the fragment and its candidates.
pub fn build_arbiter_prompt(request: &ArbiterRequest) -> String {
    let candidates = request
        .candidates
        .iter()
        .map(|c| format!("- id: {} | name: {} | category: {}", c.test_id, c.name, c.category))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Doctor said: \"{fragment}\"\n\n\
         Candidate tests:\n{candidates}\n\n\
         Rules:\n\
         - Pick the SINGLE most appropriate test from the candidates.\n\
         - Prefer the broader panel/profile if both a panel and one of its components are candidates.\n\
         - Do NOT pick a test the doctor explicitly negated (e.g. \"don't do CBC\").\n\
         - If no candidate fits, answer \"{none}\".\n\n\
         Return JSON only, in this format:\n\
         {{ \"test_id\": \"<candidate id>\" }}\n\
         If nothing fits, return:\n\
         {{ \"test_id\": \"{none}\" }}",
        fragment = request.fragment.replace('"', "'"),
        none = NONE_SELECTION,
    )
}

/// Parse a model reply into a verdict.
///
/// Accepts `{"test_id": "..."}` and the older `{"matches": ["..."]}` shape,
/// where `"Other"` or an empty list means no match. Anything else is malformed.
pub fn parse_verdict(raw: &str) -> Result<ArbiterVerdict, ArbiterError> {
    let cleaned = strip_model_artifacts(raw);
    let json = extract_json_object(&cleaned)
        .ok_or_else(|| ArbiterError::MalformedResponse("No JSON object in reply".into()))?;

    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| ArbiterError::MalformedResponse(e.to_string()))?;

    if let Some(selection) = value.get("test_id") {
        return match selection {
            serde_json::Value::Null => Ok(ArbiterVerdict::NoneOfThese),
            serde_json::Value::String(s) => Ok(verdict_from(s)),
            other => Err(ArbiterError::MalformedResponse(format!(
                "test_id is not a string: {other}"
            ))),
        };
    }

    if let Some(matches) = value.get("matches").and_then(|m| m.as_array()) {
        return Ok(match matches.first().and_then(|m| m.as_str()) {
            Some(first) if !first.eq_ignore_ascii_case("other") => verdict_from(first),
            _ => ArbiterVerdict::NoneOfThese,
        });
    }

    Err(ArbiterError::MalformedResponse(
        "Reply has neither test_id nor matches".into(),
    ))
}

fn verdict_from(selection: &str) -> ArbiterVerdict {
    let selection = selection.trim();
    if selection.is_empty() || selection.eq_ignore_ascii_case(NONE_SELECTION) {
        ArbiterVerdict::NoneOfThese
    } else {
        ArbiterVerdict::Selected(selection.to_string())
    }
}

/// Drop thinking blocks, stray special tokens and code fences.
fn strip_model_artifacts(raw: &str) -> String {
    static THINK_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));
    static UNUSED_TOKEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<unused\d+>(?:thought\n)?").expect("valid regex"));

    let text = THINK_BLOCK_RE.replace_all(raw, "");
    let text = UNUSED_TOKEN_RE.replace_all(&text, "");
    text.replace("```json", "").replace("```", "").trim().to_string()
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
