//! Prompt builders and structured-response parsers.
//!
//! Every LLM exchange in the pipeline goes through this module: builders
//! turn typed state into prompt strings, parsers turn completion text back
//! into typed decisions. Parsers are lenient on surrounding noise but
//! strict on the line format; a line that does not match is skipped, and
//! an entirely unparseable response maps to the conservative decision at
//! the call site (keep the old value, drop nothing silently).

pub mod extract;
pub mod merge;
pub mod summary;
pub mod validate;

use crate::config::Language;

/// Normalize a topic or sub_topic attribute into its stable key form:
/// trimmed, lowercased, inner whitespace collapsed to `_`.
#[must_use]
pub fn attribute_unify(attribute: &str) -> String {
    attribute
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// One fact line parsed from an extraction completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFact {
    pub topic: String,
    pub sub_topic: String,
    pub memo: String,
}

/// Parse extraction output: one fact per `- topic{sep}sub_topic{sep}memo`
/// line. Lines in any other shape are ignored.
#[must_use]
pub fn parse_facts(response: &str, separator: &str) -> Vec<ExtractedFact> {
    response
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix("- ")?;
            let mut parts = rest.splitn(3, separator);
            let topic = parts.next()?.trim();
            let sub_topic = parts.next()?.trim();
            let memo = parts.next()?.trim();
            if topic.is_empty() || sub_topic.is_empty() || memo.is_empty() {
                return None;
            }
            Some(ExtractedFact {
                topic: topic.to_string(),
                sub_topic: sub_topic.to_string(),
                memo: memo.to_string(),
            })
        })
        .collect()
}

/// Parse a merge completion. `Some(memo)` when the model chose
/// `- UPDATE{sep}MEMO`; `None` means keep the old memo, which is also the
/// fallback for anything unparseable.
#[must_use]
pub fn parse_merge_action(response: &str, separator: &str) -> Option<String> {
    let update_prefix = format!("- UPDATE{separator}");
    response.lines().find_map(|line| {
        let memo = line.trim().strip_prefix(update_prefix.as_str())?.trim();
        (!memo.is_empty()).then(|| memo.to_string())
    })
}

/// Outcome of a per-fact validation completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidateOutcome {
    /// Store this (possibly revised) value.
    Save(String),
    /// The value does not fit the slot; drop the fact.
    Reject,
}

/// Parse a validation completion of shape `THOUGHT\n---\nRESULT`, where
/// RESULT is `- SAVE{sep}value` or `NONE`. Returns `None` when the
/// response fits neither, so callers can fall back to the unrevised value.
#[must_use]
pub fn parse_validate_result(response: &str, separator: &str) -> Option<ValidateOutcome> {
    let result = response
        .rsplit_once("---")
        .map_or(response, |(_, after)| after);
    let save_prefix = format!("- SAVE{separator}");
    for line in result.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix(save_prefix.as_str()) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(ValidateOutcome::Save(value.to_string()));
            }
        }
        if line == "NONE" {
            return Some(ValidateOutcome::Reject);
        }
    }
    None
}

/// Shared trailing instruction for non-English projects. Full localized
/// templates are a per-language concern the builders sidestep by pinning
/// the output language explicitly.
#[must_use]
pub(crate) fn language_requirement(language: Language) -> &'static str {
    match language {
        Language::En => "",
        Language::Zh => "\nAlways respond in Chinese.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_unify_normalizes() {
        assert_eq!(attribute_unify("  Basic Info "), "basic_info");
        assert_eq!(attribute_unify("Work  Life\tBalance"), "work_life_balance");
        assert_eq!(attribute_unify("age"), "age");
    }

    #[test]
    fn parse_facts_accepts_well_formed_lines_only() {
        let response = "\
Here are the facts:
- basic_info::age::User is 40
- interest::food::Loves pizza; prefers thin crust
not a fact line
- broken::line
- ::empty_topic::memo
";
        let facts = parse_facts(response, "::");
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].topic, "basic_info");
        assert_eq!(facts[0].sub_topic, "age");
        assert_eq!(facts[1].memo, "Loves pizza; prefers thin crust");
    }

    #[test]
    fn parse_facts_keeps_separator_inside_memo() {
        let facts = parse_facts("- work::goal::ship v1::beta by June", "::");
        assert_eq!(facts[0].memo, "ship v1::beta by June");
    }

    #[test]
    fn parse_merge_action_update_and_keep() {
        assert_eq!(
            parse_merge_action("- UPDATE::User is 40 years old", "::").as_deref(),
            Some("User is 40 years old")
        );
        assert!(parse_merge_action("KEEP", "::").is_none());
        assert!(parse_merge_action("some rambling without a decision", "::").is_none());
        assert!(parse_merge_action("- UPDATE::", "::").is_none());
    }

    #[test]
    fn parse_validate_result_variants() {
        let save = "The value fits but needs a fixed format.\n---\n- SAVE::2024-01-01";
        assert_eq!(
            parse_validate_result(save, "::"),
            Some(ValidateOutcome::Save("2024-01-01".into()))
        );

        let reject = "Value is about gaming, not study goals.\n---\nNONE";
        assert_eq!(
            parse_validate_result(reject, "::"),
            Some(ValidateOutcome::Reject)
        );

        assert!(parse_validate_result("I am not sure what to do here.", "::").is_none());
    }
}
