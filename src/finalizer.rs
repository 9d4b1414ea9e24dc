//! Finalizer - answer extraction and entry construction
//!
//! In full-pipeline mode the user-visible answer is the `Final Answer:`
//! section of the moderator output; if the moderator ignored the contract,
//! the whole moderator text stands in. Shortcut mode passes the single
//! analyzer's text through unchanged.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::classify::Classification;
use crate::memory::{ConversationEntry, RouteDecision};

// Literal label through the next bold header on its own line, or end of
// string. Whitespace after the label is limited to the same line so a bold
// header directly below it still terminates an empty section.
static FINAL_ANSWER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)Final Answer:[ \t]*(.*?)(?:\n\*\*[^*\n]+\*\*|\z)").unwrap());

/// Extract the `Final Answer:` segment from moderator output.
pub fn extract_final_answer(moderator_output: &str) -> String {
    FINAL_ANSWER_RE
        .captures(moderator_output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| moderator_output.trim().to_string())
}

/// Inputs the orchestrator hands to entry construction
pub struct EntryDraft<'a> {
    pub thread_id: &'a str,
    pub user_query: &'a str,
    pub classification: &'a Classification,
    pub processing_time_ms: u64,
}

/// Build the entry for a shortcut run: exactly one output, no moderator,
/// the analyzer text verbatim as the final answer.
pub fn shortcut_entry(
    draft: EntryDraft<'_>,
    target: crate::classify::ShortcutTarget,
    text: String,
) -> ConversationEntry {
    let mut specialist_outputs = BTreeMap::new();
    specialist_outputs.insert(target.as_str().to_string(), text.clone());

    ConversationEntry {
        entry_id: Uuid::new_v4().to_string(),
        thread_id: draft.thread_id.to_string(),
        timestamp: Utc::now(),
        user_query: draft.user_query.to_string(),
        query_kind: draft.classification.query_kind,
        is_followup: draft.classification.is_followup,
        processing_time_ms: draft.processing_time_ms,
        specialist_outputs,
        moderator_output: None,
        final_answer: text,
        route_decision: RouteDecision::Shortcut(target),
        duplicate: false,
    }
}

/// Build the entry for a full-pipeline run.
pub fn full_pipeline_entry(
    draft: EntryDraft<'_>,
    specialist_outputs: BTreeMap<String, String>,
    moderator_output: String,
) -> ConversationEntry {
    let final_answer = extract_final_answer(&moderator_output);

    ConversationEntry {
        entry_id: Uuid::new_v4().to_string(),
        thread_id: draft.thread_id.to_string(),
        timestamp: Utc::now(),
        user_query: draft.user_query.to_string(),
        query_kind: draft.classification.query_kind,
        is_followup: draft.classification.is_followup,
        processing_time_ms: draft.processing_time_ms,
        specialist_outputs,
        moderator_output: Some(moderator_output),
        final_answer,
        route_decision: RouteDecision::FullPipeline,
        duplicate: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{QueryKind, ShortcutTarget, SpecialistRole};

    #[test]
    fn test_extract_plain_final_answer() {
        let text = "Summary of the panel.\n\nFinal Answer: ship the MVP first.";
        assert_eq!(extract_final_answer(text), "ship the MVP first.");
    }

    #[test]
    fn test_extract_stops_at_bold_header() {
        let text = "Narrative.\n\nFinal Answer: do X then Y.\n**Appendix**\nraw notes";
        assert_eq!(extract_final_answer(text), "do X then Y.");
    }

    #[test]
    fn test_extract_multiline_answer() {
        let text = "Final Answer: first line.\nsecond line.";
        assert_eq!(extract_final_answer(text), "first line.\nsecond line.");
    }

    #[test]
    fn test_missing_label_falls_back_to_full_text() {
        let text = "The moderator forgot the label entirely.";
        assert_eq!(extract_final_answer(text), text);
    }

    #[test]
    fn test_empty_section_falls_back_to_full_text() {
        let text = "Preamble.\nFinal Answer:\n**Notes**\nmore";
        assert_eq!(extract_final_answer(text), text.trim());
    }

    #[test]
    fn test_shortcut_entry_shape() {
        let classification = Classification {
            query_kind: QueryKind::Revenue,
            is_followup: true,
            shortcut_target: Some(ShortcutTarget::Role(SpecialistRole::Revenue)),
        };
        let entry = shortcut_entry(
            EntryDraft {
                thread_id: "t1",
                user_query: "pricing?",
                classification: &classification,
                processing_time_ms: 5,
            },
            ShortcutTarget::Role(SpecialistRole::Revenue),
            "charge money".into(),
        );
        assert_eq!(
            entry.route_decision,
            RouteDecision::Shortcut(ShortcutTarget::Role(SpecialistRole::Revenue))
        );
        assert_eq!(entry.specialist_outputs.len(), 1);
        assert_eq!(entry.specialist_outputs["revenue"], "charge money");
        assert!(entry.moderator_output.is_none());
        assert_eq!(entry.final_answer, "charge money");
    }

    #[test]
    fn test_full_pipeline_entry_extracts_answer() {
        let classification = Classification {
            query_kind: QueryKind::General,
            is_followup: false,
            shortcut_target: None,
        };
        let mut outputs = BTreeMap::new();
        outputs.insert("domain".to_string(), "regulated".to_string());
        let entry = full_pipeline_entry(
            EntryDraft {
                thread_id: "t1",
                user_query: "build it",
                classification: &classification,
                processing_time_ms: 9,
            },
            outputs,
            "Narrative.\n\nFinal Answer: proceed carefully.".into(),
        );
        assert_eq!(entry.route_decision, RouteDecision::FullPipeline);
        assert_eq!(entry.final_answer, "proceed carefully.");
        assert!(entry.moderator_output.is_some());
    }
}
