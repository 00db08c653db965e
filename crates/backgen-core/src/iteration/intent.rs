//! Intent detection for iteration prompts.
//!
//! Deterministic keyword scan; remove outranks modify outranks add on ties,
//! and an unmatched prompt defaults to modify as the safest interpretation.

use serde::{Deserialize, Serialize};

/// Classified user goal for an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// New files join the project.
    Add,
    /// Existing files change.
    Modify,
    /// Files leave the project.
    Remove,
}

impl Intent {
    /// Stable lowercase name used in events and provider context.
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Add => "add",
            Intent::Modify => "modify",
            Intent::Remove => "remove",
        }
    }
}

const ADD_KEYWORDS: &[&str] = &["add", "create", "new", "missing", "include"];
const MODIFY_KEYWORDS: &[&str] = &[
    "fix", "update", "change", "modify", "refactor", "improve", "replace", "rename",
];
const REMOVE_KEYWORDS: &[&str] = &["remove", "delete", "drop", "exclude"];

/// Detect the intent of a modification prompt.
pub fn detect_intent(prompt: &str) -> Intent {
    let lower = prompt.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let count = |keywords: &[&str]| words.iter().filter(|w| keywords.contains(*w)).count();
    let add = count(ADD_KEYWORDS);
    let modify = count(MODIFY_KEYWORDS);
    let remove = count(REMOVE_KEYWORDS);

    // Tie-breaking: remove > modify > add; no match defaults to modify.
    if remove > 0 && remove >= modify && remove >= add {
        Intent::Remove
    } else if modify > 0 && modify >= add {
        Intent::Modify
    } else if add > 0 {
        Intent::Add
    } else {
        Intent::Modify
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_keywords() {
        assert_eq!(detect_intent("Add missing schema files"), Intent::Add);
        assert_eq!(detect_intent("create a new endpoint"), Intent::Add);
        assert_eq!(detect_intent("Include pagination"), Intent::Add);
    }

    #[test]
    fn modify_keywords() {
        assert_eq!(detect_intent("Fix the auth bug"), Intent::Modify);
        assert_eq!(detect_intent("refactor the user service"), Intent::Modify);
        assert_eq!(detect_intent("rename the order model"), Intent::Modify);
    }

    #[test]
    fn remove_keywords() {
        assert_eq!(detect_intent("Remove all test files"), Intent::Remove);
        assert_eq!(detect_intent("please delete the legacy router"), Intent::Remove);
        assert_eq!(detect_intent("drop the audit table"), Intent::Remove);
    }

    #[test]
    fn remove_wins_ties() {
        assert_eq!(
            detect_intent("remove the broken endpoint and add a replacement"),
            Intent::Remove
        );
    }

    #[test]
    fn higher_score_beats_priority() {
        // Two add keywords against one remove keyword: not a tie.
        assert_eq!(
            detect_intent("remove the old handler and add a new one"),
            Intent::Add
        );
    }

    #[test]
    fn modify_beats_add_on_tie() {
        assert_eq!(detect_intent("update and add docs"), Intent::Modify);
    }

    #[test]
    fn no_match_defaults_to_modify() {
        assert_eq!(detect_intent("make it better somehow"), Intent::Modify);
        assert_eq!(detect_intent(""), Intent::Modify);
    }

    #[test]
    fn keywords_match_whole_words_only() {
        // "address" contains "add", "dropped"... must not trip the scanner.
        assert_eq!(detect_intent("fix the address validation"), Intent::Modify);
    }
}
