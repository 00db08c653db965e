//! Diff generation between two saved versions.
//!
//! Prefers the system `diff` tool for real unified patches. When `diff` is
//! not installed, falls back to a stable file-set comparison format that
//! still answers "what changed" in a parseable way.

use crate::provider::FileMap;
use std::path::Path;
use std::process::Command;

/// Files at or under this size are inlined in the fallback diff.
const SHORT_FILE_MAX_CHARS: usize = 2000;

/// Produce a unified diff between two directories via the system `diff`.
///
/// Returns `None` when the tool cannot be spawned (not installed). Exit code
/// 1 means differences were found and is a success here; anything above 1 is
/// a tool failure and also yields `None`.
pub(super) fn system_unified_diff(from_dir: &Path, to_dir: &Path) -> Option<String> {
    let output = Command::new("diff")
        .arg("-ruN")
        .arg(from_dir)
        .arg(to_dir)
        .output()
        .ok()?;

    match output.status.code() {
        Some(0) | Some(1) => Some(String::from_utf8_lossy(&output.stdout).to_string()),
        _ => {
            tracing::warn!(
                status = ?output.status.code(),
                "system diff failed, falling back to file-set comparison"
            );
            None
        }
    }
}

/// Stable text fallback: `=== added/removed/modified ===` sections listing
/// paths, with full content inlined for short files.
pub(super) fn fallback_diff(from_files: &FileMap, to_files: &FileMap) -> String {
    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut modified = Vec::new();

    for (path, content) in to_files {
        match from_files.get(path) {
            None => added.push((path, content)),
            Some(old) if old != content => modified.push((path, content)),
            Some(_) => {}
        }
    }
    for path in from_files.keys() {
        if !to_files.contains_key(path) {
            removed.push(path);
        }
    }

    let mut out = String::new();
    out.push_str("=== added ===\n");
    for (path, content) in &added {
        out.push_str(path);
        out.push('\n');
        push_short_content(&mut out, content);
    }
    out.push_str("=== removed ===\n");
    for path in &removed {
        out.push_str(path);
        out.push('\n');
    }
    out.push_str("=== modified ===\n");
    for (path, content) in &modified {
        out.push_str(path);
        out.push('\n');
        push_short_content(&mut out, content);
    }
    out
}

fn push_short_content(out: &mut String, content: &str) {
    if content.len() <= SHORT_FILE_MAX_CHARS {
        out.push_str("--- begin content ---\n");
        out.push_str(content);
        if !content.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("--- end content ---\n");
    } else {
        out.push_str(&format!("--- content omitted ({} chars) ---\n", content.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(pairs: &[(&str, &str)]) -> FileMap {
        pairs
            .iter()
            .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
            .collect()
    }

    #[test]
    fn fallback_sections_cover_all_change_kinds() {
        let from = files(&[("a.py", "old"), ("b.py", "keep"), ("c.py", "gone")]);
        let to = files(&[("a.py", "new"), ("b.py", "keep"), ("d.py", "fresh")]);

        let diff = fallback_diff(&from, &to);
        let added_idx = diff.find("=== added ===").expect("added section");
        let removed_idx = diff.find("=== removed ===").expect("removed section");
        let modified_idx = diff.find("=== modified ===").expect("modified section");
        assert!(added_idx < removed_idx && removed_idx < modified_idx);

        assert!(diff[added_idx..removed_idx].contains("d.py"));
        assert!(diff[added_idx..removed_idx].contains("fresh"));
        assert!(diff[removed_idx..modified_idx].contains("c.py"));
        assert!(diff[modified_idx..].contains("a.py"));
        assert!(diff[modified_idx..].contains("new"));
        assert!(!diff.contains("keep"));
    }

    #[test]
    fn fallback_omits_long_content() {
        let from = FileMap::new();
        let to = files(&[("big.py", &"x".repeat(5000))]);

        let diff = fallback_diff(&from, &to);
        assert!(diff.contains("big.py"));
        assert!(diff.contains("content omitted (5000 chars)"));
        assert!(!diff.contains(&"x".repeat(100)));
    }

    #[test]
    fn fallback_identical_sets_have_empty_sections() {
        let same = files(&[("a.py", "same")]);
        let diff = fallback_diff(&same, &same);
        assert_eq!(
            diff,
            "=== added ===\n=== removed ===\n=== modified ===\n"
        );
    }

    #[test]
    fn system_diff_reports_changes_when_available() {
        let from = tempfile::tempdir().expect("from dir");
        let to = tempfile::tempdir().expect("to dir");
        std::fs::write(from.path().join("a.txt"), "one\n").expect("write");
        std::fs::write(to.path().join("a.txt"), "two\n").expect("write");

        // Skip silently on hosts without a diff binary; the fallback covers them.
        if let Some(patch) = system_unified_diff(from.path(), to.path()) {
            assert!(patch.contains("-one"));
            assert!(patch.contains("+two"));
        }
    }
}
