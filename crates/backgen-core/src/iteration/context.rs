//! Context-prompt assembly for iterations.
//!
//! Builds the provider prompt describing the existing project: a visual file
//! tree, excerpts of the most structurally important files, the user request,
//! and explicit merge instructions.

use super::intent::Intent;
use crate::provider::FileMap;
use std::collections::BTreeMap;

/// Maximum number of key files excerpted into the prompt.
const MAX_KEY_FILES: usize = 5;

/// Maximum characters excerpted per key file.
const KEY_FILE_MAX_CHARS: usize = 4000;

/// Path patterns that mark a file as key context, in priority order.
const KEY_FILE_PATTERNS: &[&str] = &["main", "app", "config", "models/", "schemas/", "routers/"];

/// Build the full iteration context prompt.
pub fn build_context_prompt(
    existing: &FileMap,
    modification_prompt: &str,
    intent: Intent,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "ITERATION REQUEST\n\nThe project currently has {} files.\n\n",
        existing.len()
    ));

    out.push_str("## Project structure\n\n");
    out.push_str(&render_tree(existing.keys().map(String::as_str)));
    out.push('\n');

    let key_files = select_key_files(existing);
    if !key_files.is_empty() {
        out.push_str("## Key files\n\n");
        for path in key_files {
            let content = &existing[path];
            out.push_str(&format!("### {path}\n\n```\n"));
            if content.len() > KEY_FILE_MAX_CHARS {
                out.push_str(&content[..floor_char_boundary(content, KEY_FILE_MAX_CHARS)]);
                out.push_str("\n... [truncated]");
            } else {
                out.push_str(content);
            }
            out.push_str("\n```\n\n");
        }
    }

    out.push_str(&format!("## User request\n\n{modification_prompt}\n\n"));
    out.push_str(&format!("Detected intent: {}\n\n", intent.as_str()));
    out.push_str(
        "This is an iteration on an existing project. Return ONLY the files to add or \
         modify as a JSON object of path to content. For removals, return the paths to \
         remove mapped to empty strings. Do not restate unchanged files.\n",
    );
    out
}

/// Choose up to [`MAX_KEY_FILES`] files by structural priority.
///
/// Patterns are checked in order so entrypoints and configuration beat
/// entity files when the budget is tight.
pub fn select_key_files(existing: &FileMap) -> Vec<&String> {
    let mut selected: Vec<&String> = Vec::new();
    for pattern in KEY_FILE_PATTERNS {
        for path in existing.keys() {
            if selected.len() >= MAX_KEY_FILES {
                return selected;
            }
            if path.contains(pattern) && !selected.contains(&path) {
                selected.push(path);
            }
        }
    }
    selected
}

#[derive(Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
    is_file: bool,
}

/// Render paths as a UTF-8 tree, directories before files, both sorted.
pub fn render_tree<'a>(paths: impl Iterator<Item = &'a str>) -> String {
    let mut root = TreeNode::default();
    for path in paths {
        let mut node = &mut root;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for (i, segment) in segments.iter().enumerate() {
            node = node.children.entry((*segment).to_string()).or_default();
            if i == segments.len() - 1 {
                node.is_file = true;
            }
        }
    }

    let mut out = String::new();
    render_node(&root, "", &mut out);
    out
}

fn render_node(node: &TreeNode, prefix: &str, out: &mut String) {
    // Directories first, then files, each group alphabetical.
    let mut entries: Vec<(&String, &TreeNode)> = node.children.iter().collect();
    entries.sort_by_key(|(name, child)| (child.children.is_empty() && child.is_file, (*name).clone()));

    let count = entries.len();
    for (i, (name, child)) in entries.into_iter().enumerate() {
        let last = i + 1 == count;
        let connector = if last { "└── " } else { "├── " };
        out.push_str(prefix);
        out.push_str(connector);
        out.push_str(name);
        if !child.children.is_empty() || !child.is_file {
            out.push('/');
        }
        out.push('\n');

        let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
        render_node(child, &child_prefix, out);
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> FileMap {
        paths
            .iter()
            .map(|p| ((*p).to_string(), format!("# {p}\n")))
            .collect()
    }

    #[test]
    fn tree_puts_directories_before_files() {
        let tree = render_tree(
            ["requirements.txt", "app/main.py", "app/models/user.py"]
                .iter()
                .copied(),
        );
        let lines: Vec<&str> = tree.lines().collect();
        assert_eq!(lines[0], "├── app/");
        assert!(lines.last().expect("lines").contains("requirements.txt"));
        assert!(tree.contains("│   ├── models/"));
        assert!(tree.contains("│   │   └── user.py"));
    }

    #[test]
    fn tree_is_deterministic() {
        let a = render_tree(["b.py", "a.py", "dir/z.py"].iter().copied());
        let b = render_tree(["dir/z.py", "a.py", "b.py"].iter().copied());
        assert_eq!(a, b);
    }

    #[test]
    fn key_files_prefer_entrypoints() {
        let map = files(&[
            "app/main.py",
            "app/config.py",
            "app/models/user.py",
            "app/models/post.py",
            "app/schemas/user.py",
            "app/routers/user.py",
            "tests/test_user.py",
        ]);
        let selected = select_key_files(&map);
        assert_eq!(selected.len(), 5);
        assert_eq!(selected[0], "app/main.py");
        assert!(!selected.contains(&&"tests/test_user.py".to_string()));
    }

    #[test]
    fn key_files_empty_for_unrecognized_layout() {
        let map = files(&["weird.txt", "other/thing.bin"]);
        assert!(select_key_files(&map).is_empty());
    }

    #[test]
    fn prompt_carries_request_intent_and_instructions() {
        let map = files(&["app/main.py", "app/models/user.py"]);
        let prompt = build_context_prompt(&map, "Add missing schema files", Intent::Add);

        assert!(prompt.starts_with("ITERATION REQUEST"));
        assert!(prompt.contains("currently has 2 files"));
        assert!(prompt.contains("└── main.py") || prompt.contains("├── main.py"));
        assert!(prompt.contains("Add missing schema files"));
        assert!(prompt.contains("Detected intent: add"));
        assert!(prompt.contains("Return ONLY the files"));
    }

    #[test]
    fn long_key_files_are_truncated_with_marker() {
        let mut map = FileMap::new();
        map.insert("app/main.py".to_string(), "x".repeat(10_000));
        let prompt = build_context_prompt(&map, "fix it", Intent::Modify);
        assert!(prompt.contains("... [truncated]"));
        assert!(!prompt.contains(&"x".repeat(5000)));
    }
}
