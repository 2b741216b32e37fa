//! Unified diffs between two file trees.

use std::collections::BTreeSet;

use similar::TextDiff;

use crate::core::types::FileTree;

const CONTEXT: usize = 3;

/// Render every difference between `base` and `current`, sorted by path.
///
/// Returns an empty string when the trees are identical.
pub fn tree_diff(base: &FileTree, current: &FileTree) -> String {
    let paths: BTreeSet<&String> = base.keys().chain(current.keys()).collect();
    let mut out = String::new();
    for path in paths {
        match (base.get(path), current.get(path)) {
            (Some(old), Some(new)) if old == new => {}
            (old, new) => out.push_str(&file_diff(path, old.map(Vec::as_slice), new.map(Vec::as_slice))),
        }
    }
    out
}

fn file_diff(path: &str, old: Option<&[u8]>, new: Option<&[u8]>) -> String {
    let old_label = if old.is_some() { format!("a/{path}") } else { "/dev/null".to_string() };
    let new_label = if new.is_some() { format!("b/{path}") } else { "/dev/null".to_string() };
    let old_text = old.map(std::str::from_utf8).transpose();
    let new_text = new.map(std::str::from_utf8).transpose();
    let (Ok(old_text), Ok(new_text)) = (old_text, new_text) else {
        return format!("Binary files {old_label} and {new_label} differ\n");
    };
    TextDiff::from_lines(old_text.unwrap_or_default(), new_text.unwrap_or_default())
        .unified_diff()
        .context_radius(CONTEXT)
        .header(&old_label, &new_label)
        .to_string()
}

/// Render hunks for two texts, without file headers.
pub fn line_diff(old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(CONTEXT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tree;

    #[test]
    fn identical_trees_have_empty_diff() {
        let base = tree(&[("a.txt", "one\n")]);
        assert_eq!(tree_diff(&base, &base.clone()), "");
    }

    #[test]
    fn modified_line_produces_single_hunk() {
        let diff = line_diff("a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(diff, "@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n");
    }

    #[test]
    fn added_and_removed_files_use_dev_null() {
        let base = tree(&[("old.txt", "gone\n")]);
        let current = tree(&[("new.txt", "here\n")]);
        let diff = tree_diff(&base, &current);
        assert!(diff.contains("--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1 @@\n+here\n"));
        assert!(diff.contains("--- a/old.txt\n+++ /dev/null\n@@ -1 +0,0 @@\n-gone\n"));
    }

    #[test]
    fn trailing_newline_change_is_reported() {
        let base = tree(&[("a.txt", "a")]);
        let current = tree(&[("a.txt", "a\n")]);
        let diff = tree_diff(&base, &current);
        assert!(diff.starts_with("--- a/a.txt\n+++ b/a.txt\n@@ "));
        assert!(diff.contains("-a"));
        assert!(diff.contains("+a"));
    }

    #[test]
    fn distant_changes_split_into_separate_hunks() {
        let old: String = (1..=20).map(|n| format!("line{n}\n")).collect();
        let new = old.replace("line2\n", "LINE2\n").replace("line18\n", "LINE18\n");
        let diff = line_diff(&old, &new);
        assert_eq!(diff.matches("@@ -").count(), 2);
    }

    #[test]
    fn binary_files_are_summarized() {
        let mut base = FileTree::new();
        base.insert("img.png".into(), vec![0xff, 0xfe]);
        let mut current = FileTree::new();
        current.insert("img.png".into(), vec![0xff, 0x00, 0xfe]);
        assert_eq!(
            tree_diff(&base, &current),
            "Binary files a/img.png and b/img.png differ\n"
        );
    }
}
