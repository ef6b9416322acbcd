//! Git-delta mode: narrow the candidate change set with `git diff` before
//! the hash-verified plan.
//!
//! The diff only nominates candidates; the delta planner still compares
//! hashes against the manifest, so uncommitted or out-of-band edits are
//! never missed. If git is unavailable or the recorded commit is gone
//! (rebase, gc), callers fall back to the full hash comparison.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct ChangedPath {
    pub path: String,
    pub kind: ChangeKind,
}

/// `git rev-parse HEAD`, or `None` when the tree is not a git checkout.
pub fn head_commit(root: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if commit.is_empty() {
        None
    } else {
        Some(commit)
    }
}

/// `git diff --name-status <since>..HEAD`, plus untracked files from
/// `git status --porcelain`, as a candidate set. `None` when the diff
/// cannot be computed (missing commit, not a repo).
pub fn changed_since(root: &Path, since: &str) -> Option<Vec<ChangedPath>> {
    let output = Command::new("git")
        .args(["diff", "--name-status", &format!("{since}..HEAD")])
        .current_dir(root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let mut changes = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let stdout = String::from_utf8_lossy(&output.stdout);

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split('\t');
        let status = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("").to_string();
        if path.is_empty() {
            continue;
        }

        if status.starts_with('R') {
            // Rename: old path is deleted, new path (third column) is added.
            changes.push(ChangedPath {
                path: path.clone(),
                kind: ChangeKind::Deleted,
            });
            seen.insert(path);
            if let Some(to) = parts.next() {
                changes.push(ChangedPath {
                    path: to.to_string(),
                    kind: ChangeKind::Added,
                });
                seen.insert(to.to_string());
            }
            continue;
        }

        let kind = match status {
            "A" => ChangeKind::Added,
            "D" => ChangeKind::Deleted,
            _ => ChangeKind::Modified,
        };
        seen.insert(path.clone());
        changes.push(ChangedPath { path, kind });
    }

    // Working-tree changes (uncommitted edits, untracked files) never show
    // up in the commit diff; without them the candidate set would be
    // unsound to skip from.
    let status_out = Command::new("git")
        .args(["status", "--porcelain", "--untracked-files=all"])
        .current_dir(root)
        .output()
        .ok()?;
    if !status_out.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&status_out.stdout);
    for line in text.lines() {
        if line.len() < 4 {
            continue;
        }
        let (code, rest) = line.split_at(2);
        let rest = rest.trim_start();
        // Renames in porcelain read `R  old -> new`.
        let (old, new) = match rest.split_once(" -> ") {
            Some((old, new)) => (Some(old), new),
            None => (None, rest),
        };
        if let Some(old) = old {
            if seen.insert(old.to_string()) {
                changes.push(ChangedPath {
                    path: old.to_string(),
                    kind: ChangeKind::Deleted,
                });
            }
        }
        let kind = if code.contains('D') {
            ChangeKind::Deleted
        } else if code == "??" || code.contains('A') {
            ChangeKind::Added
        } else {
            ChangeKind::Modified
        };
        if !new.is_empty() && seen.insert(new.to_string()) {
            changes.push(ChangedPath {
                path: new.to_string(),
                kind,
            });
        }
    }

    Some(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git(root: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(root)
            .env("GIT_AUTHOR_NAME", "t")
            .env("GIT_AUTHOR_EMAIL", "t@t")
            .env("GIT_COMMITTER_NAME", "t")
            .env("GIT_COMMITTER_EMAIL", "t@t")
            .output()
            .expect("git runs");
        assert!(status.status.success(), "git {args:?} failed");
    }

    #[test]
    fn diff_classifies_changes_and_untracked() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        git(root, &["init", "-q"]);
        std::fs::write(root.join("a.go"), "package a\n").unwrap();
        std::fs::write(root.join("b.go"), "package b\n").unwrap();
        git(root, &["add", "."]);
        git(root, &["commit", "-qm", "one"]);
        let first = head_commit(root).expect("head exists");

        std::fs::write(root.join("a.go"), "package a // edited\n").unwrap();
        std::fs::remove_file(root.join("b.go")).unwrap();
        git(root, &["add", "-A"]);
        git(root, &["commit", "-qm", "two"]);
        // Untracked, never committed.
        std::fs::write(root.join("c.go"), "package c\n").unwrap();

        let changes = changed_since(root, &first).expect("diff works");
        let find = |p: &str| changes.iter().find(|c| c.path == p).map(|c| c.kind);
        assert_eq!(find("a.go"), Some(ChangeKind::Modified));
        assert_eq!(find("b.go"), Some(ChangeKind::Deleted));
        assert_eq!(find("c.go"), Some(ChangeKind::Added));
    }

    #[test]
    fn uncommitted_edits_are_candidates_too() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        git(root, &["init", "-q"]);
        std::fs::write(root.join("a.go"), "package a\n").unwrap();
        git(root, &["add", "."]);
        git(root, &["commit", "-qm", "one"]);
        let first = head_commit(root).expect("head exists");

        // Edited but never staged: invisible to the commit diff.
        std::fs::write(root.join("a.go"), "package a // dirty\n").unwrap();

        let changes = changed_since(root, &first).expect("diff works");
        assert!(changes
            .iter()
            .any(|c| c.path == "a.go" && c.kind == ChangeKind::Modified));
    }

    #[test]
    fn missing_commit_falls_back_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        git(root, &["init", "-q"]);
        std::fs::write(root.join("a.go"), "package a\n").unwrap();
        git(root, &["add", "."]);
        git(root, &["commit", "-qm", "one"]);

        assert!(changed_since(root, "0000000000000000000000000000000000000000").is_none());
    }

    #[test]
    fn non_repo_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(head_commit(dir.path()).is_none());
    }
}
