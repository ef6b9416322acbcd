use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::{CieError, Result};
use crate::language::Language;

/// Directories nobody wants indexed: VCS metadata, dependency caches, build
/// output. Applied on top of `.gitignore` and the configured excludes.
const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    "coverage",
    "vendor",
    "__pycache__",
    ".venv",
    "venv",
    ".next",
    ".nuxt",
];

const DEFAULT_EXCLUDE_FILES: &[&str] = &[
    "**/*.lock",
    "**/package-lock.json",
    "**/pnpm-lock.yaml",
    "**/yarn.lock",
    "**/Cargo.lock",
    "**/*.min.js",
    "**/*.map",
];

fn build_overrides(repo_root: &Path, exclude: &[String]) -> Result<Override> {
    let mut ob = OverrideBuilder::new(repo_root);

    let add = |ob: &mut OverrideBuilder, pat: &str| -> Result<()> {
        // Patterns in an override are whitelists; a leading `!` inverts to
        // an ignore, which is what every pattern here is.
        ob.add(&format!("!{pat}")).map_err(|e| {
            CieError::config(
                format!("invalid exclude pattern '{pat}'"),
                e.to_string(),
                "fix the glob in indexing.exclude",
            )
        })?;
        Ok(())
    };

    for d in DEFAULT_EXCLUDE_DIRS {
        add(&mut ob, &format!("**/{d}"))?;
        add(&mut ob, &format!("**/{d}/**"))?;
    }
    for f in DEFAULT_EXCLUDE_FILES {
        add(&mut ob, f)?;
    }
    for pat in exclude {
        let pat = pat.trim();
        if pat.is_empty() {
            continue;
        }
        add(&mut ob, pat)?;
        // A bare directory name should prune its contents too.
        if !pat.contains('*') && !pat.contains('/') {
            add(&mut ob, &format!("**/{pat}/**"))?;
        }
    }

    ob.build().map_err(|e| {
        CieError::config(
            "could not compile exclude patterns",
            e.to_string(),
            "check indexing.exclude for malformed globs",
        )
    })
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub repo_root: PathBuf,
    pub exclude: Vec<String>,
    pub max_file_bytes: u64,
    /// `rel_path → known hash` for files an external delta source (git)
    /// guarantees unchanged: they are enumerated but not re-read — the
    /// known hash is emitted and `content` stays empty. Files that turn
    /// out changed must never be in this map.
    pub reuse_hashes: std::collections::BTreeMap<String, String>,
}

/// Why a file was left out of the run. Never fatal; counted in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TooLarge,
    Binary,
    Unreadable,
    SymlinkOutsideRoot,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::TooLarge => "too_large",
            SkipReason::Binary => "binary",
            SkipReason::Unreadable => "unreadable",
            SkipReason::SymlinkOutsideRoot => "symlink_outside_root",
        }
    }
}

/// One kept file: hashed, tagged, content in hand.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub abs_path: PathBuf,
    /// Repo-relative, forward slashes.
    pub rel_path: String,
    pub language: Language,
    /// blake3 hex of the raw bytes.
    pub hash: String,
    pub size_bytes: u64,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub rel_path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub files: Vec<SourceFile>,
    pub skipped: Vec<SkippedFile>,
}

pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

fn rel_path_of(abs: &Path, root: &Path) -> Option<String> {
    abs.strip_prefix(root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}

/// Enumerate, read, hash, and tag every candidate file under the repo root.
///
/// The walk itself is sequential (it is cheap); reading + hashing fans out
/// over rayon. Output is sorted by relative path so downstream work is
/// deterministic.
pub fn walk_repository(opts: &WalkOptions) -> Result<WalkOutcome> {
    let root = opts
        .repo_root
        .canonicalize()
        .map_err(|e| CieError::io(format!("repo root {}", opts.repo_root.display()), e))?;

    let overrides = build_overrides(&root, &opts.exclude)?;

    let mut candidates: Vec<(PathBuf, String)> = Vec::new();
    let mut skipped: Vec<SkippedFile> = Vec::new();

    let walker = WalkBuilder::new(&root)
        .standard_filters(true)
        .overrides(overrides)
        .follow_links(false)
        .build();

    for item in walker {
        let dent = match item {
            Ok(d) => d,
            Err(_) => continue,
        };

        let Some(file_type) = dent.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            continue;
        }

        let abs = dent.into_path();
        let Some(rel) = rel_path_of(&abs, &root) else {
            continue;
        };

        if file_type.is_symlink() {
            // Only links that resolve back inside the repo are followed.
            match abs.canonicalize() {
                Ok(target) if target.starts_with(&root) => {}
                Ok(_) => {
                    skipped.push(SkippedFile {
                        rel_path: rel,
                        reason: SkipReason::SymlinkOutsideRoot,
                    });
                    continue;
                }
                Err(_) => {
                    skipped.push(SkippedFile {
                        rel_path: rel,
                        reason: SkipReason::Unreadable,
                    });
                    continue;
                }
            }
        }

        match std::fs::metadata(&abs) {
            Ok(meta) if meta.len() > opts.max_file_bytes => {
                skipped.push(SkippedFile {
                    rel_path: rel,
                    reason: SkipReason::TooLarge,
                });
            }
            Ok(meta) if meta.len() == 0 => {
                // Nothing to extract from an empty file.
            }
            Ok(_) => candidates.push((abs, rel)),
            Err(_) => {
                skipped.push(SkippedFile {
                    rel_path: rel,
                    reason: SkipReason::Unreadable,
                });
            }
        }
    }

    // Parallel read + hash sweep.
    enum ReadOutcome {
        Kept(SourceFile),
        Skipped(SkippedFile),
    }

    let read_results: Vec<ReadOutcome> = candidates
        .par_iter()
        .map(|(abs, rel)| {
            if let Some(known) = opts.reuse_hashes.get(rel) {
                let size_bytes = std::fs::metadata(abs).map(|m| m.len()).unwrap_or(0);
                return ReadOutcome::Kept(SourceFile {
                    abs_path: abs.clone(),
                    rel_path: rel.clone(),
                    language: Language::detect(Path::new(rel), ""),
                    hash: known.clone(),
                    size_bytes,
                    content: String::new(),
                });
            }
            let raw = match std::fs::read(abs) {
                Ok(r) => r,
                Err(_) => {
                    return ReadOutcome::Skipped(SkippedFile {
                        rel_path: rel.clone(),
                        reason: SkipReason::Unreadable,
                    })
                }
            };
            if raw.contains(&0u8) {
                return ReadOutcome::Skipped(SkippedFile {
                    rel_path: rel.clone(),
                    reason: SkipReason::Binary,
                });
            }
            let hash = content_hash(&raw);
            let size_bytes = raw.len() as u64;
            let content = String::from_utf8_lossy(&raw).into_owned();
            let language = Language::detect(Path::new(rel), &content);
            ReadOutcome::Kept(SourceFile {
                abs_path: abs.clone(),
                rel_path: rel.clone(),
                language,
                hash,
                size_bytes,
                content,
            })
        })
        .collect();

    let mut files = Vec::with_capacity(read_results.len());
    for outcome in read_results {
        match outcome {
            ReadOutcome::Kept(f) => files.push(f),
            ReadOutcome::Skipped(s) => skipped.push(s),
        }
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    skipped.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

    Ok(WalkOutcome { files, skipped })
}
