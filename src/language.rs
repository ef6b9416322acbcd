use std::path::Path;

/// Language tag attached to every file record.
///
/// Tags are assigned from the file extension, with a shebang sniff for
/// extensionless scripts. Only a subset has grammar-driven extraction; the
/// rest route to the heuristic extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Go,
    JavaScript,
    TypeScript,
    Python,
    Rust,
    Java,
    C,
    Cpp,
    CSharp,
    Ruby,
    Php,
    Kotlin,
    Swift,
    Shell,
    Unknown,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Kotlin => "kotlin",
            Language::Swift => "swift",
            Language::Shell => "shell",
            Language::Unknown => "unknown",
        }
    }

    /// True when a tree-sitter grammar is wired up for this tag.
    pub fn has_grammar(&self) -> bool {
        matches!(
            self,
            Language::Go
                | Language::JavaScript
                | Language::TypeScript
                | Language::Python
                | Language::Rust
        )
    }

    pub fn from_extension(ext: &str) -> Language {
        match ext {
            "go" => Language::Go,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "py" | "pyi" => Language::Python,
            "rs" => Language::Rust,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cc" | "cpp" | "cxx" | "hpp" | "hh" => Language::Cpp,
            "cs" => Language::CSharp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "kt" | "kts" => Language::Kotlin,
            "swift" => Language::Swift,
            "sh" | "bash" | "zsh" => Language::Shell,
            _ => Language::Unknown,
        }
    }

    /// Tag a file from its path, falling back to the shebang line for
    /// extensionless scripts (`#!/usr/bin/env python3` and friends).
    pub fn detect(path: &Path, content: &str) -> Language {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let by_ext = Language::from_extension(&ext);
        if by_ext != Language::Unknown {
            return by_ext;
        }

        if let Some(first) = content.lines().next() {
            if let Some(lang) = Language::from_shebang(first) {
                return lang;
            }
        }

        Language::Unknown
    }

    fn from_shebang(line: &str) -> Option<Language> {
        if !line.starts_with("#!") {
            return None;
        }
        // The interpreter is the last path segment; `env` pushes it one
        // argument further along.
        let mut parts = line[2..].split_whitespace();
        let mut interp = parts.next()?.rsplit('/').next()?;
        if interp == "env" {
            interp = parts.next()?;
        }
        let interp = interp.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
        match interp {
            "python" => Some(Language::Python),
            "node" | "nodejs" => Some(Language::JavaScript),
            "ruby" => Some(Language::Ruby),
            "sh" | "bash" | "zsh" | "dash" => Some(Language::Shell),
            "php" => Some(Language::Php),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn tags_by_extension() {
        assert_eq!(Language::detect(&PathBuf::from("src/a.go"), ""), Language::Go);
        assert_eq!(Language::detect(&PathBuf::from("src/a.js"), ""), Language::JavaScript);
        assert_eq!(Language::detect(&PathBuf::from("a.tsx"), ""), Language::TypeScript);
        assert_eq!(Language::detect(&PathBuf::from("a.pyi"), ""), Language::Python);
    }

    #[test]
    fn shebang_beats_missing_extension() {
        let content = "#!/usr/bin/env python3\nprint('hi')\n";
        assert_eq!(Language::detect(&PathBuf::from("bin/tool"), content), Language::Python);

        let content = "#!/bin/bash\necho hi\n";
        assert_eq!(Language::detect(&PathBuf::from("run"), content), Language::Shell);
    }

    #[test]
    fn unknown_without_hints() {
        assert_eq!(Language::detect(&PathBuf::from("data.bin2"), "garbage"), Language::Unknown);
    }

    #[test]
    fn grammar_support_covers_the_big_five() {
        for lang in [
            Language::Go,
            Language::JavaScript,
            Language::TypeScript,
            Language::Python,
            Language::Rust,
        ] {
            assert!(lang.has_grammar(), "{:?}", lang);
        }
        assert!(!Language::Ruby.has_grammar());
    }
}
