//! Line-based fallback extractor for languages without a wired-up grammar
//! (and for minified input the grammars should never see).
//!
//! A small state machine blanks out string, template-literal, line-comment,
//! and block-comment content first, so definition and call patterns only
//! ever match real code. Each definition's extent runs to the next
//! definition line (or EOF) — the same territory model the grammar drivers
//! get from the CST for free.

use std::sync::OnceLock;

use regex::Regex;

use super::{RawCall, RawExtraction, RawFunction, RawType};
use crate::model::TypeKind;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Ctx {
    Code,
    LineComment,
    BlockComment,
    Single,
    Double,
    Backtick,
}

/// Replace every non-code byte with a space, preserving length and line
/// structure, so downstream regexes cannot match inside strings/comments.
fn blank_non_code(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = vec![b' '; bytes.len()];
    let mut ctx = Ctx::Code;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\n' {
            out[i] = b'\n';
            if ctx == Ctx::LineComment {
                ctx = Ctx::Code;
            }
            i += 1;
            continue;
        }

        match ctx {
            Ctx::Code => match b {
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    ctx = Ctx::LineComment;
                    i += 2;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    ctx = Ctx::BlockComment;
                    i += 2;
                }
                b'#' => {
                    ctx = Ctx::LineComment;
                    i += 1;
                }
                b'\'' => {
                    out[i] = b;
                    ctx = Ctx::Single;
                    i += 1;
                }
                b'"' => {
                    out[i] = b;
                    ctx = Ctx::Double;
                    i += 1;
                }
                b'`' => {
                    out[i] = b;
                    ctx = Ctx::Backtick;
                    i += 1;
                }
                _ => {
                    out[i] = b;
                    i += 1;
                }
            },
            Ctx::LineComment => i += 1,
            Ctx::BlockComment => {
                if b == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    ctx = Ctx::Code;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            Ctx::Single | Ctx::Double | Ctx::Backtick => {
                let close = match ctx {
                    Ctx::Single => b'\'',
                    Ctx::Double => b'"',
                    _ => b'`',
                };
                if b == b'\\' {
                    i += 2;
                } else if b == close {
                    out[i] = b;
                    ctx = Ctx::Code;
                    i += 1;
                } else {
                    i += 1;
                }
            }
        }
    }

    String::from_utf8(out).unwrap_or_else(|_| source.to_string())
}

fn func_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:export\s+|pub(?:\([^)]*\))?\s+|public\s+|private\s+|protected\s+|static\s+|async\s+)*(?:function|func|fn|def)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
        )
        .unwrap()
    })
}

/// Go-style method: `func (c *CozoDB) Write(…)`.
fn method_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*func\s*\(\s*\w+\s+\*?([A-Za-z_][A-Za-z0-9_]*)\s*\)\s*([A-Za-z_][A-Za-z0-9_]*)")
            .unwrap()
    })
}

fn arrow_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*=>|[A-Za-z_$][A-Za-z0-9_$]*\s*=>)",
        )
        .unwrap()
    })
}

fn type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:export\s+|pub(?:\([^)]*\))?\s+|public\s+|abstract\s+)*(class|interface|struct|enum|trait)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
        )
        .unwrap()
    })
}

fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap())
}

const CALL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "return", "catch", "function", "func", "fn", "def", "new",
    "typeof", "sizeof", "with", "except", "elif", "do", "else", "match", "case", "defer", "go",
];

enum DefLine {
    Function(String),
    Type(String, TypeKind),
}

fn classify_line(code_line: &str) -> Option<DefLine> {
    if let Some(caps) = method_re().captures(code_line) {
        return Some(DefLine::Function(format!("{}.{}", &caps[1], &caps[2])));
    }
    if let Some(caps) = func_re().captures(code_line) {
        return Some(DefLine::Function(caps[1].to_string()));
    }
    if let Some(caps) = arrow_re().captures(code_line) {
        return Some(DefLine::Function(caps[1].to_string()));
    }
    if let Some(caps) = type_re().captures(code_line) {
        let kind = match &caps[1] {
            "class" => TypeKind::Class,
            "interface" | "trait" => TypeKind::Interface,
            "struct" => TypeKind::Struct,
            "enum" => TypeKind::Enum,
            _ => TypeKind::TypeAlias,
        };
        return Some(DefLine::Type(caps[2].to_string(), kind));
    }
    None
}

pub(super) fn extract(source: &str) -> RawExtraction {
    let code = blank_non_code(source);
    let code_lines: Vec<&str> = code.lines().collect();
    let total_lines = code_lines.len();

    // Byte offset of the start of each line, for spans and call positions.
    let mut line_starts = Vec::with_capacity(total_lines + 1);
    let mut offset = 0usize;
    for line in source.split_inclusive('\n') {
        line_starts.push(offset);
        offset += line.len();
    }
    line_starts.push(source.len());

    let mut defs: Vec<(usize, DefLine)> = Vec::new(); // (0-based line, def)
    for (idx, line) in code_lines.iter().enumerate() {
        if let Some(def) = classify_line(line) {
            defs.push((idx, def));
        }
    }

    let mut out = RawExtraction::default();

    for (i, (line_idx, def)) in defs.iter().enumerate() {
        // Territory: to the line before the next definition, or EOF.
        let end_idx = defs
            .get(i + 1)
            .map(|(next, _)| next.saturating_sub(1).max(*line_idx))
            .unwrap_or_else(|| total_lines.saturating_sub(1).max(*line_idx));

        let start_byte = line_starts[*line_idx];
        let end_byte = line_starts[(end_idx + 1).min(line_starts.len() - 1)];
        let start_line = *line_idx as u32 + 1;
        let end_line = end_idx as u32 + 1;
        let start_col = code_lines[*line_idx]
            .len()
            .saturating_sub(code_lines[*line_idx].trim_start().len()) as u32;

        match def {
            DefLine::Function(name) => out.functions.push(RawFunction {
                name: name.clone(),
                anon: None,
                start_line,
                end_line,
                start_col,
                end_col: 0,
                start_byte,
                end_byte,
            }),
            DefLine::Type(name, kind) => out.types.push(RawType {
                name: name.clone(),
                kind: *kind,
                start_line,
                end_line,
                start_col,
                end_col: 0,
                start_byte,
                end_byte,
            }),
        }
    }

    // Call sites, on blanked lines only.
    for (idx, line) in code_lines.iter().enumerate() {
        let def_name = match classify_line(line) {
            Some(DefLine::Function(name)) => Some(name),
            _ => None,
        };
        for caps in call_re().captures_iter(line) {
            let callee = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            if CALL_KEYWORDS.contains(&callee) {
                continue;
            }
            // The definition's own name on its own line is not a call.
            let is_own_name = def_name
                .as_deref()
                .map(|d| d == callee || d.rsplit('.').next() == Some(callee))
                .unwrap_or(false);
            if is_own_name {
                continue;
            }
            out.calls.push(RawCall {
                callee: callee.to_string(),
                line: idx as u32 + 1,
                byte: line_starts[idx] + caps.get(1).map(|m| m.start()).unwrap_or(0),
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_across_flavors() {
        let src = "func Hello() {\n}\n\ndef greet():\n    pass\n\nconst add = (a, b) => a + b;\n\nclass Box {\n}\n";
        let out = extract(src);
        let names: Vec<&str> = out.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Hello", "greet", "add"]);
        assert_eq!(out.types.len(), 1);
        assert_eq!(out.types[0].name, "Box");
        assert_eq!(out.types[0].kind, TypeKind::Class);
    }

    #[test]
    fn go_style_methods_get_receiver_names() {
        let out = extract("func (c *CozoDB) Write(p []byte) error {\n\treturn nil\n}\n");
        assert_eq!(out.functions[0].name, "CozoDB.Write");
    }

    #[test]
    fn calls_inside_strings_and_comments_are_ignored() {
        let src = r#"func a() {
	b()
	// c() is commented out
	x := "d() inside a string"
	/* e()
	   still a comment */
	y := `f() in a template`
}
func b() {}
"#;
        let out = extract(src);
        let callees: Vec<&str> = out.calls.iter().map(|c| c.callee.as_str()).collect();
        assert_eq!(callees, vec!["b"]);
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        let src = "func a() {\n\tx := \"quote \\\" then g()\"\n\th()\n}\nfunc h() {}\n";
        let out = extract(src);
        let callees: Vec<&str> = out.calls.iter().map(|c| c.callee.as_str()).collect();
        assert_eq!(callees, vec!["h"]);
    }

    #[test]
    fn territory_runs_to_the_next_definition() {
        let src = "def one():\n    a = 1\n    b = 2\n\ndef two():\n    pass\n";
        let out = extract(src);
        assert_eq!(out.functions.len(), 2);
        assert_eq!((out.functions[0].start_line, out.functions[0].end_line), (1, 4));
        assert_eq!(out.functions[1].start_line, 5);
    }

    #[test]
    fn keywords_are_not_calls() {
        let src = "func a() {\n\tif (x) {\n\t\treturn (y)\n\t}\n\tfor (i) {}\n}\n";
        let out = extract(src);
        assert!(out.calls.is_empty(), "{:?}", out.calls);
    }

    #[test]
    fn definition_line_calls_still_count() {
        // b() appears on the same line as the definition of a.
        let out = extract("function a(){ b(); }\nfunction b(){}\n");
        let callees: Vec<&str> = out.calls.iter().map(|c| c.callee.as_str()).collect();
        assert_eq!(callees, vec!["b"]);
    }
}
