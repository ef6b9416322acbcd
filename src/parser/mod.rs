//! Parser dispatch: route `(content, language)` to a grammar-driven
//! extractor or the heuristic fallback, then turn the raw extraction into
//! fully-identified entities and edges.
//!
//! Grammar parse errors never abort a file — partial results are emitted
//! and the error is counted. Call edges resolve against the file-local
//! function table only; unmatched callees are dropped.

pub mod grammar;
mod go;
pub mod heuristic;
pub mod implements;
mod python;
mod rust_lang;
mod typescript;

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::config::ParserMode;
use crate::ids;
use crate::language::Language;
use crate::model::{
    truncate_code_text, CallEdge, FieldEntity, FileFacts, FunctionEntity, ImportEntity, TypeEntity,
    TypeKind, CODE_TEXT_MAX_BYTES,
};

/// Kind of synthetic name an anonymous function receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AnonKind {
    Arrow,
    Anon,
}

/// A function-like construct as the extractors see it: spans and a name,
/// before ids and code text exist. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone)]
pub(crate) struct RawFunction {
    pub name: String,
    pub anon: Option<AnonKind>,
    pub start_line: u32,
    pub end_line: u32,
    pub start_col: u32,
    pub end_col: u32,
    pub start_byte: usize,
    pub end_byte: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct RawType {
    pub name: String,
    pub kind: TypeKind,
    pub start_line: u32,
    pub end_line: u32,
    pub start_col: u32,
    pub end_col: u32,
    pub start_byte: usize,
    pub end_byte: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct RawField {
    pub struct_name: String,
    pub field_name: String,
    pub field_type: String,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct RawImport {
    pub import_path: String,
    pub alias: Option<String>,
    pub line: u32,
}

/// A call site: the callee identifier as written, plus where it happened.
#[derive(Debug, Clone)]
pub(crate) struct RawCall {
    pub callee: String,
    pub line: u32,
    pub byte: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RawExtraction {
    pub functions: Vec<RawFunction>,
    pub types: Vec<RawType>,
    pub fields: Vec<RawField>,
    pub imports: Vec<RawImport>,
    pub calls: Vec<RawCall>,
    pub parse_errors: u32,
}

#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub facts: FileFacts,
    pub parse_errors: u32,
    pub truncated: u32,
    pub used_heuristic: bool,
}

/// Inspect the first few non-empty lines; a single line over 2 000 chars
/// means minified or machine-generated output, which is routed straight to
/// the heuristic extractor instead of tree-sitter.
fn is_minified_or_generated(source: &str) -> bool {
    const MAX_SAFE_LINE_CHARS: usize = 2_000;
    source
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(5)
        .any(|l| l.len() > MAX_SAFE_LINE_CHARS)
}

fn grammar_extract(rel_path: &str, content: &str, language: Language) -> Option<RawExtraction> {
    match language {
        Language::Go => go::extract(content),
        Language::JavaScript | Language::TypeScript => {
            let tsx = rel_path.ends_with(".tsx") || rel_path.ends_with(".jsx");
            typescript::extract(content, tsx)
        }
        Language::Python => python::extract(content),
        Language::Rust => rust_lang::extract(content),
        _ => None,
    }
}

/// Extract all facts from one file. This is the parse worker's unit of work.
pub fn extract_file(
    rel_path: &str,
    content: &str,
    language: Language,
    mode: ParserMode,
) -> ParseOutcome {
    let mut parse_errors = 0u32;

    let (raw, used_heuristic) = match mode {
        ParserMode::Heuristic => (heuristic::extract(content), true),
        ParserMode::Grammar | ParserMode::Auto => {
            let grammar_ok = language.has_grammar() && !is_minified_or_generated(content);
            if grammar_ok {
                match grammar_extract(rel_path, content, language) {
                    Some(raw) => (raw, false),
                    None => {
                        // Unrecoverable grammar failure: fall back, but
                        // remember the file produced a parse error.
                        debug!(path = rel_path, "grammar extraction failed, using heuristic");
                        parse_errors += 1;
                        (heuristic::extract(content), true)
                    }
                }
            } else if mode == ParserMode::Grammar {
                // Grammar-only mode skips files it cannot parse properly.
                return ParseOutcome::default();
            } else {
                (heuristic::extract(content), true)
            }
        }
    };
    parse_errors += raw.parse_errors;

    let mut outcome = assemble(rel_path, content, raw);
    outcome.parse_errors += parse_errors;
    outcome.used_heuristic = used_heuristic;
    outcome
}

/// Turn a raw extraction into identified entities: synthetic names, code
/// text with truncation, ids, call resolution, defines edges.
fn assemble(rel_path: &str, content: &str, mut raw: RawExtraction) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let file_id = ids::file_id(rel_path);

    // Anonymous functions nested inside an already-captured function are
    // noise (their text is part of the enclosing body); only free-standing
    // ones earn a synthetic name.
    let named_ranges: Vec<(usize, usize)> = raw
        .functions
        .iter()
        .filter(|f| f.anon.is_none())
        .map(|f| (f.start_byte, f.end_byte))
        .collect();
    raw.functions.retain(|f| {
        f.anon.is_none()
            || !named_ranges
                .iter()
                .any(|(s, e)| *s < f.start_byte && f.end_byte <= *e)
    });

    let mut arrow_n = 0u32;
    let mut anon_n = 0u32;
    let mut seen_fn_ids: HashSet<String> = HashSet::new();

    let mut spans: Vec<(usize, usize)> = Vec::new(); // function byte ranges, index-aligned

    for f in &raw.functions {
        let name = match f.anon {
            None => f.name.clone(),
            Some(AnonKind::Arrow) => {
                arrow_n += 1;
                format!("$arrow_{arrow_n}")
            }
            Some(AnonKind::Anon) => {
                anon_n += 1;
                format!("$anon_{anon_n}")
            }
        };

        let body = slice(content, f.start_byte, f.end_byte);
        let signature = first_line(body);
        let (code_text, truncated) = truncate_code_text(body, CODE_TEXT_MAX_BYTES);
        if truncated {
            outcome.truncated += 1;
        }

        let id = ids::function_id(
            rel_path,
            &name,
            &signature,
            f.start_line,
            f.end_line,
            f.start_col,
            f.end_col,
        );
        if !seen_fn_ids.insert(id.clone()) {
            continue;
        }

        spans.push((f.start_byte, f.end_byte));
        outcome.facts.functions.push(FunctionEntity {
            id,
            name,
            signature,
            file_path: rel_path.to_string(),
            code_text,
            start_line: f.start_line,
            end_line: f.end_line,
            start_col: f.start_col,
            end_col: f.end_col,
            embedding: None,
        });
    }

    let mut seen_ty_ids: HashSet<String> = HashSet::new();
    for t in &raw.types {
        let body = slice(content, t.start_byte, t.end_byte);
        let (code_text, truncated) = truncate_code_text(body, CODE_TEXT_MAX_BYTES);
        if truncated {
            outcome.truncated += 1;
        }
        let id = ids::type_id(rel_path, &t.name, t.start_line, t.end_line);
        if !seen_ty_ids.insert(id.clone()) {
            continue;
        }
        outcome.facts.types.push(TypeEntity {
            id,
            name: t.name.clone(),
            kind: t.kind,
            file_path: rel_path.to_string(),
            code_text,
            start_line: t.start_line,
            end_line: t.end_line,
            start_col: t.start_col,
            end_col: t.end_col,
            embedding: None,
        });
    }

    let mut seen_field_ids: HashSet<String> = HashSet::new();
    for fld in &raw.fields {
        let id = ids::field_id(rel_path, &fld.struct_name, &fld.field_name);
        if !seen_field_ids.insert(id.clone()) {
            continue;
        }
        outcome.facts.fields.push(FieldEntity {
            id,
            struct_name: fld.struct_name.clone(),
            field_name: fld.field_name.clone(),
            field_type: fld.field_type.clone(),
            file_path: rel_path.to_string(),
            line: fld.line,
        });
    }

    let mut seen_import_ids: HashSet<String> = HashSet::new();
    for im in &raw.imports {
        let id = ids::import_id(rel_path, &im.import_path, im.line);
        if !seen_import_ids.insert(id.clone()) {
            continue;
        }
        outcome.facts.imports.push(ImportEntity {
            id,
            file_path: rel_path.to_string(),
            import_path: im.import_path.clone(),
            alias: im.alias.clone(),
            start_line: im.line,
        });
    }

    resolve_calls(&mut outcome.facts, &raw.calls, &spans);

    // Defines edges: one per function/type, linking back to the file.
    for f in &outcome.facts.functions {
        outcome.facts.defines.push(crate::model::DefinesEdge {
            id: ids::defines_id(&file_id, &f.id),
            file_id: file_id.clone(),
            function_id: f.id.clone(),
        });
    }
    for t in &outcome.facts.types {
        outcome.facts.defines_type.push(crate::model::DefinesTypeEdge {
            id: ids::defines_type_id(&file_id, &t.id),
            file_id: file_id.clone(),
            type_id: t.id.clone(),
        });
    }

    outcome
}

/// Resolve call sites against the file-local function table.
///
/// The caller is the innermost function whose byte range contains the call
/// site. The callee identifier must match a local function name exactly —
/// or, for a bare method name, match exactly one `Type.method` entry.
/// Self-edges and unresolved callees are dropped.
fn resolve_calls(facts: &mut FileFacts, calls: &[RawCall], spans: &[(usize, usize)]) {
    let mut by_name: HashMap<&str, &str> = HashMap::new();
    let mut by_method: HashMap<&str, Vec<&str>> = HashMap::new();
    for f in &facts.functions {
        by_name.insert(f.name.as_str(), f.id.as_str());
        if let Some((_, method)) = f.name.rsplit_once('.') {
            by_method.entry(method).or_default().push(f.id.as_str());
        }
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut edges = Vec::new();

    for call in calls {
        let callee_id = match by_name.get(call.callee.as_str()) {
            Some(id) => *id,
            None => match by_method.get(call.callee.as_str()) {
                Some(ids) if ids.len() == 1 => ids[0],
                _ => continue,
            },
        };

        // Innermost enclosing function span wins.
        let caller_id = facts
            .functions
            .iter()
            .zip(spans)
            .filter(|(_, (start, end))| *start <= call.byte && call.byte < *end)
            .min_by_key(|(_, (start, end))| end - start)
            .map(|(f, _)| f.id.as_str());

        let Some(caller_id) = caller_id else {
            continue; // top-level call, no caller entity
        };
        if caller_id == callee_id {
            continue; // self edges are filtered
        }

        let id = ids::call_id(caller_id, callee_id);
        if !seen.insert(id.clone()) {
            continue;
        }
        edges.push(CallEdge {
            id,
            caller_id: caller_id.to_string(),
            callee_id: callee_id.to_string(),
            call_line: Some(call.line),
        });
    }

    facts.calls = edges;
}

fn slice(content: &str, start: usize, end: usize) -> &str {
    let end = end.min(content.len());
    let start = start.min(end);
    // Clamp to char boundaries so a bad span can never panic.
    let mut s = start;
    while s > 0 && !content.is_char_boundary(s) {
        s -= 1;
    }
    let mut e = end;
    while e > 0 && !content.is_char_boundary(e) {
        e -= 1;
    }
    &content[s..e.max(s)]
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or("").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, content: &str) -> ParseOutcome {
        let language = Language::detect(std::path::Path::new(path), content);
        extract_file(path, content, language, ParserMode::Auto)
    }

    #[test]
    fn single_js_arrow_function() {
        let out = parse("src/a.js", "const add = (a, b) => a + b;\n");
        assert_eq!(out.facts.functions.len(), 1);
        let f = &out.facts.functions[0];
        assert_eq!(f.name, "add");
        assert!(f.signature.starts_with("const add = "), "{}", f.signature);
        assert_eq!((f.start_line, f.end_line), (1, 1));
        assert_eq!(out.facts.defines.len(), 1);
        assert_eq!(out.facts.defines[0].function_id, f.id);
        assert!(out.facts.calls.is_empty());
        assert_eq!(out.parse_errors, 0);
    }

    #[test]
    fn same_file_call_resolves_one_edge() {
        let out = parse("src/a.js", "function a(){ b(); }\nfunction b(){}\n");
        assert_eq!(out.facts.functions.len(), 2);
        assert_eq!(out.facts.calls.len(), 1);
        let call = &out.facts.calls[0];
        let a = out.facts.functions.iter().find(|f| f.name == "a").unwrap();
        let b = out.facts.functions.iter().find(|f| f.name == "b").unwrap();
        assert_eq!(call.caller_id, a.id);
        assert_eq!(call.callee_id, b.id);
    }

    #[test]
    fn recursive_calls_are_filtered() {
        let out = parse("src/a.js", "function a(){ a(); }\n");
        assert!(out.facts.calls.is_empty());
    }

    #[test]
    fn unresolved_callees_are_dropped() {
        let out = parse("src/a.js", "function a(){ console.log('x'); fetch('/y'); }\n");
        assert!(out.facts.calls.is_empty());
    }

    #[test]
    fn oversized_bodies_are_truncated_and_counted() {
        let body = format!("function big() {{\n// {}\n}}\n", "x".repeat(2 * CODE_TEXT_MAX_BYTES));
        let out = parse("src/a.js", &body);
        assert_eq!(out.truncated, 1);
        let f = &out.facts.functions[0];
        assert!(f.code_text.len() <= CODE_TEXT_MAX_BYTES);
        assert_eq!(f.name, "big");
    }

    #[test]
    fn minified_input_routes_to_heuristic() {
        let minified = format!("var a=1;{}\n", "b();".repeat(1000));
        let out = parse("src/bundle.js", &minified);
        assert!(out.used_heuristic);
    }

    #[test]
    fn grammar_mode_skips_unsupported_languages() {
        let out = extract_file(
            "tool.rb",
            "def hello\nend\n",
            Language::Ruby,
            ParserMode::Grammar,
        );
        assert!(out.facts.functions.is_empty());
    }

    #[test]
    fn heuristic_mode_applies_to_everything() {
        let out = extract_file(
            "src/a.go",
            "func Hello() {\n}\n",
            Language::Go,
            ParserMode::Heuristic,
        );
        assert!(out.used_heuristic);
        assert_eq!(out.facts.functions.len(), 1);
        assert_eq!(out.facts.functions[0].name, "Hello");
    }

    #[test]
    fn ids_are_stable_across_reparses() {
        let content = "function a(){ b(); }\nfunction b(){}\n";
        let one = parse("src/a.js", content);
        let two = parse("src/a.js", content);
        let ids_one: Vec<&str> = one.facts.functions.iter().map(|f| f.id.as_str()).collect();
        let ids_two: Vec<&str> = two.facts.functions.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids_one, ids_two);
    }
}
