//! Structural and numeric validation of parsed batches, run after
//! extraction and embedding, before anything reaches the mutation builder.
//! A non-empty issue list fails the batch; the orchestrator aborts and the
//! last good checkpoint stands.

use std::collections::HashSet;

use serde::Serialize;

use crate::model::{FileFacts, FileRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub entity_type: String,
    pub entity_id: String,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} [{}]: {}",
            self.entity_type, self.entity_id, self.field, self.message
        )
    }
}

fn issue(entity_type: &str, entity_id: &str, field: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        field: field.to_string(),
        message: message.into(),
    }
}

/// Carries the one piece of cross-batch state: the embedding dimension
/// fixed by the first non-empty vector of the run.
#[derive(Debug, Default)]
pub struct Validator {
    expected_dim: Option<usize>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_embedding(
        &mut self,
        entity_type: &str,
        id: &str,
        embedding: Option<&Vec<f32>>,
        out: &mut Vec<ValidationIssue>,
    ) {
        let Some(vector) = embedding else {
            return; // absence is valid
        };
        if vector.iter().any(|v| !v.is_finite()) {
            out.push(issue(entity_type, id, "embedding", "contains NaN or infinite values"));
            return;
        }
        match self.expected_dim {
            None => {
                if !vector.is_empty() {
                    self.expected_dim = Some(vector.len());
                }
            }
            Some(expected) if vector.len() != expected => {
                out.push(issue(
                    entity_type,
                    id,
                    "embedding",
                    format!("dimension {} differs from the run's dimension {}", vector.len(), expected),
                ));
            }
            Some(_) => {}
        }
    }

    fn check_span(
        entity_type: &str,
        id: &str,
        start_line: u32,
        end_line: u32,
        out: &mut Vec<ValidationIssue>,
    ) {
        if start_line < 1 {
            out.push(issue(entity_type, id, "start_line", "must be ≥ 1"));
        }
        if end_line < start_line {
            out.push(issue(
                entity_type,
                id,
                "end_line",
                format!("end_line {} precedes start_line {}", end_line, start_line),
            ));
        }
    }

    /// Validate one file's facts. Issues are appended in deterministic
    /// (declaration) order.
    pub fn validate_file(&mut self, file: &FileRecord, facts: &FileFacts) -> Vec<ValidationIssue> {
        let mut out = Vec::new();

        if file.id.is_empty() {
            out.push(issue("file", &file.path, "id", "empty id"));
        }
        if file.path.is_empty() {
            out.push(issue("file", &file.id, "path", "empty path"));
        }

        let function_ids: HashSet<&str> = facts.functions.iter().map(|f| f.id.as_str()).collect();
        let type_ids: HashSet<&str> = facts.types.iter().map(|t| t.id.as_str()).collect();
        let defined_fns: HashSet<&str> = facts.defines.iter().map(|d| d.function_id.as_str()).collect();
        let defined_tys: HashSet<&str> = facts.defines_type.iter().map(|d| d.type_id.as_str()).collect();

        for f in &facts.functions {
            if f.id.is_empty() {
                out.push(issue("function", &f.name, "id", "empty id"));
            }
            if f.file_path.is_empty() {
                out.push(issue("function", &f.id, "file_path", "empty path"));
            }
            Self::check_span("function", &f.id, f.start_line, f.end_line, &mut out);
            self.check_embedding("function", &f.id, f.embedding.as_ref(), &mut out);
            if !defined_fns.contains(f.id.as_str()) {
                out.push(issue("function", &f.id, "defines", "no defines edge links this function to its file"));
            }
        }

        for t in &facts.types {
            if t.id.is_empty() {
                out.push(issue("type", &t.name, "id", "empty id"));
            }
            if t.file_path.is_empty() {
                out.push(issue("type", &t.id, "file_path", "empty path"));
            }
            Self::check_span("type", &t.id, t.start_line, t.end_line, &mut out);
            self.check_embedding("type", &t.id, t.embedding.as_ref(), &mut out);
            if !defined_tys.contains(t.id.as_str()) {
                out.push(issue("type", &t.id, "defines_type", "no defines_type edge links this type to its file"));
            }
        }

        for d in &facts.defines {
            if d.file_id != file.id {
                out.push(issue("defines", &d.id, "file_id", "edge does not belong to this file"));
            }
            if !function_ids.contains(d.function_id.as_str()) {
                out.push(issue("defines", &d.id, "function_id", "references a function not in this pass"));
            }
        }

        for d in &facts.defines_type {
            if d.file_id != file.id {
                out.push(issue("defines_type", &d.id, "file_id", "edge does not belong to this file"));
            }
            if !type_ids.contains(d.type_id.as_str()) {
                out.push(issue("defines_type", &d.id, "type_id", "references a type not in this pass"));
            }
        }

        for c in &facts.calls {
            if c.caller_id == c.callee_id {
                out.push(issue("calls", &c.id, "callee_id", "self edge"));
                continue;
            }
            if !function_ids.contains(c.caller_id.as_str()) {
                out.push(issue("calls", &c.id, "caller_id", "references a function not in this pass"));
            }
            if !function_ids.contains(c.callee_id.as_str()) {
                out.push(issue("calls", &c.id, "callee_id", "references a function not in this pass"));
            }
        }

        for fld in &facts.fields {
            if fld.id.is_empty() {
                out.push(issue("field", &fld.field_name, "id", "empty id"));
            }
        }

        for imp in &facts.implements {
            if imp.type_name == imp.interface_name {
                out.push(issue("implements", &imp.id, "interface_name", "type implements itself"));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CallEdge, DefinesEdge, FunctionEntity};

    fn file() -> FileRecord {
        FileRecord {
            id: "FID".into(),
            path: "a.go".into(),
            hash: "h".into(),
            language: "go".into(),
            size_bytes: 1,
        }
    }

    fn func(id: &str, embedding: Option<Vec<f32>>) -> FunctionEntity {
        FunctionEntity {
            id: id.into(),
            name: "f".into(),
            signature: "func f() {".into(),
            file_path: "a.go".into(),
            code_text: "func f() {}".into(),
            start_line: 1,
            end_line: 2,
            start_col: 0,
            end_col: 1,
            embedding,
        }
    }

    fn defines(fid: &str) -> DefinesEdge {
        DefinesEdge {
            id: format!("def:FID|{fid}"),
            file_id: "FID".into(),
            function_id: fid.into(),
        }
    }

    fn facts_with(functions: Vec<FunctionEntity>) -> FileFacts {
        let defines = functions.iter().map(|f| defines(&f.id)).collect();
        FileFacts {
            functions,
            defines,
            ..FileFacts::default()
        }
    }

    #[test]
    fn clean_facts_pass() {
        let mut v = Validator::new();
        let issues = v.validate_file(&file(), &facts_with(vec![func("F1", Some(vec![0.1, 0.2]))]));
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn dimension_mismatch_is_flagged_on_the_embedding_field() {
        let mut v = Validator::new();
        let first = facts_with(vec![func("F1", Some(vec![0.1, 0.2, 0.3]))]);
        assert!(v.validate_file(&file(), &first).is_empty());

        let second = facts_with(vec![func("F2", Some(vec![0.1]))]);
        let issues = v.validate_file(&file(), &second);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "embedding");
        assert_eq!(issues[0].entity_id, "F2");
    }

    #[test]
    fn nan_embeddings_are_rejected() {
        let mut v = Validator::new();
        let issues = v.validate_file(&file(), &facts_with(vec![func("F1", Some(vec![f32::NAN]))]));
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("NaN"));
    }

    #[test]
    fn absent_embedding_is_valid() {
        let mut v = Validator::new();
        assert!(v.validate_file(&file(), &facts_with(vec![func("F1", None)])).is_empty());
    }

    #[test]
    fn inverted_line_spans_are_rejected() {
        let mut v = Validator::new();
        let mut f = func("F1", None);
        f.start_line = 5;
        f.end_line = 3;
        let issues = v.validate_file(&file(), &facts_with(vec![f]));
        assert!(issues.iter().any(|i| i.field == "end_line"));
    }

    #[test]
    fn missing_defines_edge_is_an_invariant_violation() {
        let mut v = Validator::new();
        let facts = FileFacts {
            functions: vec![func("F1", None)],
            ..FileFacts::default()
        };
        let issues = v.validate_file(&file(), &facts);
        assert!(issues.iter().any(|i| i.field == "defines"));
    }

    #[test]
    fn self_calls_and_dangling_calls_are_rejected() {
        let mut v = Validator::new();
        let mut facts = facts_with(vec![func("F1", None)]);
        facts.calls = vec![
            CallEdge {
                id: "call:F1|F1".into(),
                caller_id: "F1".into(),
                callee_id: "F1".into(),
                call_line: Some(1),
            },
            CallEdge {
                id: "call:F1|GHOST".into(),
                caller_id: "F1".into(),
                callee_id: "GHOST".into(),
                call_line: Some(2),
            },
        ];
        let issues = v.validate_file(&file(), &facts);
        assert!(issues.iter().any(|i| i.message == "self edge"));
        assert!(issues.iter().any(|i| i.message.contains("not in this pass")));
    }
}
