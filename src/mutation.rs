//! CozoScript emission.
//!
//! One script = one store transaction. Deletion statements always come
//! before upsert statements, and within each section relations are emitted
//! in dependency order, so edges are never left dangling mid-script:
//!
//! - deletions: calls → defines → defines_type → implements → fields →
//!   imports → function embedding/code/meta → type embedding/code/meta →
//!   files
//! - upserts: files → function meta/code/embedding → type meta/code/
//!   embedding → fields → defines → defines_type → calls → implements →
//!   imports
//!
//! Deletion is strictly by primary-key id; the store's `:rm` never sees a
//! composite key.

use std::fmt::Write as _;

use crate::manifest::ManifestEntry;
use crate::model::{FileFacts, FileRecord};

/// Escape a string as a CozoScript single-quoted literal. Backslash and
/// quote are escaped, NUL bytes are stripped, all other control characters
/// pass through untouched.
pub fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\0' => {}
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Fixed-notation float: CozoScript gets no scientific notation, and a
/// non-finite value degrades to `0` (the validator rejects those upstream;
/// this is the last resort).
pub fn fmt_f32(v: f32) -> String {
    if !v.is_finite() {
        return "0".to_string();
    }
    let mut s = format!("{:.8}", v);
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.push('0');
    }
    s
}

fn fmt_vec(values: &[f32]) -> String {
    let mut out = String::with_capacity(values.len() * 12 + 8);
    out.push_str("vec([");
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&fmt_f32(*v));
    }
    out.push_str("])");
    out
}

fn fmt_opt_u32(v: Option<u32>) -> String {
    match v {
        Some(n) => n.to_string(),
        None => "null".to_string(),
    }
}

fn fmt_opt_str(v: Option<&str>) -> String {
    match v {
        Some(s) => escape_str(s),
        None => "null".to_string(),
    }
}

/// Row accumulator for a single relation within one script section.
#[derive(Debug, Default, Clone)]
struct RelationRows {
    rows: Vec<String>,
}

impl RelationRows {
    fn push(&mut self, row: String) {
        self.rows.push(row);
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn emit(&self, out: &mut String, header: &str, op: &str, spec: &str) {
        if self.rows.is_empty() {
            return;
        }
        out.push_str("{\n?[");
        out.push_str(header);
        out.push_str("] <- [");
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push('\n');
            out.push_str(row);
        }
        out.push_str("]\n");
        let _ = writeln!(out, "{op} {spec}");
        out.push_str("}\n");
    }
}

// Deletion relations, in emission order.
const DEL_ORDER: &[(&str, &str)] = &[
    ("cie_calls", "{id}"),
    ("cie_defines", "{id}"),
    ("cie_defines_type", "{id}"),
    ("cie_implements", "{id}"),
    ("cie_field", "{id}"),
    ("cie_import", "{id}"),
    ("cie_function_embedding", "{id}"),
    ("cie_function_code", "{id}"),
    ("cie_function", "{id}"),
    ("cie_type_embedding", "{id}"),
    ("cie_type_code", "{id}"),
    ("cie_type", "{id}"),
    ("cie_file", "{id}"),
];

#[derive(Debug, Default)]
pub struct ScriptBuilder {
    deletions: Vec<RelationRows>,
    files: RelationRows,
    functions: RelationRows,
    function_code: RelationRows,
    function_embeddings: RelationRows,
    types: RelationRows,
    type_code: RelationRows,
    type_embeddings: RelationRows,
    fields: RelationRows,
    defines: RelationRows,
    defines_type: RelationRows,
    calls: RelationRows,
    implements: RelationRows,
    imports: RelationRows,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self {
            deletions: vec![RelationRows::default(); DEL_ORDER.len()],
            ..Self::default()
        }
    }

    /// Number of mutations (rows) accumulated so far.
    pub fn mutations(&self) -> usize {
        let del: usize = self.deletions.iter().map(RelationRows::len).sum();
        del + self.files.len()
            + self.functions.len()
            + self.function_code.len()
            + self.function_embeddings.len()
            + self.types.len()
            + self.type_code.len()
            + self.type_embeddings.len()
            + self.fields.len()
            + self.defines.len()
            + self.defines_type.len()
            + self.calls.len()
            + self.implements.len()
            + self.imports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations() == 0
    }

    fn del_rows(&mut self, relation: &str) -> &mut RelationRows {
        let idx = DEL_ORDER
            .iter()
            .position(|(name, _)| *name == relation)
            .unwrap_or_else(|| unreachable!("unknown deletion relation {relation}"));
        &mut self.deletions[idx]
    }

    fn del_ids(&mut self, relation: &'static str, ids: &[String]) {
        let rows = self.del_rows(relation);
        for id in ids {
            rows.push(format!("[{}]", escape_str(id)));
        }
    }

    /// Queue the removal of everything a file contributed, by primary key
    /// (edges first, then the entities they reference, then the file row).
    pub fn remove_file(&mut self, entry: &ManifestEntry) {
        let owned = &entry.entity_ids;
        self.del_ids("cie_calls", &owned.calls);
        self.del_ids("cie_defines", &owned.defines);
        self.del_ids("cie_defines_type", &owned.defines_type);
        self.del_ids("cie_implements", &owned.implements);
        self.del_ids("cie_field", &owned.fields);
        self.del_ids("cie_import", &owned.imports);
        // Function deletion cascades to its code & embedding side tables.
        self.del_ids("cie_function_embedding", &owned.functions);
        self.del_ids("cie_function_code", &owned.functions);
        self.del_ids("cie_function", &owned.functions);
        self.del_ids("cie_type_embedding", &owned.types);
        self.del_ids("cie_type_code", &owned.types);
        self.del_ids("cie_type", &owned.types);
        self.del_ids("cie_file", std::slice::from_ref(&entry.file_id));
    }

    /// Queue the upsert of a file row plus all facts extracted from it.
    pub fn put_file(&mut self, file: &FileRecord, facts: &FileFacts) {
        self.files.push(format!(
            "[{},{},{},{},{}]",
            escape_str(&file.id),
            escape_str(&file.path),
            escape_str(&file.hash),
            escape_str(&file.language),
            file.size_bytes,
        ));

        for f in &facts.functions {
            self.functions.push(format!(
                "[{},{},{},{},{},{},{},{}]",
                escape_str(&f.id),
                escape_str(&f.name),
                escape_str(&f.signature),
                escape_str(&f.file_path),
                f.start_line,
                f.end_line,
                f.start_col,
                f.end_col,
            ));
            self.function_code
                .push(format!("[{},{}]", escape_str(&f.id), escape_str(&f.code_text)));
            if let Some(embedding) = &f.embedding {
                self.function_embeddings
                    .push(format!("[{},{}]", escape_str(&f.id), fmt_vec(embedding)));
            }
        }

        for t in &facts.types {
            self.types.push(format!(
                "[{},{},{},{},{},{},{},{}]",
                escape_str(&t.id),
                escape_str(&t.name),
                escape_str(t.kind.as_str()),
                escape_str(&t.file_path),
                t.start_line,
                t.end_line,
                t.start_col,
                t.end_col,
            ));
            self.type_code
                .push(format!("[{},{}]", escape_str(&t.id), escape_str(&t.code_text)));
            if let Some(embedding) = &t.embedding {
                self.type_embeddings
                    .push(format!("[{},{}]", escape_str(&t.id), fmt_vec(embedding)));
            }
        }

        for fld in &facts.fields {
            self.fields.push(format!(
                "[{},{},{},{},{},{}]",
                escape_str(&fld.id),
                escape_str(&fld.struct_name),
                escape_str(&fld.field_name),
                escape_str(&fld.field_type),
                escape_str(&fld.file_path),
                fld.line,
            ));
        }

        for d in &facts.defines {
            self.defines.push(format!(
                "[{},{},{}]",
                escape_str(&d.id),
                escape_str(&d.file_id),
                escape_str(&d.function_id),
            ));
        }

        for d in &facts.defines_type {
            self.defines_type.push(format!(
                "[{},{},{}]",
                escape_str(&d.id),
                escape_str(&d.file_id),
                escape_str(&d.type_id),
            ));
        }

        for c in &facts.calls {
            self.calls.push(format!(
                "[{},{},{},{}]",
                escape_str(&c.id),
                escape_str(&c.caller_id),
                escape_str(&c.callee_id),
                fmt_opt_u32(c.call_line),
            ));
        }

        for imp in &facts.implements {
            self.implements.push(format!(
                "[{},{},{},{}]",
                escape_str(&imp.id),
                escape_str(&imp.type_name),
                escape_str(&imp.interface_name),
                escape_str(&imp.file_path),
            ));
        }

        for im in &facts.imports {
            self.imports.push(format!(
                "[{},{},{},{},{}]",
                escape_str(&im.id),
                escape_str(&im.file_path),
                escape_str(&im.import_path),
                fmt_opt_str(im.alias.as_deref()),
                im.start_line,
            ));
        }
    }

    /// Render the script: deletions first, upserts second, every statement
    /// brace-wrapped so the store executes the whole text atomically.
    pub fn build(self) -> String {
        let mut out = String::new();

        for (rows, (relation, keyspec)) in self.deletions.iter().zip(DEL_ORDER) {
            rows.emit(&mut out, "id", &format!(":rm {relation}"), keyspec);
        }

        self.files.emit(
            &mut out,
            "id, path, hash, language, size_bytes",
            ":put cie_file",
            "{id => path, hash, language, size_bytes}",
        );
        self.functions.emit(
            &mut out,
            "id, name, signature, file_path, start_line, end_line, start_col, end_col",
            ":put cie_function",
            "{id => name, signature, file_path, start_line, end_line, start_col, end_col}",
        );
        self.function_code.emit(
            &mut out,
            "id, code_text",
            ":put cie_function_code",
            "{id => code_text}",
        );
        self.function_embeddings.emit(
            &mut out,
            "id, embedding",
            ":put cie_function_embedding",
            "{id => embedding}",
        );
        self.types.emit(
            &mut out,
            "id, name, kind, file_path, start_line, end_line, start_col, end_col",
            ":put cie_type",
            "{id => name, kind, file_path, start_line, end_line, start_col, end_col}",
        );
        self.type_code.emit(
            &mut out,
            "id, code_text",
            ":put cie_type_code",
            "{id => code_text}",
        );
        self.type_embeddings.emit(
            &mut out,
            "id, embedding",
            ":put cie_type_embedding",
            "{id => embedding}",
        );
        self.fields.emit(
            &mut out,
            "id, struct_name, field_name, field_type, file_path, line",
            ":put cie_field",
            "{id => struct_name, field_name, field_type, file_path, line}",
        );
        self.defines.emit(
            &mut out,
            "id, file_id, function_id",
            ":put cie_defines",
            "{id => file_id, function_id}",
        );
        self.defines_type.emit(
            &mut out,
            "id, file_id, type_id",
            ":put cie_defines_type",
            "{id => file_id, type_id}",
        );
        self.calls.emit(
            &mut out,
            "id, caller_id, callee_id, call_line",
            ":put cie_calls",
            "{id => caller_id, callee_id, call_line}",
        );
        self.implements.emit(
            &mut out,
            "id, type_name, interface_name, file_path",
            ":put cie_implements",
            "{id => type_name, interface_name, file_path}",
        );
        self.imports.emit(
            &mut out,
            "id, file_path, import_path, alias, start_line",
            ":put cie_import",
            "{id => file_path, import_path, alias, start_line}",
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::OwnedIds;
    use crate::model::{CallEdge, DefinesEdge, FunctionEntity};

    fn func(id: &str) -> FunctionEntity {
        FunctionEntity {
            id: id.into(),
            name: "f".into(),
            signature: "func f() {".into(),
            file_path: "a.go".into(),
            code_text: "func f() {}".into(),
            start_line: 1,
            end_line: 1,
            start_col: 0,
            end_col: 11,
            embedding: Some(vec![0.5, -0.25]),
        }
    }

    #[test]
    fn escaping_quotes_and_backslashes() {
        assert_eq!(escape_str("it's"), r"'it\'s'");
        assert_eq!(escape_str(r"a\b"), r"'a\\b'");
        assert_eq!(escape_str("nul\0byte"), "'nulbyte'");
        // Other control characters pass through.
        assert_eq!(escape_str("a\nb"), "'a\nb'");
    }

    #[test]
    fn floats_never_use_scientific_notation() {
        assert_eq!(fmt_f32(0.5), "0.5");
        assert_eq!(fmt_f32(-0.25), "-0.25");
        assert_eq!(fmt_f32(0.000_000_1), "0.0000001");
        assert_eq!(fmt_f32(1.0), "1.0");
        assert_eq!(fmt_f32(f32::NAN), "0");
        assert_eq!(fmt_f32(f32::INFINITY), "0");
        assert!(!fmt_f32(1e20).contains('e'));
    }

    #[test]
    fn deletions_precede_upserts_and_follow_relation_order() {
        let mut b = ScriptBuilder::new();

        let entry = ManifestEntry {
            hash: "h".into(),
            file_id: "FID".into(),
            entity_ids: OwnedIds {
                functions: vec!["FX".into()],
                calls: vec!["call:FX|FY".into()],
                defines: vec!["def:FID|FX".into()],
                ..OwnedIds::default()
            },
        };
        b.remove_file(&entry);

        let file = FileRecord {
            id: "FID".into(),
            path: "a.go".into(),
            hash: "h2".into(),
            language: "go".into(),
            size_bytes: 10,
        };
        let facts = FileFacts {
            functions: vec![func("FX2")],
            defines: vec![DefinesEdge {
                id: "def:FID|FX2".into(),
                file_id: "FID".into(),
                function_id: "FX2".into(),
            }],
            ..FileFacts::default()
        };
        b.put_file(&file, &facts);

        let script = b.build();

        let pos = |needle: &str| script.find(needle).unwrap_or_else(|| panic!("missing {needle}"));

        // Every :rm of a function is preceded by the :rm of its call and
        // defines edges, and all :rm precede all :put.
        assert!(pos(":rm cie_calls") < pos(":rm cie_defines"));
        assert!(pos(":rm cie_defines") < pos(":rm cie_function"));
        assert!(pos(":rm cie_function") < pos(":rm cie_file"));
        assert!(pos(":rm cie_file") < pos(":put cie_file"));
        assert!(pos(":put cie_file") < pos(":put cie_function"));
        assert!(pos(":put cie_function") < pos(":put cie_defines"));
    }

    #[test]
    fn function_rows_split_across_three_relations() {
        let mut b = ScriptBuilder::new();
        let file = FileRecord {
            id: "F".into(),
            path: "a.go".into(),
            hash: "h".into(),
            language: "go".into(),
            size_bytes: 1,
        };
        let facts = FileFacts {
            functions: vec![func("X")],
            ..FileFacts::default()
        };
        b.put_file(&file, &facts);
        // file + fn meta + fn code + fn embedding
        assert_eq!(b.mutations(), 4);

        let script = b.build();
        assert!(script.contains(":put cie_function_code"));
        assert!(script.contains(":put cie_function_embedding"));
        assert!(script.contains("vec([0.5,-0.25])"));
    }

    #[test]
    fn missing_embedding_is_simply_omitted() {
        let mut b = ScriptBuilder::new();
        let file = FileRecord {
            id: "F".into(),
            path: "a.go".into(),
            hash: "h".into(),
            language: "go".into(),
            size_bytes: 1,
        };
        let mut f = func("X");
        f.embedding = None;
        let facts = FileFacts {
            functions: vec![f],
            ..FileFacts::default()
        };
        b.put_file(&file, &facts);
        let script = b.build();
        assert!(!script.contains("cie_function_embedding"));
    }

    #[test]
    fn null_call_line_serializes_as_null() {
        let mut b = ScriptBuilder::new();
        let file = FileRecord {
            id: "F".into(),
            path: "a.go".into(),
            hash: "h".into(),
            language: "go".into(),
            size_bytes: 1,
        };
        let facts = FileFacts {
            calls: vec![CallEdge {
                id: "call:A|B".into(),
                caller_id: "A".into(),
                callee_id: "B".into(),
                call_line: None,
            }],
            ..FileFacts::default()
        };
        b.put_file(&file, &facts);
        assert!(b.build().contains(",null]"));
    }
}
