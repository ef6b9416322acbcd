//! Entity and edge records plus run-level observability types.
//!
//! Entities are plain owned records keyed by deterministic ids; object
//! graphs (file ↔ function ↔ call) are never materialized as pointers —
//! traversal happens through the store's relational queries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Byte cap applied to every persisted code body. Bodies above the cap are
/// truncated on a char boundary and counted in `code_text_truncated`.
pub const CODE_TEXT_MAX_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub id: String,
    pub path: String,
    pub hash: String,
    pub language: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionEntity {
    pub id: String,
    /// Bare name, or `Type.Method` for method-like constructs, or a
    /// synthetic `$arrow_<n>` / `$anon_<n>` for anonymous functions.
    pub name: String,
    /// First source line of the declaration, trimmed.
    pub signature: String,
    pub file_path: String,
    pub code_text: String,
    pub start_line: u32,
    pub end_line: u32,
    pub start_col: u32,
    pub end_col: u32,
    /// Absent when the provider failed for this entity; absence is valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Struct,
    Interface,
    Class,
    TypeAlias,
    Enum,
}

impl TypeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeKind::Struct => "struct",
            TypeKind::Interface => "interface",
            TypeKind::Class => "class",
            TypeKind::TypeAlias => "type_alias",
            TypeKind::Enum => "enum",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeEntity {
    pub id: String,
    pub name: String,
    pub kind: TypeKind,
    pub file_path: String,
    pub code_text: String,
    pub start_line: u32,
    pub end_line: u32,
    pub start_col: u32,
    pub end_col: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldEntity {
    pub id: String,
    pub struct_name: String,
    pub field_name: String,
    pub field_type: String,
    pub file_path: String,
    pub line: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportEntity {
    pub id: String,
    pub file_path: String,
    pub import_path: String,
    pub alias: Option<String>,
    pub start_line: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallEdge {
    pub id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub call_line: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DefinesEdge {
    pub id: String,
    pub file_id: String,
    pub function_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DefinesTypeEdge {
    pub id: String,
    pub file_id: String,
    pub type_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImplementsEdge {
    pub id: String,
    pub type_name: String,
    pub interface_name: String,
    pub file_path: String,
}

/// Everything extracted from one file in one pass.
#[derive(Debug, Clone, Default)]
pub struct FileFacts {
    pub functions: Vec<FunctionEntity>,
    pub types: Vec<TypeEntity>,
    pub fields: Vec<FieldEntity>,
    pub imports: Vec<ImportEntity>,
    pub calls: Vec<CallEdge>,
    pub defines: Vec<DefinesEdge>,
    pub defines_type: Vec<DefinesTypeEdge>,
    pub implements: Vec<ImplementsEdge>,
}

impl FileFacts {
    pub fn entity_count(&self) -> usize {
        self.functions.len()
            + self.types.len()
            + self.fields.len()
            + self.imports.len()
            + self.calls.len()
            + self.defines.len()
            + self.defines_type.len()
            + self.implements.len()
    }

    /// Mutation count of upserting these facts plus their file row: one row
    /// per entity/edge, with the function/type code and embedding side
    /// tables counted separately (embedding rows only when present).
    pub fn upsert_count(&self) -> usize {
        let fn_embeddings = self.functions.iter().filter(|f| f.embedding.is_some()).count();
        let ty_embeddings = self.types.iter().filter(|t| t.embedding.is_some()).count();
        1 + self.entity_count() + self.functions.len() + fn_embeddings + self.types.len() + ty_embeddings
    }
}

/// Cap `text` at `max_bytes`, cutting back to a char boundary. Returns the
/// (possibly shortened) text and whether truncation happened.
pub fn truncate_code_text(text: &str, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text.to_string(), false);
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

// ---------------------------------------------------------------------------
// Observability
// ---------------------------------------------------------------------------

/// Shared run counters. Workers only touch atomics; nothing here requires a
/// lock.
#[derive(Debug, Default)]
pub struct RunCounters {
    pub parse_errors: AtomicU64,
    pub embedding_errors: AtomicU64,
    pub code_text_truncated: AtomicU64,
}

impl RunCounters {
    pub fn bump_parse_errors(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump_embedding_errors(&self) {
        self.embedding_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump_truncated(&self) {
        self.code_text_truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            embedding_errors: self.embedding_errors.load(Ordering::Relaxed),
            code_text_truncated: self.code_text_truncated.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CounterSnapshot {
    pub parse_errors: u64,
    pub embedding_errors: u64,
    pub code_text_truncated: u64,
}

/// A non-fatal problem accumulated during the run (spec'd propagation: these
/// surface in the report, they do not abort).
#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub category: String,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub files_walked: usize,
    pub files_added: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub files_unchanged: usize,
    pub functions: usize,
    pub types: usize,
    pub fields: usize,
    pub imports: usize,
    pub calls: usize,
    pub implements: usize,
    pub mutations_emitted: usize,
    pub batches_committed: usize,
    pub skipped: HashMap<String, usize>,
    pub counters: CounterSnapshot,
    pub errors: Vec<RunError>,
    #[serde(serialize_with = "ser_duration_secs")]
    pub duration: Duration,
}

fn ser_duration_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Pipeline phases reported through the progress callback. Callback
/// invocations are monotonic per phase, not globally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Walking,
    Parsing,
    Embedding,
    EmbeddingTypes,
    Writing,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Walking => "walking",
            Phase::Parsing => "parsing",
            Phase::Embedding => "embedding",
            Phase::EmbeddingTypes => "embedding_types",
            Phase::Writing => "writing",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub phase: Phase,
    pub current: usize,
    pub total: usize,
}
