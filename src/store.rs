//! The fact store: an embedded CozoDB instance.
//!
//! All facts live in `cie_*` relations declared by the static schema
//! fixture below. Mutations arrive as CozoScript text (see `mutation.rs`)
//! and execute atomically; reads go through `query()`, which is the single
//! interface every downstream consumer uses.
//!
//! Writers are serialized behind a mutex; readers run concurrently.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use cozo::{DataValue, DbInstance, NamedRows, ScriptMutability};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{CieError, Result};

/// Bumped whenever a relation or index changes shape. A mismatch on open is
/// fatal: old facts cannot be trusted against a new schema.
pub const SCHEMA_VERSION: &str = "1";

/// Relations created by the schema fixture, with their column declarations.
/// `{dim}` is substituted with the configured embedding dimension.
const RELATIONS: &[(&str, &str)] = &[
    ("cie_file", "{id: String => path: String, hash: String, language: String, size_bytes: Int}"),
    (
        "cie_function",
        "{id: String => name: String, signature: String, file_path: String, start_line: Int, end_line: Int, start_col: Int, end_col: Int}",
    ),
    ("cie_function_code", "{id: String => code_text: String}"),
    ("cie_function_embedding", "{id: String => embedding: <F32; {dim}>}"),
    (
        "cie_type",
        "{id: String => name: String, kind: String, file_path: String, start_line: Int, end_line: Int, start_col: Int, end_col: Int}",
    ),
    ("cie_type_code", "{id: String => code_text: String}"),
    ("cie_type_embedding", "{id: String => embedding: <F32; {dim}>}"),
    (
        "cie_field",
        "{id: String => struct_name: String, field_name: String, field_type: String, file_path: String, line: Int}",
    ),
    (
        "cie_import",
        "{id: String => file_path: String, import_path: String, alias: String?, start_line: Int}",
    ),
    ("cie_defines", "{id: String => file_id: String, function_id: String}"),
    ("cie_defines_type", "{id: String => file_id: String, type_id: String}"),
    (
        "cie_calls",
        "{id: String => caller_id: String, callee_id: String, call_line: Int?}",
    ),
    (
        "cie_implements",
        "{id: String => type_name: String, interface_name: String, file_path: String}",
    ),
    ("cie_meta", "{key: String => value: String}"),
];

/// Secondary lookup indexes for file-scoped and name queries.
const INDEXES: &[&str] = &[
    "::index create cie_function:by_file {file_path}",
    "::index create cie_function:by_name {name}",
    "::index create cie_type:by_file {file_path}",
    "::index create cie_type:by_name {name}",
];

// L2 rather than Cosine: the mock provider's zero vectors have no angular
// direction, and providers that normalize make the two equivalent anyway.
fn hnsw_index(relation: &str, dim: usize) -> String {
    format!(
        "::hnsw create {relation}:semantic {{dim: {dim}, m: 32, dtype: F32, fields: [embedding], distance: L2, ef_construction: 64}}"
    )
}

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
}

impl QueryResult {
    fn from_named_rows(named: NamedRows) -> QueryResult {
        let headers = named.headers.clone();
        let json = named.into_json();
        let rows = json
            .get("rows")
            .and_then(|r| r.as_array())
            .map(|rows| {
                rows.iter()
                    .map(|row| row.as_array().cloned().unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default();
        QueryResult { headers, rows }
    }
}

fn json_to_datavalue(v: &JsonValue) -> DataValue {
    match v {
        JsonValue::Null => DataValue::Null,
        JsonValue::Bool(b) => DataValue::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                DataValue::from(i)
            } else {
                DataValue::from(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => DataValue::Str(s.as_str().into()),
        JsonValue::Array(items) => DataValue::List(items.iter().map(json_to_datavalue).collect()),
        // Objects have no direct literal use in our scripts; pass the JSON
        // text through so the script can parse it if it wants to.
        other => DataValue::Str(other.to_string().into()),
    }
}

pub struct Store {
    db: DbInstance,
    write_lock: Mutex<()>,
}

impl Store {
    /// Open (or create) the store at `db_dir` and apply the schema fixture.
    ///
    /// `engine` is "sqlite" for persisted runs or "mem" for throwaway runs;
    /// `dimensions` fixes the HNSW column width.
    pub fn open(engine: &str, db_dir: &Path, dimensions: usize) -> Result<Store> {
        let path = if engine == "mem" {
            String::new()
        } else {
            std::fs::create_dir_all(db_dir)
                .map_err(|e| CieError::io(format!("creating {}", db_dir.display()), e))?;
            db_dir.join("cie.db").to_string_lossy().into_owned()
        };

        let db = DbInstance::new(engine, &path, "{}")
            .map_err(|e| CieError::store("could not open store", e.to_string()))?;

        let store = Store {
            db,
            write_lock: Mutex::new(()),
        };
        store.ensure_schema(dimensions)?;
        Ok(store)
    }

    fn run(&self, script: &str, mutability: ScriptMutability) -> Result<NamedRows> {
        self.db
            .run_script(script, BTreeMap::new(), mutability)
            .map_err(|e| CieError::store("script failed", format!("{e:?}")))
    }

    fn existing_relations(&self) -> Result<Vec<String>> {
        let rows = self.run("::relations", ScriptMutability::Immutable)?;
        Ok(rows
            .rows
            .iter()
            .filter_map(|row| match row.first() {
                Some(DataValue::Str(s)) => Some(s.to_string()),
                _ => None,
            })
            .collect())
    }

    /// Create missing relations and their indexes; verify the schema
    /// version when relations already exist.
    fn ensure_schema(&self, dimensions: usize) -> Result<()> {
        let existing = self.existing_relations()?;

        if existing.iter().any(|r| r == "cie_meta") {
            let found = self.meta("schema_version")?;
            if found.as_deref() != Some(SCHEMA_VERSION) {
                return Err(CieError::config(
                    "store schema version mismatch",
                    format!(
                        "store has {:?}, this build expects {SCHEMA_VERSION}",
                        found
                    ),
                    "run with force_reindex to rebuild the store with the current schema",
                ));
            }
            return Ok(());
        }

        for (name, columns) in RELATIONS {
            if existing.iter().any(|r| r == name) {
                continue;
            }
            let columns = columns.replace("{dim}", &dimensions.to_string());
            self.run(&format!(":create {name} {columns}"), ScriptMutability::Mutable)?;
            debug!(relation = name, "created relation");
        }

        for stmt in INDEXES {
            self.run(stmt, ScriptMutability::Mutable)?;
        }
        self.run(&hnsw_index("cie_function_embedding", dimensions), ScriptMutability::Mutable)?;
        self.run(&hnsw_index("cie_type_embedding", dimensions), ScriptMutability::Mutable)?;

        self.put_meta("schema_version", SCHEMA_VERSION)?;
        Ok(())
    }

    pub fn meta(&self, key: &str) -> Result<Option<String>> {
        let rows = self.run(
            &format!(
                "?[value] := *cie_meta{{key: {}, value}}",
                crate::mutation::escape_str(key)
            ),
            ScriptMutability::Immutable,
        )?;
        Ok(rows.rows.first().and_then(|row| match row.first() {
            Some(DataValue::Str(s)) => Some(s.to_string()),
            _ => None,
        }))
    }

    pub fn put_meta(&self, key: &str, value: &str) -> Result<()> {
        let script = format!(
            "?[key, value] <- [[{}, {}]] :put cie_meta {{key => value}}",
            crate::mutation::escape_str(key),
            crate::mutation::escape_str(value)
        );
        self.execute(&script)
    }

    /// The single read interface. Runs the script read-only with the given
    /// params; enforces `timeout` by running the query on a worker thread.
    pub fn query(
        &self,
        script: &str,
        params: &serde_json::Map<String, JsonValue>,
        timeout: Duration,
    ) -> Result<QueryResult> {
        let db = self.db.clone();
        let script = script.to_string();
        let params: BTreeMap<String, DataValue> = params
            .iter()
            .map(|(k, v)| (k.clone(), json_to_datavalue(v)))
            .collect();

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = db.run_script(&script, params, ScriptMutability::Immutable);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(rows)) => Ok(QueryResult::from_named_rows(rows)),
            Ok(Err(e)) => Err(CieError::store("query failed", format!("{e:?}"))),
            Err(_) => Err(CieError::store(
                "query timed out",
                format!("no result within {}s", timeout.as_secs()),
            )),
        }
    }

    /// Execute a mutation script as one transaction. Writers are serialized
    /// here; this is the only place mutation scripts enter the engine.
    pub fn execute(&self, script: &str) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.run(script, ScriptMutability::Mutable).map(|_| ())
    }

    /// `execute` with a deadline. A batch that overruns is reported as a
    /// timeout; because every script is an idempotent delete+upsert, a
    /// write that commits after its caller gave up is harmless on retry.
    pub fn execute_with_timeout(&self, script: &str, timeout: Duration) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let db = self.db.clone();
        let script = script.to_string();
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = db.run_script(&script, BTreeMap::new(), ScriptMutability::Mutable);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(CieError::store("script failed", format!("{e:?}"))),
            Err(_) => Err(CieError::store(
                "write batch timed out",
                format!("no commit within {}s", timeout.as_secs()),
            )),
        }
    }

    /// Row counts per fact relation (skips `cie_meta`); used by the CLI
    /// `stats` surface and by tests.
    pub fn relation_counts(&self) -> Result<Vec<(String, usize)>> {
        let mut out = Vec::new();
        for (name, _) in RELATIONS {
            if *name == "cie_meta" {
                continue;
            }
            let rows = self.run(
                &format!("?[count(id)] := *{name}{{id}}"),
                ScriptMutability::Immutable,
            )?;
            let count = rows
                .rows
                .first()
                .and_then(|r| r.first())
                .and_then(|v| v.get_int())
                .unwrap_or(0) as usize;
            out.push((name.to_string(), count));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem() -> Store {
        Store::open("mem", Path::new(""), 4).unwrap()
    }

    #[test]
    fn schema_applies_and_counts_start_at_zero() {
        let store = mem();
        for (name, count) in store.relation_counts().unwrap() {
            assert_eq!(count, 0, "{name} should start empty");
        }
        assert_eq!(
            store.meta("schema_version").unwrap().as_deref(),
            Some(SCHEMA_VERSION)
        );
    }

    #[test]
    fn put_then_query_round_trip() {
        let store = mem();
        store
            .execute(
                "?[id, path, hash, language, size_bytes] <- [['F1', 'a.go', 'h', 'go', 12]] \
                 :put cie_file {id => path, hash, language, size_bytes}",
            )
            .unwrap();

        let result = store
            .query(
                "?[path, language] := *cie_file{id: $id, path, language}",
                serde_json::json!({"id": "F1"}).as_object().unwrap(),
                Duration::from_secs(5),
            )
            .unwrap();
        assert_eq!(result.headers, vec!["path", "language"]);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0], serde_json::json!("a.go"));
        assert_eq!(result.rows[0][1], serde_json::json!("go"));
    }

    #[test]
    fn embeddings_accept_vectors_of_the_declared_dim() {
        let store = mem();
        store
            .execute(
                "?[id, embedding] <- [['X', vec([0.1,0.2,0.3,0.4])]] \
                 :put cie_function_embedding {id => embedding}",
            )
            .unwrap();
        let counts = store.relation_counts().unwrap();
        let emb = counts
            .iter()
            .find(|(n, _)| n == "cie_function_embedding")
            .unwrap();
        assert_eq!(emb.1, 1);
    }

    #[test]
    fn bad_script_is_a_store_error() {
        let store = mem();
        let err = store.execute("this is not cozo").unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Store);
    }

    #[test]
    fn multi_statement_scripts_are_atomic() {
        let store = mem();
        // Second statement references a relation that doesn't exist, so the
        // first statement's put must roll back with it.
        let bad = "{?[id, path, hash, language, size_bytes] <- [['F1', 'a.go', 'h', 'go', 1]] \
                   :put cie_file {id => path, hash, language, size_bytes}} \
                   {?[id] <- [['x']] :rm cie_nonexistent {id}}";
        assert!(store.execute(bad).is_err());

        let counts = store.relation_counts().unwrap();
        let files = counts.iter().find(|(n, _)| n == "cie_file").unwrap();
        assert_eq!(files.1, 0, "aborted script must not leave partial rows");
    }
}
