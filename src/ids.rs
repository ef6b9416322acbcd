//! Deterministic identifiers.
//!
//! Every entity id is a content-derived digest: re-ingesting unchanged input
//! produces the same id, and any change to an input field produces a new
//! one. Edges whose endpoints are themselves ids use prefixed textual
//! concatenation instead, so traversal queries can reconstruct them without
//! a digest round-trip.

/// Digest a sequence of id components into 32 hex chars.
///
/// Components are separated by a 0x1f byte so that ("ab","c") and ("a","bc")
/// cannot collide.
fn digest(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(&[0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    hasher.finalize().to_hex()[..32].to_string()
}

/// File identity is path-derived: a content change keeps the id (the row is
/// replaced by upsert), a rename is a delete + add.
pub fn file_id(path: &str) -> String {
    digest(&["file", path])
}

#[allow(clippy::too_many_arguments)]
pub fn function_id(
    file_path: &str,
    name: &str,
    signature: &str,
    start_line: u32,
    end_line: u32,
    start_col: u32,
    end_col: u32,
) -> String {
    digest(&[
        "fn",
        file_path,
        name,
        signature,
        &start_line.to_string(),
        &end_line.to_string(),
        &start_col.to_string(),
        &end_col.to_string(),
    ])
}

pub fn type_id(file_path: &str, name: &str, start_line: u32, end_line: u32) -> String {
    digest(&[
        "ty",
        file_path,
        name,
        &start_line.to_string(),
        &end_line.to_string(),
    ])
}

pub fn field_id(file_path: &str, struct_name: &str, field_name: &str) -> String {
    digest(&["field", file_path, struct_name, field_name])
}

pub fn import_id(file_path: &str, import_path: &str, start_line: u32) -> String {
    digest(&["import", file_path, import_path, &start_line.to_string()])
}

/// Implements edges link *names*, not ids, so their identity is a digest
/// (names may contain any separator we could pick).
pub fn implements_id(file_path: &str, type_name: &str, interface_name: &str) -> String {
    digest(&["impl", file_path, type_name, interface_name])
}

pub fn defines_id(file_id: &str, function_id: &str) -> String {
    format!("def:{file_id}|{function_id}")
}

pub fn defines_type_id(file_id: &str, type_id: &str) -> String {
    format!("deft:{file_id}|{type_id}")
}

pub fn call_id(caller_id: &str, callee_id: &str) -> String {
    format!("call:{caller_id}|{callee_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_deterministic() {
        let a = function_id("src/a.go", "Foo", "func Foo() {", 3, 9, 0, 1);
        let b = function_id("src/a.go", "Foo", "func Foo() {", 3, 9, 0, 1);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn any_field_change_changes_the_id() {
        let base = function_id("a.go", "f", "func f()", 1, 2, 0, 0);
        assert_ne!(base, function_id("b.go", "f", "func f()", 1, 2, 0, 0));
        assert_ne!(base, function_id("a.go", "g", "func f()", 1, 2, 0, 0));
        assert_ne!(base, function_id("a.go", "f", "func f(x int)", 1, 2, 0, 0));
        assert_ne!(base, function_id("a.go", "f", "func f()", 2, 2, 0, 0));
        assert_ne!(base, function_id("a.go", "f", "func f()", 1, 3, 0, 0));
        assert_ne!(base, function_id("a.go", "f", "func f()", 1, 2, 1, 0));
        assert_ne!(base, function_id("a.go", "f", "func f()", 1, 2, 0, 1));
    }

    #[test]
    fn component_boundaries_do_not_collide() {
        assert_ne!(type_id("a.go", "bc", 1, 1), type_id("a.gob", "c", 1, 1));
    }

    #[test]
    fn file_id_ignores_content() {
        // Path-derived by design: same path, same id.
        assert_eq!(file_id("pkg/x.go"), file_id("pkg/x.go"));
        assert_ne!(file_id("pkg/x.go"), file_id("pkg/y.go"));
    }

    #[test]
    fn edge_ids_use_prefixed_concatenation() {
        assert_eq!(defines_id("F", "G"), "def:F|G");
        assert_eq!(defines_type_id("F", "T"), "deft:F|T");
        assert_eq!(call_id("A", "B"), "call:A|B");
    }
}
