//! Structural interface satisfaction.
//!
//! Interface method sets come from method-signature-shaped lines inside
//! interface bodies; concrete method sets come from function names of the
//! form `Type.Method`. A concrete type `T` implements interface `I` iff
//! `methods(T) ⊇ methods(I)` with `methods(I)` non-empty and `T ≠ I`.
//! The concrete type does not need a declaration of its own — methods
//! alone are enough (receiver types are often defined elsewhere).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::ids;
use crate::model::{FunctionEntity, ImplementsEdge, TypeEntity, TypeKind};

/// `Write(p []byte) (n int, err error)` / `fn flush(&self);` /
/// `write(p: string): void` — an identifier directly followed by an
/// argument list.
fn method_sig_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:pub\s+)?(?:async\s+)?(?:fn\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*[(<]").unwrap()
    })
}

const NON_METHOD_NAMES: &[&str] = &[
    "func", "fn", "if", "for", "while", "switch", "return", "type", "struct", "interface",
    "impl", "map", "chan", "select",
];

/// Method names declared by an interface body.
fn interface_methods(interface: &TypeEntity) -> BTreeSet<String> {
    let mut methods = BTreeSet::new();
    for (idx, line) in interface.code_text.lines().enumerate() {
        if idx == 0 {
            // The declaration line itself ("type Writer interface {" /
            // "interface Writer {") — but single-line bodies still need
            // their members picked up past the opening brace.
            if let Some(brace) = line.find('{') {
                for part in line[brace + 1..].split(';') {
                    collect_sig(part, &mut methods);
                }
            }
            continue;
        }
        collect_sig(line, &mut methods);
    }
    methods
}

fn collect_sig(line: &str, out: &mut BTreeSet<String>) {
    if let Some(caps) = method_sig_re().captures(line) {
        let name = &caps[1];
        if !NON_METHOD_NAMES.contains(&name) {
            out.insert(name.to_string());
        }
    }
}

/// Compute implements edges over a full extraction pass.
pub fn compute(types: &[&TypeEntity], functions: &[&FunctionEntity]) -> Vec<ImplementsEdge> {
    // interface name → its method set
    let mut interfaces: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for t in types {
        if t.kind != TypeKind::Interface {
            continue;
        }
        let methods = interface_methods(t);
        if !methods.is_empty() {
            interfaces.insert(t.name.as_str(), methods);
        }
    }
    if interfaces.is_empty() {
        return vec![];
    }

    // concrete type → (method set, file of its first method)
    let mut concrete: BTreeMap<&str, (BTreeSet<&str>, &str)> = BTreeMap::new();
    for f in functions {
        let Some((type_name, method)) = f.name.rsplit_once('.') else {
            continue;
        };
        let entry = concrete
            .entry(type_name)
            .or_insert_with(|| (BTreeSet::new(), f.file_path.as_str()));
        entry.0.insert(method);
    }

    let mut edges = Vec::new();
    for (type_name, (methods, file_path)) in &concrete {
        for (interface_name, required) in &interfaces {
            if type_name == interface_name {
                continue;
            }
            if required.iter().all(|m| methods.contains(m.as_str())) {
                edges.push(ImplementsEdge {
                    id: ids::implements_id(file_path, type_name, interface_name),
                    type_name: type_name.to_string(),
                    interface_name: interface_name.to_string(),
                    file_path: file_path.to_string(),
                });
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interface(name: &str, code: &str) -> TypeEntity {
        TypeEntity {
            id: format!("ty-{name}"),
            name: name.into(),
            kind: TypeKind::Interface,
            file_path: "a.go".into(),
            code_text: code.into(),
            start_line: 1,
            end_line: 4,
            start_col: 0,
            end_col: 1,
            embedding: None,
        }
    }

    fn func(name: &str) -> FunctionEntity {
        FunctionEntity {
            id: format!("fn-{name}"),
            name: name.into(),
            signature: String::new(),
            file_path: "b.go".into(),
            code_text: String::new(),
            start_line: 1,
            end_line: 1,
            start_col: 0,
            end_col: 0,
            embedding: None,
        }
    }

    #[test]
    fn superset_method_set_implements() {
        let writer = interface(
            "Writer",
            "type Writer interface {\n\tWrite(p []byte) (int, error)\n\tFlush() error\n}",
        );
        let fns = [
            func("CozoDB.Write"),
            func("CozoDB.Flush"),
            func("CozoDB.Close"),
            func("Logger.Write"), // Write only: not enough
        ];
        let edges = compute(
            &[&writer],
            &fns.iter().collect::<Vec<_>>(),
        );
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].type_name, "CozoDB");
        assert_eq!(edges[0].interface_name, "Writer");
        assert_eq!(edges[0].file_path, "b.go");
    }

    #[test]
    fn a_type_never_implements_itself() {
        let writer = interface("Writer", "type Writer interface {\n\tWrite()\n}");
        // A trait's default methods produce `Writer.Write`-style names.
        let fns = [func("Writer.Write")];
        let edges = compute(&[&writer], &fns.iter().collect::<Vec<_>>());
        assert!(edges.is_empty());
    }

    #[test]
    fn empty_interfaces_match_nothing() {
        let empty = interface("Marker", "type Marker interface {\n}");
        let fns = [func("Thing.Do")];
        let edges = compute(&[&empty], &fns.iter().collect::<Vec<_>>());
        assert!(edges.is_empty());
    }

    #[test]
    fn single_line_typescript_interfaces_work() {
        let ts = interface("Flushable", "interface Flushable { flush(): void }");
        let fns = [func("Sink.flush")];
        let edges = compute(&[&ts], &fns.iter().collect::<Vec<_>>());
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].interface_name, "Flushable");
    }

    #[test]
    fn rust_trait_signatures_are_recognized() {
        let rust_trait = interface("Flush", "trait Flush {\n    fn flush(&self);\n}");
        let fns = [func("Buffer.flush")];
        let edges = compute(&[&rust_trait], &fns.iter().collect::<Vec<_>>());
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn edge_ids_are_deterministic() {
        let writer = interface("Writer", "type Writer interface {\n\tWrite()\n}");
        let fns = [func("CozoDB.Write")];
        let one = compute(&[&writer], &fns.iter().collect::<Vec<_>>());
        let two = compute(&[&writer], &fns.iter().collect::<Vec<_>>());
        assert_eq!(one[0].id, two[0].id);
    }
}
