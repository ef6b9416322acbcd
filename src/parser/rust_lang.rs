//! Rust extraction: free functions, impl/trait methods (as `Type.method`),
//! structs with fields, enums, traits (interface kind), type aliases, use
//! declarations, closures bound to `let`, and call sites.

use tree_sitter::Node;

use super::grammar::{
    child_text, count_errors, find_children_by_kind, find_descendant_by_kind, node_text, parse,
    span, visit,
};
use super::{AnonKind, RawCall, RawExtraction, RawField, RawFunction, RawImport, RawType};
use crate::model::TypeKind;

fn raw_function(node: Node, name: String, anon: Option<AnonKind>) -> RawFunction {
    let (start_line, end_line, start_col, end_col) = span(node);
    RawFunction {
        name,
        anon,
        start_line,
        end_line,
        start_col,
        end_col,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
    }
}

fn raw_type(node: Node, name: String, kind: TypeKind) -> RawType {
    let (start_line, end_line, start_col, end_col) = span(node);
    RawType {
        name,
        kind,
        start_line,
        end_line,
        start_col,
        end_col,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
    }
}

/// Base type name of an impl target: `impl<T> Foo<T> { … }` → `Foo`.
fn impl_type_name(impl_node: Node, source: &str) -> Option<String> {
    let type_node = impl_node.child_by_field_name("type")?;
    match type_node.kind() {
        "type_identifier" => Some(node_text(type_node, source).to_string()),
        _ => find_descendant_by_kind(type_node, "type_identifier")
            .map(|n| node_text(n, source).to_string()),
    }
}

/// Owner prefix for a function: the impl target or trait it lives in.
fn method_owner(node: Node, source: &str) -> Option<String> {
    let mut cur = node.parent();
    while let Some(n) = cur {
        match n.kind() {
            "function_item" | "closure_expression" => return None,
            "impl_item" => return impl_type_name(n, source),
            "trait_item" => return child_text(n, "name", source).map(str::to_string),
            _ => cur = n.parent(),
        }
    }
    None
}

fn struct_fields(struct_node: Node, name: &str, source: &str, out: &mut Vec<RawField>) {
    let Some(body) = struct_node.child_by_field_name("body") else {
        return;
    };
    if body.kind() != "field_declaration_list" {
        return; // tuple structs carry no named fields
    }
    for decl in find_children_by_kind(body, "field_declaration") {
        let Some(field_name) = child_text(decl, "name", source) else {
            continue;
        };
        let field_type = child_text(decl, "type", source).unwrap_or("").to_string();
        out.push(RawField {
            struct_name: name.to_string(),
            field_name: field_name.to_string(),
            field_type,
            line: decl.start_position().row as u32 + 1,
        });
    }
}

fn use_declaration(node: Node, source: &str, out: &mut Vec<RawImport>) {
    let Some(argument) = node.child_by_field_name("argument") else {
        return;
    };
    let alias = find_descendant_by_kind(argument, "use_as_clause")
        .and_then(|clause| child_text(clause, "alias", source))
        .map(str::to_string);
    out.push(RawImport {
        import_path: node_text(argument, source).to_string(),
        alias,
        line: node.start_position().row as u32 + 1,
    });
}

fn callee_name<'a>(function: Node<'a>, source: &'a str) -> Option<&'a str> {
    match function.kind() {
        "identifier" => Some(node_text(function, source)),
        "field_expression" => function
            .child_by_field_name("field")
            .map(|f| node_text(f, source)),
        "scoped_identifier" => function
            .child_by_field_name("name")
            .map(|n| node_text(n, source)),
        "generic_function" => function
            .child_by_field_name("function")
            .and_then(|inner| callee_name(inner, source)),
        _ => None,
    }
}

/// `let f = |x| …` binds the closure to the pattern identifier.
fn closure_binding<'a>(closure: Node<'a>, source: &'a str) -> Option<(&'a str, Node<'a>)> {
    let let_decl = closure.parent().filter(|p| p.kind() == "let_declaration")?;
    if let_decl.child_by_field_name("value") != Some(closure) {
        return None;
    }
    let pattern = let_decl.child_by_field_name("pattern")?;
    if pattern.kind() != "identifier" {
        return None;
    }
    Some((node_text(pattern, source), let_decl))
}

pub(super) fn extract(source: &str) -> Option<RawExtraction> {
    let language = tree_sitter_rust::language();
    let tree = parse(source, &language)?;
    let root = tree.root_node();

    let mut out = RawExtraction {
        parse_errors: count_errors(root),
        ..RawExtraction::default()
    };

    visit(root, &mut |node| match node.kind() {
        "function_item" => {
            if let Some(name) = child_text(node, "name", source) {
                let full = match method_owner(node, source) {
                    Some(owner) => format!("{owner}.{name}"),
                    None => name.to_string(),
                };
                out.functions.push(raw_function(node, full, None));
            }
        }
        "closure_expression" => {
            if let Some((name, let_decl)) = closure_binding(node, source) {
                out.functions.push(raw_function(let_decl, name.to_string(), None));
            } else {
                out.functions.push(raw_function(node, String::new(), Some(AnonKind::Anon)));
            }
        }
        "struct_item" | "union_item" => {
            if let Some(name) = child_text(node, "name", source) {
                out.types.push(raw_type(node, name.to_string(), TypeKind::Struct));
                struct_fields(node, name, source, &mut out.fields);
            }
        }
        "enum_item" => {
            if let Some(name) = child_text(node, "name", source) {
                out.types.push(raw_type(node, name.to_string(), TypeKind::Enum));
            }
        }
        "trait_item" => {
            if let Some(name) = child_text(node, "name", source) {
                out.types.push(raw_type(node, name.to_string(), TypeKind::Interface));
            }
        }
        "type_item" => {
            if let Some(name) = child_text(node, "name", source) {
                out.types.push(raw_type(node, name.to_string(), TypeKind::TypeAlias));
            }
        }
        "use_declaration" => use_declaration(node, source, &mut out.imports),
        "call_expression" => {
            if let Some(function) = node.child_by_field_name("function") {
                if let Some(callee) = callee_name(function, source) {
                    out.calls.push(RawCall {
                        callee: callee.to_string(),
                        line: node.start_position().row as u32 + 1,
                        byte: node.start_byte(),
                    });
                }
            }
        }
        _ => {}
    });

    Some(out)
}
