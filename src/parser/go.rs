//! Go extraction: functions, methods (as `Receiver.Name`), struct /
//! interface / alias types, struct fields, imports, and call sites.

use tree_sitter::Node;

use super::grammar::{
    child_text, count_errors, find_child_by_kind, find_children_by_kind, find_descendant_by_kind,
    node_text, parse, span, strip_quotes, visit,
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

/// Receiver type name of a method: `(c *CozoDB)` → `CozoDB`.
fn receiver_type(receiver: Node, source: &str) -> Option<String> {
    find_descendant_by_kind(receiver, "type_identifier").map(|n| node_text(n, source).to_string())
}

fn struct_fields(struct_name: &str, struct_type: Node, source: &str, out: &mut Vec<RawField>) {
    let Some(list) = find_child_by_kind(struct_type, "field_declaration_list") else {
        return;
    };
    for decl in find_children_by_kind(list, "field_declaration") {
        let field_type = child_text(decl, "type", source).unwrap_or("").to_string();
        let names = find_children_by_kind(decl, "field_identifier");
        if names.is_empty() {
            // Embedded field: the type doubles as the name.
            if !field_type.is_empty() {
                let name = field_type.rsplit('.').next().unwrap_or(&field_type).trim_start_matches('*');
                out.push(RawField {
                    struct_name: struct_name.to_string(),
                    field_name: name.to_string(),
                    field_type: field_type.clone(),
                    line: decl.start_position().row as u32 + 1,
                });
            }
            continue;
        }
        for name_node in names {
            out.push(RawField {
                struct_name: struct_name.to_string(),
                field_name: node_text(name_node, source).to_string(),
                field_type: field_type.clone(),
                line: name_node.start_position().row as u32 + 1,
            });
        }
    }
}

fn import_spec(node: Node, source: &str, out: &mut Vec<RawImport>) {
    let Some(path) = child_text(node, "path", source) else {
        return;
    };
    let alias = node
        .child_by_field_name("name")
        .filter(|n| n.kind() == "package_identifier")
        .map(|n| node_text(n, source).to_string());
    out.push(RawImport {
        import_path: strip_quotes(path),
        alias,
        line: node.start_position().row as u32 + 1,
    });
}

/// `f(...)` → `f`; `recv.Method(...)` → `Method`.
fn callee_name<'a>(function: Node<'a>, source: &'a str) -> Option<&'a str> {
    match function.kind() {
        "identifier" => Some(node_text(function, source)),
        "selector_expression" => child_text(function, "field", source),
        "parenthesized_expression" => function.child(1).and_then(|inner| callee_name(inner, source)),
        _ => None,
    }
}

/// Is this func literal the value of a `name := func` / `var name = func`
/// binding? Returns the bound identifier.
fn assigned_name<'a>(literal: Node<'a>, source: &'a str) -> Option<(&'a str, Node<'a>)> {
    let parent = literal.parent()?;
    match parent.kind() {
        "expression_list" => {
            let stmt = parent.parent()?;
            match stmt.kind() {
                "short_var_declaration" | "assignment_statement" => {
                    let left = stmt.child_by_field_name("left")?;
                    let ident = find_child_by_kind(left, "identifier")?;
                    Some((node_text(ident, source), stmt))
                }
                _ => None,
            }
        }
        "var_spec" => {
            let ident = find_child_by_kind(parent, "identifier")?;
            Some((node_text(ident, source), parent))
        }
        _ => None,
    }
}

pub(super) fn extract(source: &str) -> Option<RawExtraction> {
    let language = tree_sitter_go::language();
    let tree = parse(source, &language)?;
    let root = tree.root_node();

    let mut out = RawExtraction {
        parse_errors: count_errors(root),
        ..RawExtraction::default()
    };

    visit(root, &mut |node| match node.kind() {
        "function_declaration" => {
            if let Some(name) = child_text(node, "name", source) {
                out.functions.push(raw_function(node, name.to_string(), None));
            }
        }
        "method_declaration" => {
            if let Some(name) = child_text(node, "name", source) {
                let receiver = node
                    .child_by_field_name("receiver")
                    .and_then(|r| receiver_type(r, source));
                let full = match receiver {
                    Some(recv) => format!("{recv}.{name}"),
                    None => name.to_string(),
                };
                out.functions.push(raw_function(node, full, None));
            }
        }
        "func_literal" => {
            if let Some((name, stmt)) = assigned_name(node, source) {
                out.functions.push(raw_function(stmt, name.to_string(), None));
            } else {
                out.functions.push(raw_function(node, String::new(), Some(AnonKind::Anon)));
            }
        }
        "type_spec" | "type_alias" => {
            let Some(name) = child_text(node, "name", source) else {
                return;
            };
            let type_node = node.child_by_field_name("type");
            let kind = match (node.kind(), type_node.map(|t| t.kind())) {
                (_, Some("struct_type")) => TypeKind::Struct,
                (_, Some("interface_type")) => TypeKind::Interface,
                ("type_alias", _) => TypeKind::TypeAlias,
                _ => TypeKind::TypeAlias,
            };
            let (start_line, end_line, start_col, end_col) = span(node);
            out.types.push(RawType {
                name: name.to_string(),
                kind,
                start_line,
                end_line,
                start_col,
                end_col,
                start_byte: node.start_byte(),
                end_byte: node.end_byte(),
            });
            if kind == TypeKind::Struct {
                if let Some(st) = type_node {
                    struct_fields(name, st, source, &mut out.fields);
                }
            }
        }
        "import_spec" => import_spec(node, source, &mut out.imports),
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
