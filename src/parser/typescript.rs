//! JavaScript / TypeScript extraction. Plain JS parses with the TypeScript
//! grammar; `.tsx` / `.jsx` use the TSX variant.
//!
//! Function-like constructs: declarations, generator declarations, class
//! methods (as `Class.method`), arrow functions and function expressions
//! bound to identifiers (named after the binding, spanning the whole
//! declaration), and free-standing anonymous functions (synthetic names).

use tree_sitter::Node;

use super::grammar::{
    child_text, count_errors, find_child_by_kind, node_text, parse, span, strip_quotes, visit,
};
use super::{AnonKind, RawCall, RawExtraction, RawField, RawFunction, RawImport, RawType};
use crate::model::TypeKind;

const CLASS_KINDS: &[&str] = &["class_declaration", "abstract_class_declaration", "class"];

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

/// Name of the nearest enclosing class or interface, if any.
fn enclosing_type_name(node: Node, source: &str) -> Option<String> {
    let mut cur = node.parent();
    while let Some(n) = cur {
        if CLASS_KINDS.contains(&n.kind()) || n.kind() == "interface_declaration" {
            return child_text(n, "name", source).map(str::to_string);
        }
        cur = n.parent();
    }
    None
}

/// Is this function node the value of an identifier binding
/// (`const f = () => …`)? Returns the name and the whole declaration node.
fn binding<'a>(func: Node<'a>, source: &'a str) -> Option<(&'a str, Node<'a>)> {
    let declarator = func.parent().filter(|p| p.kind() == "variable_declarator")?;
    if declarator.child_by_field_name("value") != Some(func) {
        return None;
    }
    let name_node = declarator.child_by_field_name("name")?;
    if name_node.kind() != "identifier" {
        return None;
    }
    let declaration = declarator.parent().filter(|p| {
        matches!(p.kind(), "lexical_declaration" | "variable_declaration")
    })?;
    Some((node_text(name_node, source), declaration))
}

fn callee_name<'a>(function: Node<'a>, source: &'a str) -> Option<&'a str> {
    match function.kind() {
        "identifier" => Some(node_text(function, source)),
        "member_expression" => function
            .child_by_field_name("property")
            .filter(|p| p.kind() == "property_identifier")
            .map(|p| node_text(p, source)),
        "parenthesized_expression" => function.child(1).and_then(|inner| callee_name(inner, source)),
        _ => None,
    }
}

fn import_statement(node: Node, source: &str, out: &mut Vec<RawImport>) {
    let Some(source_node) = node.child_by_field_name("source") else {
        return;
    };
    let mut alias = None;
    if let Some(clause) = find_child_by_kind(node, "import_clause") {
        if let Some(ns) = find_child_by_kind(clause, "namespace_import") {
            alias = find_child_by_kind(ns, "identifier").map(|n| node_text(n, source).to_string());
        } else if let Some(default_ident) = find_child_by_kind(clause, "identifier") {
            alias = Some(node_text(default_ident, source).to_string());
        }
    }
    out.push(RawImport {
        import_path: strip_quotes(node_text(source_node, source)),
        alias,
        line: node.start_position().row as u32 + 1,
    });
}

fn is_function_value(kind: &str) -> bool {
    matches!(kind, "arrow_function" | "function_expression" | "function" | "generator_function")
}

pub(super) fn extract(source: &str, tsx: bool) -> Option<RawExtraction> {
    let language = if tsx {
        tree_sitter_typescript::language_tsx()
    } else {
        tree_sitter_typescript::language_typescript()
    };
    let tree = parse(source, &language)?;
    let root = tree.root_node();

    let mut out = RawExtraction {
        parse_errors: count_errors(root),
        ..RawExtraction::default()
    };

    visit(root, &mut |node| match node.kind() {
        "function_declaration" | "generator_function_declaration" => {
            if let Some(name) = child_text(node, "name", source) {
                out.functions.push(raw_function(node, name.to_string(), None));
            }
        }
        "method_definition" => {
            if let Some(name) = child_text(node, "name", source) {
                let full = match enclosing_type_name(node, source) {
                    Some(class) => format!("{class}.{name}"),
                    None => name.to_string(),
                };
                out.functions.push(raw_function(node, full, None));
            }
        }
        "arrow_function" | "function_expression" | "function" | "generator_function" => {
            if let Some((name, declaration)) = binding(node, source) {
                out.functions.push(raw_function(declaration, name.to_string(), None));
            } else {
                let kind = if node.kind() == "arrow_function" {
                    AnonKind::Arrow
                } else {
                    AnonKind::Anon
                };
                out.functions.push(raw_function(node, String::new(), Some(kind)));
            }
        }
        "class_declaration" | "abstract_class_declaration" => {
            if let Some(name) = child_text(node, "name", source) {
                out.types.push(raw_type(node, name.to_string(), TypeKind::Class));
            }
        }
        "interface_declaration" => {
            if let Some(name) = child_text(node, "name", source) {
                out.types.push(raw_type(node, name.to_string(), TypeKind::Interface));
            }
        }
        "enum_declaration" => {
            if let Some(name) = child_text(node, "name", source) {
                out.types.push(raw_type(node, name.to_string(), TypeKind::Enum));
            }
        }
        "type_alias_declaration" => {
            if let Some(name) = child_text(node, "name", source) {
                out.types.push(raw_type(node, name.to_string(), TypeKind::TypeAlias));
            }
        }
        "public_field_definition" | "property_signature" => {
            let Some(name) = child_text(node, "name", source) else {
                return;
            };
            let value_is_function = node
                .child_by_field_name("value")
                .map(|v| is_function_value(v.kind()))
                .unwrap_or(false);
            let Some(owner) = enclosing_type_name(node, source) else {
                return;
            };
            if value_is_function {
                // `handle = async () => {…}` inside a class body is a
                // method in everything but syntax.
                out.functions.push(raw_function(node, format!("{owner}.{name}"), None));
            } else {
                let field_type = node
                    .child_by_field_name("type")
                    .map(|t| node_text(t, source).trim_start_matches(':').trim().to_string())
                    .unwrap_or_default();
                out.fields.push(RawField {
                    struct_name: owner,
                    field_name: name.to_string(),
                    field_type,
                    line: node.start_position().row as u32 + 1,
                });
            }
        }
        "import_statement" => import_statement(node, source, &mut out.imports),
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
