//! Python extraction: functions, class methods (as `Class.method`),
//! classes, class-level attribute fields, imports, lambda bindings, and
//! call sites.

use tree_sitter::Node;

use super::grammar::{
    child_text, count_errors, find_child_by_kind, node_text, parse, span, visit,
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

/// Owning class of a def, unless a nested def sits in between.
fn method_owner(node: Node, source: &str) -> Option<String> {
    let mut cur = node.parent();
    while let Some(n) = cur {
        match n.kind() {
            "function_definition" | "lambda" => return None,
            "class_definition" => return child_text(n, "name", source).map(str::to_string),
            _ => cur = n.parent(),
        }
    }
    None
}

fn import_statement(node: Node, source: &str, out: &mut Vec<RawImport>) {
    let line = node.start_position().row as u32 + 1;
    match node.kind() {
        "import_statement" => {
            for i in 0..node.child_count() {
                let Some(child) = node.child(i) else { continue };
                match child.kind() {
                    "dotted_name" => out.push(RawImport {
                        import_path: node_text(child, source).to_string(),
                        alias: None,
                        line,
                    }),
                    "aliased_import" => {
                        let path = child_text(child, "name", source).unwrap_or("");
                        let alias = child_text(child, "alias", source).map(str::to_string);
                        out.push(RawImport {
                            import_path: path.to_string(),
                            alias,
                            line,
                        });
                    }
                    _ => {}
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = child_text(node, "module_name", source) {
                out.push(RawImport {
                    import_path: module.to_string(),
                    alias: None,
                    line,
                });
            }
        }
        _ => {}
    }
}

fn callee_name<'a>(function: Node<'a>, source: &'a str) -> Option<&'a str> {
    match function.kind() {
        "identifier" => Some(node_text(function, source)),
        "attribute" => function
            .child_by_field_name("attribute")
            .map(|a| node_text(a, source)),
        _ => None,
    }
}

/// `handler = lambda x: …` binds the lambda to the identifier.
fn lambda_binding<'a>(lambda: Node<'a>, source: &'a str) -> Option<(&'a str, Node<'a>)> {
    let assignment = lambda.parent().filter(|p| p.kind() == "assignment")?;
    if assignment.child_by_field_name("right") != Some(lambda) {
        return None;
    }
    let left = assignment.child_by_field_name("left")?;
    if left.kind() != "identifier" {
        return None;
    }
    Some((node_text(left, source), assignment))
}

/// Class-level annotated attributes (`port: int = 8080`).
fn class_fields(class_node: Node, class_name: &str, source: &str, out: &mut Vec<RawField>) {
    let Some(body) = class_node.child_by_field_name("body") else {
        return;
    };
    for i in 0..body.child_count() {
        let Some(stmt) = body.child(i) else { continue };
        if stmt.kind() != "expression_statement" {
            continue;
        }
        let Some(assignment) = find_child_by_kind(stmt, "assignment") else {
            continue;
        };
        let Some(left) = assignment.child_by_field_name("left") else {
            continue;
        };
        if left.kind() != "identifier" {
            continue;
        }
        let field_type = child_text(assignment, "type", source).unwrap_or("").to_string();
        out.push(RawField {
            struct_name: class_name.to_string(),
            field_name: node_text(left, source).to_string(),
            field_type,
            line: left.start_position().row as u32 + 1,
        });
    }
}

pub(super) fn extract(source: &str) -> Option<RawExtraction> {
    let language = tree_sitter_python::language();
    let tree = parse(source, &language)?;
    let root = tree.root_node();

    let mut out = RawExtraction {
        parse_errors: count_errors(root),
        ..RawExtraction::default()
    };

    visit(root, &mut |node| match node.kind() {
        "function_definition" => {
            if let Some(name) = child_text(node, "name", source) {
                let full = match method_owner(node, source) {
                    Some(class) => format!("{class}.{name}"),
                    None => name.to_string(),
                };
                // Decorators belong to the definition; widen the span.
                let span_node = node
                    .parent()
                    .filter(|p| p.kind() == "decorated_definition")
                    .unwrap_or(node);
                out.functions.push(raw_function(span_node, full, None));
            }
        }
        "lambda" => {
            if let Some((name, assignment)) = lambda_binding(node, source) {
                out.functions.push(raw_function(assignment, name.to_string(), None));
            } else {
                out.functions.push(raw_function(node, String::new(), Some(AnonKind::Anon)));
            }
        }
        "class_definition" => {
            if let Some(name) = child_text(node, "name", source) {
                let span_node = node
                    .parent()
                    .filter(|p| p.kind() == "decorated_definition")
                    .unwrap_or(node);
                let (start_line, end_line, start_col, end_col) = span(span_node);
                out.types.push(RawType {
                    name: name.to_string(),
                    kind: TypeKind::Class,
                    start_line,
                    end_line,
                    start_col,
                    end_col,
                    start_byte: span_node.start_byte(),
                    end_byte: span_node.end_byte(),
                });
                class_fields(node, name, source, &mut out.fields);
            }
        }
        "import_statement" | "import_from_statement" => import_statement(node, source, &mut out.imports),
        "call" => {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn functions_and_methods() {
        let src = "def top():\n    pass\n\nclass Indexer:\n    def run(self):\n        self.flush()\n\n    def flush(self):\n        pass\n";
        let out = extract(src).unwrap();
        let names: Vec<&str> = out.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["top", "Indexer.run", "Indexer.flush"]);
        assert_eq!(out.types.len(), 1);
        assert_eq!(out.types[0].kind, TypeKind::Class);
    }

    #[test]
    fn nested_defs_stay_bare() {
        let src = "class C:\n    def outer(self):\n        def helper():\n            pass\n        helper()\n";
        let out = extract(src).unwrap();
        let names: Vec<&str> = out.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["C.outer", "helper"]);
    }

    #[test]
    fn decorated_functions_span_their_decorators() {
        let src = "@cached\ndef slow():\n    pass\n";
        let out = extract(src).unwrap();
        assert_eq!(out.functions[0].start_line, 1);
        assert_eq!(out.functions[0].name, "slow");
    }

    #[test]
    fn imports_and_aliases() {
        let src = "import os\nimport numpy as np\nfrom pathlib import Path\n";
        let out = extract(src).unwrap();
        let paths: Vec<(&str, Option<&str>)> = out
            .imports
            .iter()
            .map(|i| (i.import_path.as_str(), i.alias.as_deref()))
            .collect();
        assert_eq!(
            paths,
            vec![("os", None), ("numpy", Some("np")), ("pathlib", None)]
        );
    }

    #[test]
    fn calls_through_attributes_use_the_attribute_name() {
        let src = "def go():\n    helper()\n    client.submit()\n";
        let out = extract(src).unwrap();
        let callees: Vec<&str> = out.calls.iter().map(|c| c.callee.as_str()).collect();
        assert_eq!(callees, vec!["helper", "submit"]);
    }

    #[test]
    fn bound_lambda_takes_the_binding_name() {
        let src = "square = lambda x: x * x\n";
        let out = extract(src).unwrap();
        assert_eq!(out.functions.len(), 1);
        assert_eq!(out.functions[0].name, "square");
        assert_eq!(out.functions[0].anon, None);
    }

    #[test]
    fn class_level_attributes_become_fields() {
        let src = "class Config:\n    port: int = 8080\n    name = 'x'\n";
        let out = extract(src).unwrap();
        let fields: Vec<(&str, &str)> = out
            .fields
            .iter()
            .map(|f| (f.field_name.as_str(), f.field_type.as_str()))
            .collect();
        assert_eq!(fields, vec![("port", "int"), ("name", "")]);
    }
}
