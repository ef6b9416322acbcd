//! Shared tree-sitter plumbing for the grammar-driven extractors.
//!
//! Extraction is manual CST traversal: each language module walks the tree
//! and picks out the productions it cares about. Parse errors on subtrees
//! are counted, never fatal — whatever parsed cleanly is still emitted.

use tree_sitter::{Language, Node, Parser, Tree};

/// Parse `source` with `language`. `None` means the parser could not
/// produce a tree at all (unrecoverable); a tree with ERROR nodes is still
/// returned and mined for partial results.
pub(crate) fn parse(source: &str, language: &Language) -> Option<Tree> {
    let mut parser = Parser::new();
    parser.set_language(language).ok()?;
    parser.parse(source, None)
}

/// Depth-first visit of every node under `root`.
pub(crate) fn visit<'a, F: FnMut(Node<'a>)>(root: Node<'a>, f: &mut F) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        f(node);
        for i in (0..node.child_count()).rev() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }
}

/// Count ERROR / missing nodes — the per-file parse error tally.
pub(crate) fn count_errors(root: Node) -> u32 {
    let mut errors = 0u32;
    visit(root, &mut |node| {
        if node.is_error() || node.is_missing() {
            errors += 1;
        }
    });
    errors
}

pub(crate) fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

pub(crate) fn child_text<'a>(node: Node, field: &str, source: &'a str) -> Option<&'a str> {
    node.child_by_field_name(field).map(|c| node_text(c, source))
}

pub(crate) fn find_child_by_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if child.kind() == kind {
                return Some(child);
            }
        }
    }
    None
}

pub(crate) fn find_children_by_kind<'a>(node: Node<'a>, kind: &str) -> Vec<Node<'a>> {
    let mut out = Vec::new();
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if child.kind() == kind {
                out.push(child);
            }
        }
    }
    out
}

pub(crate) fn find_descendant_by_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut found = None;
    visit(node, &mut |n| {
        if found.is_none() && n.kind() == kind {
            found = Some(n);
        }
    });
    found
}

/// 1-based line span and 0-based column span of a node.
pub(crate) fn span(node: Node) -> (u32, u32, u32, u32) {
    let start = node.start_position();
    let end = node.end_position();
    (
        start.row as u32 + 1,
        end.row as u32 + 1,
        start.column as u32,
        end.column as u32,
    )
}

/// Strip one layer of matching quotes from a string literal's text.
pub(crate) fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    for q in ["\"", "'", "`"] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visit_reaches_every_node() {
        let lang = tree_sitter_python::language();
        let tree = parse("x = 1\ny = 2\n", &lang).unwrap();
        let mut count = 0;
        visit(tree.root_node(), &mut |_| count += 1);
        assert!(count > 4);
    }

    #[test]
    fn clean_source_has_no_errors() {
        let lang = tree_sitter_python::language();
        let tree = parse("def f():\n    pass\n", &lang).unwrap();
        assert_eq!(count_errors(tree.root_node()), 0);
    }

    #[test]
    fn broken_source_counts_errors_but_still_yields_a_tree() {
        let lang = tree_sitter_python::language();
        let tree = parse("def f(:\n    pass\n", &lang).unwrap();
        assert!(count_errors(tree.root_node()) > 0);
    }

    #[test]
    fn spans_are_one_based_lines() {
        let lang = tree_sitter_python::language();
        let src = "def f():\n    pass\n";
        let tree = parse(src, &lang).unwrap();
        let func = find_descendant_by_kind(tree.root_node(), "function_definition").unwrap();
        let (start_line, end_line, start_col, _) = span(func);
        assert_eq!(start_line, 1);
        assert_eq!(end_line, 2);
        assert_eq!(start_col, 0);
    }

    #[test]
    fn quote_stripping() {
        assert_eq!(strip_quotes("\"a/b\""), "a/b");
        assert_eq!(strip_quotes("'a'"), "a");
        assert_eq!(strip_quotes("bare"), "bare");
    }
}
