use std::sync::Arc;

use super::{collect_comments, node_text, parse_int_literal, parse_tree_sitter, span_of, LanguageParser, ParseOptions, ParseTree, SyntaxTree};
use crate::error::Result;
use crate::ust::{CodeFile, Language, RootUst, TextSpan, UstKind, UstNode};

pub struct PythonParser;

impl LanguageParser for PythonParser {
    fn language(&self) -> Language {
        Language::Python
    }

    fn grammar(&self) -> &str {
        "python"
    }

    fn parse(&self, file: &Arc<CodeFile>, options: &ParseOptions) -> Result<ParseTree> {
        parse_tree_sitter(&tree_sitter_python::LANGUAGE.into(), Language::Python, file, options)
    }

    fn convert(&self, tree: &ParseTree) -> Result<RootUst> {
        match &tree.syntax {
            SyntaxTree::TreeSitter(ts) => {
                let root = ts.root_node();
                let comments = collect_comments(root, &tree.file.code);
                let node = Converter {
                    source: &tree.file.code,
                }
                .convert(root);
                Ok(RootUst::new(Arc::clone(&tree.file), Language::Python, node, comments))
            }
            SyntaxTree::Ust(root) => Ok(root.as_ref().clone()),
        }
    }
}

struct Converter<'s> {
    source: &'s str,
}

impl<'s> Converter<'s> {
    fn text(&self, node: tree_sitter::Node) -> &'s str {
        node_text(node, self.source)
    }

    /// Converted named children; comments are collected separately.
    fn children(&mut self, node: tree_sitter::Node) -> Vec<UstNode> {
        let mut out = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() != "comment" {
                out.push(self.convert(child));
            }
        }
        out
    }

    fn field(&mut self, node: tree_sitter::Node, name: &str) -> Option<UstNode> {
        node.child_by_field_name(name).map(|child| self.convert(child))
    }

    fn convert(&mut self, node: tree_sitter::Node) -> UstNode {
        let span = span_of(node);
        match node.kind() {
            "module" | "block" => UstNode::block(self.children(node), span),
            "expression_statement" => {
                let children = self.children(node);
                UstNode::new(UstKind::ExpressionStatement, span, children)
            }
            "identifier" => UstNode::identifier(self.text(node), span),
            "integer" => match parse_int_literal(self.text(node)) {
                Some(value) => UstNode::int(value, span),
                None => float_or_other(self.text(node), span),
            },
            "float" => float_or_other(self.text(node), span),
            "string" => UstNode::string(string_value(node, self.source), span),
            "concatenated_string" => {
                let mut cursor = node.walk();
                let value: String = node
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "string")
                    .map(|c| string_value(c, self.source))
                    .collect();
                UstNode::string(value, span)
            }
            "true" => UstNode::leaf(UstKind::BoolLiteral { value: true }, span),
            "false" => UstNode::leaf(UstKind::BoolLiteral { value: false }, span),
            "none" => UstNode::null(span),
            "assignment" => {
                let mut children: Vec<UstNode> = self.field(node, "left").into_iter().collect();
                children.extend(self.field(node, "right"));
                UstNode::new(UstKind::Assignment { operator: None }, span, children)
            }
            "augmented_assignment" => {
                let operator = node
                    .child_by_field_name("operator")
                    .map(|op| self.text(op).to_string());
                let mut children: Vec<UstNode> = self.field(node, "left").into_iter().collect();
                children.extend(self.field(node, "right"));
                UstNode::new(UstKind::Assignment { operator }, span, children)
            }
            "keyword_argument" => {
                let mut children: Vec<UstNode> = self.field(node, "name").into_iter().collect();
                children.extend(self.field(node, "value"));
                UstNode::new(UstKind::Assignment { operator: None }, span, children)
            }
            "call" => {
                let target = self.field(node, "function");
                let args = match node.child_by_field_name("arguments") {
                    Some(args) if args.kind() == "argument_list" => {
                        UstNode::args(self.children(args), span_of(args))
                    }
                    Some(other) => {
                        let single = self.convert(other);
                        UstNode::args(vec![single], span_of(other))
                    }
                    None => UstNode::args(Vec::new(), TextSpan::new(span.end(), 0)),
                };
                let mut children: Vec<UstNode> = target.into_iter().collect();
                children.push(args);
                UstNode::new(UstKind::Invocation, span, children)
            }
            "attribute" => {
                let mut children: Vec<UstNode> = self.field(node, "object").into_iter().collect();
                children.extend(self.field(node, "attribute"));
                UstNode::new(UstKind::MemberReference, span, children)
            }
            "binary_operator" | "boolean_operator" => {
                let operator = node
                    .child_by_field_name("operator")
                    .map(|op| self.text(op).to_string())
                    .unwrap_or_default();
                let mut children: Vec<UstNode> = self.field(node, "left").into_iter().collect();
                children.extend(self.field(node, "right"));
                UstNode::new(UstKind::BinaryOperator { operator }, span, children)
            }
            "comparison_operator" => {
                let operator = anonymous_operator(node, self.source);
                let children = self.children(node);
                if children.len() == 2 {
                    UstNode::new(UstKind::BinaryOperator { operator }, span, children)
                } else {
                    UstNode::new(UstKind::Other { name: "comparison".into() }, span, children)
                }
            }
            "unary_operator" => {
                let operator = node
                    .child_by_field_name("operator")
                    .map(|op| self.text(op).to_string())
                    .unwrap_or_default();
                let children: Vec<UstNode> = self.field(node, "argument").into_iter().collect();
                UstNode::new(UstKind::UnaryOperator { operator }, span, children)
            }
            "not_operator" => {
                let children: Vec<UstNode> = self.field(node, "argument").into_iter().collect();
                UstNode::new(UstKind::UnaryOperator { operator: "not".into() }, span, children)
            }
            "parenthesized_expression" => {
                let mut children = self.children(node);
                if children.len() == 1 {
                    children.remove(0)
                } else {
                    UstNode::new(UstKind::Other { name: "parenthesized".into() }, span, children)
                }
            }
            "if_statement" => UstNode::new(UstKind::If, span, self.children(node)),
            "for_statement" | "while_statement" => UstNode::new(UstKind::Loop, span, self.children(node)),
            "return_statement" => UstNode::new(UstKind::Return, span, self.children(node)),
            "function_definition" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| self.text(n).to_string());
                let children: Vec<UstNode> = self.field(node, "body").into_iter().collect();
                UstNode::new(UstKind::FunctionDeclaration { name }, span, children)
            }
            "class_definition" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| self.text(n).to_string());
                let children: Vec<UstNode> = self.field(node, "body").into_iter().collect();
                UstNode::new(UstKind::ClassDeclaration { name }, span, children)
            }
            other => {
                let children = self.children(node);
                UstNode::new(UstKind::Other { name: other.to_string() }, span, children)
            }
        }
    }
}

/// Text between the quotes, prefixes and escapes left as written.
fn string_value(node: tree_sitter::Node, source: &str) -> String {
    let mut cursor = node.walk();
    let parts: Vec<&str> = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "string_content")
        .map(|c| node_text(c, source))
        .collect();
    if !parts.is_empty() {
        return parts.concat();
    }
    let text = node_text(node, source);
    let text = text.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = text.strip_prefix(quote).and_then(|t| t.strip_suffix(quote)) {
            return inner.to_string();
        }
    }
    text.to_string()
}

/// First unnamed child that is not punctuation, e.g. `==` or `not in`.
fn anonymous_operator(node: tree_sitter::Node, source: &str) -> String {
    let mut cursor = node.walk();
    let operators: Vec<&str> = node
        .children(&mut cursor)
        .filter(|c| !c.is_named())
        .map(|c| node_text(c, source))
        .collect();
    operators.join(" ")
}

fn float_or_other(text: &str, span: TextSpan) -> UstNode {
    match text.replace('_', "").trim_end_matches(['j', 'J']).parse::<f64>() {
        Ok(value) => UstNode::leaf(UstKind::FloatLiteral { value }, span),
        Err(_) => UstNode::leaf(UstKind::Other { name: "number".into() }, span),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convert(code: &str) -> RootUst {
        let file = Arc::new(CodeFile::new("test.py", code));
        let tree = PythonParser.parse(&file, &ParseOptions::default()).unwrap();
        assert_eq!(tree.error_count, 0, "{:?}", tree.errors);
        PythonParser.convert(&tree).unwrap()
    }

    fn kinds(root: &RootUst) -> Vec<String> {
        root.node.descendants().iter().map(|n| n.kind.name().to_string()).collect()
    }

    #[test]
    fn converts_assignment() {
        let root = convert("x = 5\n");
        let assign = root
            .node
            .descendants()
            .into_iter()
            .find(|n| matches!(n.kind, UstKind::Assignment { .. }))
            .unwrap();
        assert_eq!(root.file.text(assign.span), "x = 5");
        assert!(matches!(assign.children[0].kind, UstKind::Identifier { ref name } if name == "x"));
        assert!(matches!(assign.children[1].kind, UstKind::IntLiteral { value: 5 }));
    }

    #[test]
    fn converts_calls_and_attributes() {
        let root = convert("os.system(cmd, shell=True)\n");
        let kinds = kinds(&root);
        assert!(kinds.contains(&"invocation".to_string()));
        assert!(kinds.contains(&"member_reference".to_string()));
        assert!(kinds.contains(&"args".to_string()));
        assert!(kinds.contains(&"bool_literal".to_string()));
    }

    #[test]
    fn diverts_comments() {
        let root = convert("# TODO: fix\nx = 1  # trailing\n");
        assert_eq!(root.comments.len(), 2);
        assert!(matches!(root.comments[0].kind, UstKind::Comment { ref text } if text == "# TODO: fix"));
        assert!(!kinds(&root).contains(&"comment".to_string()));
    }

    #[test]
    fn reads_string_contents() {
        let root = convert("password = 'hunter2'\n");
        let value = root.node.descendants().into_iter().find_map(|n| match &n.kind {
            UstKind::StringLiteral { value } => Some(value.clone()),
            _ => None,
        });
        assert_eq!(value.as_deref(), Some("hunter2"));
    }

    #[test]
    fn reports_syntax_errors() {
        let file = Arc::new(CodeFile::new("bad.py", "def (:\n"));
        let tree = PythonParser.parse(&file, &ParseOptions::default()).unwrap();
        assert!(tree.error_count > 0);
    }

    fn comment_texts(root: &RootUst) -> Vec<&str> {
        root.comments.iter().map(|c| root.file.text(c.span)).collect()
    }

    #[test]
    fn keeps_comments_on_headers_and_parameters() {
        let root = convert("def f():  # TODO header\n    pass\n");
        assert_eq!(comment_texts(&root), vec!["# TODO header"]);

        let root = convert("class C:  # FIXME base\n    pass\n");
        assert_eq!(comment_texts(&root), vec!["# FIXME base"]);

        let root = convert("def g(\n    a,  # TODO param\n):\n    pass\n");
        assert_eq!(comment_texts(&root), vec!["# TODO param"]);
    }

    #[test]
    fn keeps_comments_inside_expressions() {
        let root = convert("total = (1 +  # TODO sum\n         2)\n");
        assert_eq!(comment_texts(&root), vec!["# TODO sum"]);
        let assign = root
            .node
            .descendants()
            .into_iter()
            .find(|n| matches!(n.kind, UstKind::Assignment { .. }))
            .unwrap();
        assert!(matches!(assign.children[1].kind, UstKind::BinaryOperator { .. }));
    }
}
