use std::sync::Arc;

use super::{collect_comments, node_text, parse_int_literal, parse_tree_sitter, span_of, LanguageParser, ParseOptions, ParseTree, SyntaxTree};
use crate::error::Result;
use crate::ust::{CodeFile, Language, RootUst, TextSpan, UstKind, UstNode};

/// Front end for TypeScript and JavaScript. Both are parsed with the
/// tree-sitter TypeScript grammars; `.tsx`/`.jsx` files and plain
/// JavaScript use the TSX dialect.
pub struct TypeScriptParser {
    language: Language,
}

impl TypeScriptParser {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    fn uses_tsx(&self, file: &CodeFile) -> bool {
        match file.extension().map(str::to_ascii_lowercase).as_deref() {
            Some("tsx") | Some("jsx") => true,
            Some("ts") | Some("mts") | Some("cts") => false,
            _ => self.language == Language::JavaScript,
        }
    }
}

impl LanguageParser for TypeScriptParser {
    fn language(&self) -> Language {
        self.language
    }

    fn grammar(&self) -> &str {
        "typescript"
    }

    fn parse(&self, file: &Arc<CodeFile>, options: &ParseOptions) -> Result<ParseTree> {
        let grammar = if self.uses_tsx(file) {
            tree_sitter_typescript::LANGUAGE_TSX
        } else {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT
        };
        parse_tree_sitter(&grammar.into(), self.language, file, options)
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
                Ok(RootUst::new(Arc::clone(&tree.file), tree.language, node, comments))
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

    fn pair(&mut self, node: tree_sitter::Node, first: &str, second: &str) -> Vec<UstNode> {
        let mut children: Vec<UstNode> = self.field(node, first).into_iter().collect();
        children.extend(self.field(node, second));
        children
    }

    fn operator(&self, node: tree_sitter::Node) -> String {
        node.child_by_field_name("operator")
            .map(|op| self.text(op).to_string())
            .unwrap_or_default()
    }

    fn name(&self, node: tree_sitter::Node) -> Option<String> {
        node.child_by_field_name("name")
            .map(|n| self.text(n).to_string())
    }

    fn convert(&mut self, node: tree_sitter::Node) -> UstNode {
        let span = span_of(node);
        match node.kind() {
            "program" | "statement_block" | "class_body" => UstNode::block(self.children(node), span),
            "expression_statement" => {
                let children = self.children(node);
                UstNode::new(UstKind::ExpressionStatement, span, children)
            }
            "identifier" | "property_identifier" | "shorthand_property_identifier"
            | "private_property_identifier" | "type_identifier" | "this" | "super" => {
                UstNode::identifier(self.text(node), span)
            }
            "number" => {
                let text = self.text(node);
                match parse_int_literal(text) {
                    Some(value) => UstNode::int(value, span),
                    None => match text.replace('_', "").parse::<f64>() {
                        Ok(value) => UstNode::leaf(UstKind::FloatLiteral { value }, span),
                        Err(_) => UstNode::leaf(UstKind::Other { name: "number".into() }, span),
                    },
                }
            }
            "string" => UstNode::string(string_value(node, self.source), span),
            "template_string" => {
                let mut cursor = node.walk();
                let substituted = node
                    .named_children(&mut cursor)
                    .any(|c| c.kind() == "template_substitution");
                if substituted {
                    let children = self.children(node);
                    UstNode::new(UstKind::Other { name: "template_string".into() }, span, children)
                } else {
                    let text = self.text(node);
                    UstNode::string(text.trim_matches('`'), span)
                }
            }
            "true" => UstNode::leaf(UstKind::BoolLiteral { value: true }, span),
            "false" => UstNode::leaf(UstKind::BoolLiteral { value: false }, span),
            "null" | "undefined" => UstNode::null(span),
            "assignment_expression" => {
                let children = self.pair(node, "left", "right");
                UstNode::new(UstKind::Assignment { operator: None }, span, children)
            }
            "augmented_assignment_expression" => {
                let operator = Some(self.operator(node));
                let children = self.pair(node, "left", "right");
                UstNode::new(UstKind::Assignment { operator }, span, children)
            }
            "variable_declarator" => {
                let children = self.pair(node, "name", "value");
                UstNode::new(UstKind::Assignment { operator: None }, span, children)
            }
            "call_expression" | "new_expression" => {
                let target_field = if node.kind() == "new_expression" {
                    "constructor"
                } else {
                    "function"
                };
                let target = self.field(node, target_field);
                let args = match node.child_by_field_name("arguments") {
                    Some(args) if args.kind() == "arguments" => {
                        UstNode::args(self.children(args), span_of(args))
                    }
                    // tagged template: fn`text`
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
            "member_expression" => {
                let children = self.pair(node, "object", "property");
                UstNode::new(UstKind::MemberReference, span, children)
            }
            "binary_expression" => {
                let operator = self.operator(node);
                let children = self.pair(node, "left", "right");
                UstNode::new(UstKind::BinaryOperator { operator }, span, children)
            }
            "unary_expression" | "update_expression" => {
                let operator = self.operator(node);
                let children: Vec<UstNode> = self.field(node, "argument").into_iter().collect();
                UstNode::new(UstKind::UnaryOperator { operator }, span, children)
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
            "for_statement" | "for_in_statement" | "while_statement" | "do_statement" => {
                UstNode::new(UstKind::Loop, span, self.children(node))
            }
            "return_statement" => UstNode::new(UstKind::Return, span, self.children(node)),
            "function_declaration" | "function_expression" | "function" | "generator_function_declaration"
            | "method_definition" | "arrow_function" => {
                let name = self.name(node);
                let children: Vec<UstNode> = self.field(node, "body").into_iter().collect();
                UstNode::new(UstKind::FunctionDeclaration { name }, span, children)
            }
            "class_declaration" | "class" | "abstract_class_declaration" => {
                let name = self.name(node);
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

/// Text between the quotes.
fn string_value(node: tree_sitter::Node, source: &str) -> String {
    let text = node_text(node, source);
    for quote in ['"', '\''] {
        if let Some(inner) = text.strip_prefix(quote).and_then(|t| t.strip_suffix(quote)) {
            return inner.to_string();
        }
    }
    text.to_string()
}
