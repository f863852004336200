//! Compiled pattern trees.
//!
//! A pattern mirrors the shape of the unified tree but adds wildcard and
//! combinator nodes. Patterns arrive through a [`PatternSerializer`],
//! are canonicalized by the [`PatternNormalizer`] and end up, shared and
//! immutable, in a [`PatternLibrary`].

pub mod library;
pub mod normalizer;
pub mod repository;
pub mod root;
pub mod serializer;

use std::cmp::Ordering;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ust::TextSpan;

pub use library::{PatternDto, PatternLibrary};
pub use normalizer::PatternNormalizer;
pub use repository::{
    DefaultPatternsRepository, FilePatternsRepository, MemoryPatternsRepository,
    PatternsRepository,
};
pub use root::PatternRoot;
pub use serializer::{JsonPatternSerializer, PatternSerializer};

/// A compiled regular expression that remembers its source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegexPattern {
    source: String,
    regex: Regex,
}

impl RegexPattern {
    pub fn new(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let regex = Regex::new(&source)?;
        Ok(Self { source, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl TryFrom<String> for RegexPattern {
    type Error = regex::Error;

    fn try_from(source: String) -> std::result::Result<Self, Self::Error> {
        let regex = Regex::new(&source)?;
        Ok(Self { source, regex })
    }
}

impl From<RegexPattern> for String {
    fn from(pattern: RegexPattern) -> Self {
        pattern.source
    }
}

impl PartialEq for RegexPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for RegexPattern {}

fn unbounded_min() -> i64 {
    i64::MIN
}

fn unbounded_max() -> i64 {
    i64::MAX
}

/// Pattern variants. Construct matchers (`Assignment`, `Invocation`, ...)
/// parallel the corresponding [`UstKind`](crate::ust::UstKind) variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PatternKind {
    /// Matches any single subtree.
    Any,
    IdToken {
        id: String,
    },
    IdRegex {
        regex: RegexPattern,
    },
    IntLiteral {
        value: i64,
    },
    /// Half-open `[min, max)`; `i64::MIN`/`i64::MAX` mean unbounded.
    IntRange {
        #[serde(default = "unbounded_min")]
        min: i64,
        #[serde(default = "unbounded_max")]
        max: i64,
    },
    StringLiteral {
        value: String,
    },
    StringRegex {
        regex: RegexPattern,
    },
    BoolLiteral {
        value: bool,
    },
    NullLiteral,
    /// Matched against comment tokens instead of the tree.
    CommentRegex {
        regex: RegexPattern,
    },
    Or {
        patterns: Vec<PatternNode>,
    },
    And {
        patterns: Vec<PatternNode>,
    },
    Not {
        pattern: Box<PatternNode>,
    },
    Args {
        args: Vec<PatternNode>,
    },
    /// Zero or more arguments inside `Args`.
    MultipleExpressions,
    Assignment {
        left: Box<PatternNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        right: Option<Box<PatternNode>>,
    },
    Invocation {
        target: Box<PatternNode>,
        args: Box<PatternNode>,
    },
    MemberReference {
        target: Box<PatternNode>,
        name: Box<PatternNode>,
    },
    BinaryOperator {
        left: Box<PatternNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operator: Option<String>,
        right: Box<PatternNode>,
    },
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Box<PatternNode>>,
    },
}

impl PatternKind {
    /// Variant position, the first key of the canonical order.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Any => 0,
            Self::IdToken { .. } => 1,
            Self::IdRegex { .. } => 2,
            Self::IntLiteral { .. } => 3,
            Self::IntRange { .. } => 4,
            Self::StringLiteral { .. } => 5,
            Self::StringRegex { .. } => 6,
            Self::BoolLiteral { .. } => 7,
            Self::NullLiteral => 8,
            Self::CommentRegex { .. } => 9,
            Self::Or { .. } => 10,
            Self::And { .. } => 11,
            Self::Not { .. } => 12,
            Self::Args { .. } => 13,
            Self::MultipleExpressions => 14,
            Self::Assignment { .. } => 15,
            Self::Invocation { .. } => 16,
            Self::MemberReference { .. } => 17,
            Self::BinaryOperator { .. } => 18,
            Self::Return { .. } => 19,
        }
    }
}

/// One node of a pattern tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternNode {
    #[serde(flatten)]
    pub kind: PatternKind,
    #[serde(default, skip_serializing_if = "TextSpan::is_empty")]
    pub span: TextSpan,
}

impl PatternNode {
    pub fn new(kind: PatternKind) -> Self {
        Self {
            kind,
            span: TextSpan::default(),
        }
    }

    pub fn with_span(kind: PatternKind, span: TextSpan) -> Self {
        Self { kind, span }
    }

    pub fn any() -> Self {
        Self::new(PatternKind::Any)
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self::new(PatternKind::IdToken { id: id.into() })
    }

    pub fn id_regex(regex: &str) -> Result<Self> {
        Ok(Self::new(PatternKind::IdRegex {
            regex: RegexPattern::new(regex)?,
        }))
    }

    pub fn comment_regex(regex: &str) -> Result<Self> {
        Ok(Self::new(PatternKind::CommentRegex {
            regex: RegexPattern::new(regex)?,
        }))
    }

    pub fn int(value: i64) -> Self {
        Self::new(PatternKind::IntLiteral { value })
    }

    pub fn int_range(min: i64, max: i64) -> Self {
        Self::new(PatternKind::IntRange { min, max })
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(PatternKind::StringLiteral {
            value: value.into(),
        })
    }

    pub fn null() -> Self {
        Self::new(PatternKind::NullLiteral)
    }

    pub fn or(patterns: Vec<PatternNode>) -> Self {
        Self::new(PatternKind::Or { patterns })
    }

    pub fn and(patterns: Vec<PatternNode>) -> Self {
        Self::new(PatternKind::And { patterns })
    }

    pub fn not(pattern: PatternNode) -> Self {
        Self::new(PatternKind::Not {
            pattern: Box::new(pattern),
        })
    }

    pub fn args(args: Vec<PatternNode>) -> Self {
        Self::new(PatternKind::Args { args })
    }

    pub fn multiple_expressions() -> Self {
        Self::new(PatternKind::MultipleExpressions)
    }

    pub fn assignment(left: PatternNode, right: PatternNode) -> Self {
        Self::new(PatternKind::Assignment {
            left: Box::new(left),
            right: Some(Box::new(right)),
        })
    }

    pub fn invocation(target: PatternNode, args: PatternNode) -> Self {
        Self::new(PatternKind::Invocation {
            target: Box::new(target),
            args: Box::new(args),
        })
    }

    /// Sub-patterns in declaration order.
    pub fn children(&self) -> Vec<&PatternNode> {
        match &self.kind {
            PatternKind::Or { patterns } | PatternKind::And { patterns } => {
                patterns.iter().collect()
            }
            PatternKind::Args { args } => args.iter().collect(),
            PatternKind::Not { pattern } => vec![pattern.as_ref()],
            PatternKind::Assignment { left, right } => {
                let mut out = vec![left.as_ref()];
                out.extend(right.as_deref());
                out
            }
            PatternKind::Invocation { target, args } => vec![target.as_ref(), args.as_ref()],
            PatternKind::MemberReference { target, name } => vec![target.as_ref(), name.as_ref()],
            PatternKind::BinaryOperator { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            PatternKind::Return { value } => value.as_deref().into_iter().collect(),
            PatternKind::Any
            | PatternKind::IdToken { .. }
            | PatternKind::IdRegex { .. }
            | PatternKind::IntLiteral { .. }
            | PatternKind::IntRange { .. }
            | PatternKind::StringLiteral { .. }
            | PatternKind::StringRegex { .. }
            | PatternKind::BoolLiteral { .. }
            | PatternKind::NullLiteral
            | PatternKind::CommentRegex { .. }
            | PatternKind::MultipleExpressions => Vec::new(),
        }
    }

    /// Pre-order traversal of this pattern tree.
    pub fn descendants(&self) -> Vec<&PatternNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children().into_iter().rev());
        }
        out
    }

    /// Comment patterns are matched against comment tokens, not the tree.
    pub fn is_comment_pattern(&self) -> bool {
        match &self.kind {
            PatternKind::CommentRegex { .. } => true,
            PatternKind::Or { patterns } => patterns
                .iter()
                .any(|p| matches!(p.kind, PatternKind::CommentRegex { .. })),
            _ => false,
        }
    }
}

impl std::fmt::Display for PatternNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            PatternKind::Any => write!(f, "#"),
            PatternKind::IdToken { id } => write!(f, "{id}"),
            PatternKind::IdRegex { regex } => write!(f, "<[{}]>", regex.as_str()),
            PatternKind::IntLiteral { value } => write!(f, "{value}"),
            PatternKind::IntRange { min, max } => {
                let range = match (*min == i64::MIN, *max == i64::MAX) {
                    (true, true) => String::new(),
                    (true, false) => format!("..{max}"),
                    (false, true) => format!("{min}.."),
                    (false, false) if min == max => format!("{min}"),
                    (false, false) => format!("{min}..{max}"),
                };
                write!(f, "<({range})>")
            }
            PatternKind::StringLiteral { value } => write!(f, "\"{value}\""),
            PatternKind::StringRegex { regex } => write!(f, "<\"{}\">", regex.as_str()),
            PatternKind::BoolLiteral { value } => write!(f, "{value}"),
            PatternKind::NullLiteral => write!(f, "null"),
            PatternKind::CommentRegex { regex } => write!(f, "</*{}*/>", regex.as_str()),
            PatternKind::Or { patterns } => write_joined(f, patterns, " <|> ", true),
            PatternKind::And { patterns } => write_joined(f, patterns, " <&> ", true),
            PatternKind::Not { pattern } => write!(f, "<~>{pattern}"),
            PatternKind::Args { args } => write_joined(f, args, ", ", false),
            PatternKind::MultipleExpressions => write!(f, "#*"),
            PatternKind::Assignment { left, right } => match right {
                Some(right) => write!(f, "{left} = {right}"),
                None => write!(f, "{left}"),
            },
            PatternKind::Invocation { target, args } => write!(f, "{target}({args})"),
            PatternKind::MemberReference { target, name } => write!(f, "{target}.{name}"),
            PatternKind::BinaryOperator {
                left,
                operator,
                right,
            } => write!(f, "{left} {} {right}", operator.as_deref().unwrap_or("<op>")),
            PatternKind::Return { value } => match value {
                Some(value) => write!(f, "return {value}"),
                None => write!(f, "return"),
            },
        }
    }
}

fn write_joined(
    f: &mut std::fmt::Formatter<'_>,
    nodes: &[PatternNode],
    separator: &str,
    parenthesize: bool,
) -> std::fmt::Result {
    if parenthesize {
        write!(f, "(")?;
    }
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            write!(f, "{separator}")?;
        }
        write!(f, "{node}")?;
    }
    if parenthesize {
        write!(f, ")")?;
    }
    Ok(())
}

// Canonical order: variant tag, then rendering, then children. Spans are
// not part of a pattern's identity.
impl Ord for PatternNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind
            .tag()
            .cmp(&other.kind.tag())
            .then_with(|| self.to_string().cmp(&other.to_string()))
            .then_with(|| self.children().cmp(&other.children()))
    }
}

impl PartialOrd for PatternNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PatternNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PatternNode {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_dsl_like_text() {
        let pattern = PatternNode::assignment(PatternNode::id("x"), PatternNode::int(5));
        assert_eq!(pattern.to_string(), "x = 5");

        let call = PatternNode::invocation(
            PatternNode::id("eval"),
            PatternNode::args(vec![PatternNode::multiple_expressions(), PatternNode::any()]),
        );
        assert_eq!(call.to_string(), "eval(#*, #)");
        assert_eq!(PatternNode::int_range(i64::MIN, 10).to_string(), "<(..10)>");
    }

    #[test]
    fn order_is_tag_first() {
        // IdToken (1) sorts before IntLiteral (3) whatever the text
        assert!(PatternNode::id("zzz") < PatternNode::int(0));
        assert!(PatternNode::id("a") < PatternNode::id("b"));
    }

    #[test]
    fn equality_ignores_spans() {
        let a = PatternNode::with_span(
            PatternKind::IdToken { id: "x".into() },
            TextSpan::new(3, 1),
        );
        assert_eq!(a, PatternNode::id("x"));
    }

    #[test]
    fn detects_comment_patterns() {
        let comment = PatternNode::comment_regex("TODO").unwrap();
        assert!(comment.is_comment_pattern());
        assert!(PatternNode::or(vec![PatternNode::id("a"), comment]).is_comment_pattern());
        assert!(!PatternNode::id("a").is_comment_pattern());
    }

    #[test]
    fn deserializes_tagged_json() {
        let json = r#"{
            "kind": "Assignment",
            "left": { "kind": "IdToken", "id": "x" },
            "right": { "kind": "IntRange", "min": 1 },
            "span": { "start": 2, "length": 3 }
        }"#;
        let node: PatternNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.span, TextSpan::new(2, 3));
        match &node.kind {
            PatternKind::Assignment { right: Some(right), .. } => {
                assert!(matches!(
                    right.kind,
                    PatternKind::IntRange { min: 1, max: i64::MAX }
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_regex() {
        let json = r#"{ "kind": "IdRegex", "regex": "(" }"#;
        assert!(serde_json::from_str::<PatternNode>(json).is_err());
    }

    #[test]
    fn descendants_are_preorder() {
        let pattern = PatternNode::assignment(
            PatternNode::id("a"),
            PatternNode::or(vec![PatternNode::int(1), PatternNode::int(2)]),
        );
        let rendered: Vec<String> = pattern.descendants().iter().map(|n| n.to_string()).collect();
        assert_eq!(rendered, vec!["a = (1 <|> 2)", "a", "(1 <|> 2)", "1", "2"]);
    }
}
