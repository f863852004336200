//! Canonicalization of freshly deserialized pattern trees.
//!
//! Normalization is pure and bottom-up: every rule sees already-normalized
//! children, which keeps the result idempotent.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{PatternKind, PatternNode, PatternRoot};
use crate::error::{MatchError, Result};
use crate::ust::TextSpan;

static WORD_ANCHORED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\^(\w+)\$$").unwrap());

/// A node that could not be normalized.
#[derive(Debug)]
struct Unusable {
    span: TextSpan,
    message: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PatternNormalizer;

impl PatternNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Produce a normalized copy of `root`. A pattern containing a node that
    /// cannot be normalized is logged and rejected.
    pub fn normalize(&self, root: &PatternRoot) -> Result<PatternRoot> {
        match normalize_node(&root.node) {
            Ok(node) => Ok(root.with_node(node)),
            Err(Unusable { span, message }) => {
                tracing::error!(
                    key = %root.key,
                    file = %root.file_name,
                    %span,
                    "pattern normalization failed: {message}"
                );
                Err(MatchError::Conversion {
                    key: root.key.clone(),
                    span,
                    message,
                })
            }
        }
    }

    pub fn normalize_node(&self, node: &PatternNode) -> Result<PatternNode> {
        normalize_node(node).map_err(|Unusable { span, message }| MatchError::Conversion {
            key: String::new(),
            span,
            message,
        })
    }
}

fn normalize_node(node: &PatternNode) -> std::result::Result<PatternNode, Unusable> {
    let span = node.span;
    let kind = match &node.kind {
        PatternKind::Args { args } => {
            let mut out: Vec<PatternNode> = Vec::with_capacity(args.len());
            for arg in args {
                let arg = normalize_node(arg)?;
                let repeated = matches!(arg.kind, PatternKind::MultipleExpressions)
                    && out
                        .last()
                        .is_some_and(|prev| matches!(prev.kind, PatternKind::MultipleExpressions));
                if !repeated {
                    out.push(arg);
                }
            }
            PatternKind::Args { args: out }
        }
        PatternKind::Or { patterns } | PatternKind::And { patterns } => {
            let is_or = matches!(node.kind, PatternKind::Or { .. });
            match patterns.len() {
                0 => {
                    return Err(Unusable {
                        span,
                        message: format!(
                            "{} without operands",
                            if is_or { "Or" } else { "And" }
                        ),
                    })
                }
                1 => return normalize_node(&patterns[0]),
                _ => {
                    let mut operands = patterns
                        .iter()
                        .map(normalize_node)
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    operands.sort();
                    if is_or {
                        PatternKind::Or { patterns: operands }
                    } else {
                        PatternKind::And { patterns: operands }
                    }
                }
            }
        }
        PatternKind::Not { pattern } => {
            let inner = normalize_node(pattern)?;
            if let PatternKind::Not { pattern } = inner.kind {
                return Ok(*pattern);
            }
            PatternKind::Not {
                pattern: Box::new(inner),
            }
        }
        PatternKind::IdRegex { regex } => match WORD_ANCHORED.captures(regex.as_str()) {
            Some(caps) => PatternKind::IdToken {
                id: caps[1].to_string(),
            },
            None => node.kind.clone(),
        },
        PatternKind::IntRange { min, max } => {
            if min > max {
                return Err(Unusable {
                    span,
                    message: format!("inverted integer range {min}..{max}"),
                });
            }
            if min == max {
                PatternKind::IntLiteral { value: *min }
            } else {
                node.kind.clone()
            }
        }
        PatternKind::Assignment { left, right } => PatternKind::Assignment {
            left: boxed(left)?,
            right: right.as_deref().map(normalize_node).transpose()?.map(Box::new),
        },
        PatternKind::Invocation { target, args } => PatternKind::Invocation {
            target: boxed(target)?,
            args: boxed(args)?,
        },
        PatternKind::MemberReference { target, name } => PatternKind::MemberReference {
            target: boxed(target)?,
            name: boxed(name)?,
        },
        PatternKind::BinaryOperator {
            left,
            operator,
            right,
        } => PatternKind::BinaryOperator {
            left: boxed(left)?,
            operator: operator.clone(),
            right: boxed(right)?,
        },
        PatternKind::Return { value } => PatternKind::Return {
            value: value.as_deref().map(normalize_node).transpose()?.map(Box::new),
        },
        PatternKind::Any
        | PatternKind::IdToken { .. }
        | PatternKind::IntLiteral { .. }
        | PatternKind::StringLiteral { .. }
        | PatternKind::StringRegex { .. }
        | PatternKind::BoolLiteral { .. }
        | PatternKind::NullLiteral
        | PatternKind::CommentRegex { .. }
        | PatternKind::MultipleExpressions => node.kind.clone(),
    };
    Ok(PatternNode::with_span(kind, span))
}

fn boxed(node: &PatternNode) -> std::result::Result<Box<PatternNode>, Unusable> {
    normalize_node(node).map(Box::new)
}
