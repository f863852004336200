//! Optional rewrites applied to a converted tree before matching.

use crate::error::Result;
use crate::ust::{RootUst, UstKind, UstNode};

pub trait UstPreprocessor: Send + Sync {
    fn name(&self) -> &str;

    fn preprocess(&self, ust: RootUst) -> Result<RootUst>;
}

/// Folds constant expressions so patterns see their values:
/// `"a" + "b"` becomes `"ab"` and `-(5)` becomes `-5`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralFolder;

impl UstPreprocessor for LiteralFolder {
    fn name(&self) -> &str {
        "literal-folder"
    }

    fn preprocess(&self, mut ust: RootUst) -> Result<RootUst> {
        let before = ust.node_count();
        fold(&mut ust.node);
        ust.finalize();
        tracing::trace!(
            file = %ust.file.relative_path,
            before,
            after = ust.node_count(),
            "literals folded"
        );
        Ok(ust)
    }
}

fn fold(node: &mut UstNode) {
    for child in &mut node.children {
        fold(child);
    }

    let folded = match (&node.kind, node.children.as_slice()) {
        (UstKind::BinaryOperator { operator }, [left, right]) if operator == "+" => {
            match (&left.kind, &right.kind) {
                (UstKind::StringLiteral { value: a }, UstKind::StringLiteral { value: b }) => {
                    Some(UstKind::StringLiteral {
                        value: format!("{a}{b}"),
                    })
                }
                _ => None,
            }
        }
        (UstKind::UnaryOperator { operator }, [operand]) if operator == "-" => match operand.kind {
            UstKind::IntLiteral { value } => value
                .checked_neg()
                .map(|value| UstKind::IntLiteral { value }),
            UstKind::FloatLiteral { value } => Some(UstKind::FloatLiteral { value: -value }),
            _ => None,
        },
        _ => None,
    };

    if let Some(kind) = folded {
        node.kind = kind;
        node.children.clear();
    }
}
