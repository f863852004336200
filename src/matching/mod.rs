//! Matching of compiled patterns against unified trees.

mod context;
pub mod matcher;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::pattern::{PatternKind, PatternLibrary, PatternRoot};
use crate::ust::{CodeFile, Language, RootUst, TextSpan, UstNode};

pub use context::MatchContext;
pub use matcher::match_node;

/// One accepted match.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub file: Arc<CodeFile>,
    pub language: Language,
    pub pattern: Arc<PatternRoot>,
    /// Union of all captured locations.
    pub span: TextSpan,
}

impl MatchResult {
    pub fn matched_code(&self) -> &str {
        self.file.text(self.span)
    }

    pub fn to_dto(&self) -> MatchResultDto {
        MatchResultDto::from(self)
    }
}

/// Serializable view of a [`MatchResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResultDto {
    pub matched_code: String,
    pub begin_line: usize,
    pub begin_column: usize,
    pub end_line: usize,
    pub end_column: usize,
    pub pattern_key: String,
    pub source_file: String,
}

impl From<&MatchResult> for MatchResultDto {
    fn from(result: &MatchResult) -> Self {
        let location = result.span.to_line_column(&result.file.code);
        Self {
            matched_code: result.matched_code().to_string(),
            begin_line: location.begin_line,
            begin_column: location.begin_column,
            end_line: location.end_line,
            end_column: location.end_column,
            pattern_key: result.pattern.key.clone(),
            source_file: result.file.relative_path.clone(),
        }
    }
}

pub struct MatchingEngine {
    diagnostics: Arc<Diagnostics>,
}

impl MatchingEngine {
    pub fn new(diagnostics: Arc<Diagnostics>) -> Self {
        Self { diagnostics }
    }

    /// Match every applicable pattern of `library` against `ust`.
    pub fn match_library(&self, library: &PatternLibrary, ust: &RootUst) -> Vec<MatchResult> {
        let path = ust.file.relative_path.replace('\\', "/");
        library
            .applicable(ust.language, &path)
            .flat_map(|pattern| self.match_pattern(pattern, ust))
            .collect()
    }

    /// All matches of `pattern` in `ust`, in document order.
    pub fn match_pattern(&self, pattern: &Arc<PatternRoot>, ust: &RootUst) -> Vec<MatchResult> {
        let mut results = Vec::new();

        if pattern.node.is_comment_pattern() {
            for comment in &ust.comments {
                self.try_match(pattern, ust, comment, &mut results);
            }
            return results;
        }

        let descend = !matches!(pattern.node.kind, PatternKind::Any);
        let mut stack = vec![&ust.node];
        while let Some(node) = stack.pop() {
            self.try_match(pattern, ust, node, &mut results);
            if descend {
                stack.extend(node.children.iter().rev());
            }
        }
        results
    }

    fn try_match(
        &self,
        pattern: &Arc<PatternRoot>,
        ust: &RootUst,
        node: &UstNode,
        results: &mut Vec<MatchResult>,
    ) {
        let ctx = match_node(&pattern.node, node, MatchContext::new(pattern));
        if !ctx.success() {
            return;
        }
        let span = if ctx.locations().is_empty() {
            node.span
        } else {
            TextSpan::union(ctx.locations().iter().copied())
        };
        let result = MatchResult {
            file: Arc::clone(&ust.file),
            language: ust.language,
            pattern: Arc::clone(pattern),
            span,
        };
        self.diagnostics.match_found(&result);
        results.push(result);
    }
}
