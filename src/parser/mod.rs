//! Language front ends: parse a file and convert the result to a
//! [`RootUst`].

#[cfg(feature = "python")]
pub mod python;
#[cfg(feature = "typescript")]
pub mod typescript;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{MatchError, Result};
use crate::ust::{CodeFile, Language, RootUst, TextSpan, UstNode};

/// Rough heap cost of one tree-sitter node, used against the memory budget.
pub const TREE_NODE_BYTES: usize = 64;

/// Knobs passed to every parse call.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Wall-clock budget for a single parse.
    pub timeout: Option<Duration>,
    /// Non-zero means stop parsing as soon as possible.
    pub cancellation: Option<Arc<AtomicUsize>>,
    /// Upper bound, in bytes, on source plus estimated tree size.
    pub memory_budget: Option<usize>,
}

impl ParseOptions {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed) != 0)
    }
}

/// Front-end timing split, when the parser reports one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseTimings {
    pub lexer: Duration,
    pub parser: Duration,
}

#[derive(Debug, Clone)]
pub enum SyntaxTree {
    TreeSitter(tree_sitter::Tree),
    /// Front ends that build the unified tree directly.
    Ust(Box<RootUst>),
}

/// Raw parser output for one file.
#[derive(Debug, Clone)]
pub struct ParseTree {
    pub language: Language,
    pub file: Arc<CodeFile>,
    pub syntax: SyntaxTree,
    pub error_count: usize,
    pub errors: Vec<String>,
    pub timings: ParseTimings,
}

/// A parser/converter pair for one language.
pub trait LanguageParser: Send + Sync {
    fn language(&self) -> Language;

    /// Languages whose parsers report the same grammar are parsed once
    /// during detection.
    fn grammar(&self) -> &str;

    fn parse(&self, file: &Arc<CodeFile>, options: &ParseOptions) -> Result<ParseTree>;

    fn convert(&self, tree: &ParseTree) -> Result<RootUst>;
}

/// Registered front ends, keyed by language.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: BTreeMap<Language, Arc<dyn LanguageParser>>,
}

impl ParserRegistry {
    /// Registry with every front end compiled into this build.
    pub fn new() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::empty();
        #[cfg(feature = "python")]
        registry.register(Arc::new(python::PythonParser));
        #[cfg(feature = "typescript")]
        {
            registry.register(Arc::new(typescript::TypeScriptParser::new(Language::TypeScript)));
            registry.register(Arc::new(typescript::TypeScriptParser::new(Language::JavaScript)));
        }
        registry
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register(&mut self, parser: Arc<dyn LanguageParser>) {
        self.parsers.insert(parser.language(), parser);
    }

    pub fn get(&self, language: Language) -> Option<Arc<dyn LanguageParser>> {
        self.parsers.get(&language).cloned()
    }

    pub fn languages(&self) -> impl Iterator<Item = Language> + '_ {
        self.parsers.keys().copied()
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.parsers.keys()).finish()
    }
}

/// Run a tree-sitter parse honoring the timeout and cancellation flag.
#[cfg(any(feature = "python", feature = "typescript"))]
pub(crate) fn parse_tree_sitter(
    grammar: &tree_sitter::Language,
    language: Language,
    file: &Arc<CodeFile>,
    options: &ParseOptions,
) -> Result<ParseTree> {
    if let Some(budget) = options.memory_budget {
        if file.code.len() > budget {
            return Err(MatchError::parsing(
                &file.relative_path,
                format!("source of {} bytes exceeds the {budget} byte memory budget", file.code.len()),
            ));
        }
    }

    let flag = options.cancellation.clone();
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(grammar)
        .map_err(|e| MatchError::parsing(&file.relative_path, format!("failed to load {language} grammar: {e}")))?;
    if let Some(timeout) = options.timeout {
        parser.set_timeout_micros(timeout.as_micros().min(u64::MAX as u128) as u64);
    }
    // SAFETY: `flag` is declared before `parser` and outlives it.
    unsafe {
        parser.set_cancellation_flag(flag.as_deref());
    }

    let started = Instant::now();
    let tree = parser.parse(&file.code, None);
    let elapsed = started.elapsed();

    let Some(tree) = tree else {
        if options.is_cancelled() {
            return Err(MatchError::Cancelled);
        }
        return Err(MatchError::parsing(
            &file.relative_path,
            format!("{language} parse timed out after {elapsed:?}"),
        ));
    };

    if let Some(budget) = options.memory_budget {
        let estimated = file.code.len() + tree.root_node().descendant_count() * TREE_NODE_BYTES;
        if estimated > budget {
            return Err(MatchError::parsing(
                &file.relative_path,
                format!("{language} tree needs about {estimated} bytes, over the {budget} byte memory budget"),
            ));
        }
    }

    let errors = collect_syntax_errors(&tree, &file.code);
    Ok(ParseTree {
        language,
        file: Arc::clone(file),
        syntax: SyntaxTree::TreeSitter(tree),
        error_count: errors.len(),
        errors,
        timings: ParseTimings {
            lexer: Duration::ZERO,
            parser: elapsed,
        },
    })
}

/// ERROR and MISSING nodes, rendered as `line:col` messages.
#[cfg(any(feature = "python", feature = "typescript"))]
fn collect_syntax_errors(tree: &tree_sitter::Tree, code: &str) -> Vec<String> {
    let root = tree.root_node();
    if !root.has_error() {
        return Vec::new();
    }
    let mut errors = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let location = span_of(node).to_line_column(code);
            let what = if node.is_missing() { "missing" } else { "unexpected" };
            errors.push(format!("{location}: {what} {}", node.kind()));
            continue;
        }
        if node.has_error() {
            let mut cursor = node.walk();
            stack.extend(node.children(&mut cursor));
        }
    }
    errors
}

/// Every `comment` node under `root`, in document order. Comments are
/// extras and may sit below any node, including ones the converters skip.
#[cfg(any(feature = "python", feature = "typescript"))]
pub(crate) fn collect_comments(root: tree_sitter::Node, source: &str) -> Vec<UstNode> {
    let mut comments = Vec::new();
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.kind() == "comment" {
            comments.push(UstNode::comment(node_text(node, source), span_of(node)));
        } else if cursor.goto_first_child() {
            continue;
        }
        while !cursor.goto_next_sibling() {
            if !cursor.goto_parent() {
                return comments;
            }
        }
    }
}

#[cfg(any(feature = "python", feature = "typescript"))]
pub(crate) fn span_of(node: tree_sitter::Node) -> TextSpan {
    TextSpan::from_bounds(node.start_byte(), node.end_byte())
}

#[cfg(any(feature = "python", feature = "typescript"))]
pub(crate) fn node_text<'a>(node: tree_sitter::Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// Integer literal text to a value: decimal, hex, octal, binary, with
/// `_` separators.
pub(crate) fn parse_int_literal(text: &str) -> Option<i64> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .trim_end_matches(['n', 'l', 'L'])
        .to_lowercase();
    let (digits, radix) = if let Some(rest) = cleaned.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = cleaned.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = cleaned.strip_prefix("0b") {
        (rest, 2)
    } else {
        (cleaned.as_str(), 10)
    };
    i64::from_str_radix(digits, radix).ok()
}
