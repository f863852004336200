//! Unified Syntax Tree: the language-independent representation that every
//! front end produces and every pattern is matched against.
//!
//! Nodes own their children. Parent and root back-references are arena
//! indices assigned by [`RootUst::finalize`] in a single pre-order pass.

mod text_span;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use text_span::{count_lines, LineColumnTextSpan, TextSpan};

/// Programming language of a source file or pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    TypeScript,
    JavaScript,
    Json,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "py" | "pyi" => Self::Python,
            "ts" | "tsx" | "mts" | "cts" => Self::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Self::JavaScript,
            "json" => Self::Json,
            _ => Self::Unknown,
        }
    }

    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" => Some(Self::Python),
            "typescript" | "ts" => Some(Self::TypeScript),
            "javascript" | "js" => Some(Self::JavaScript),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Languages patterns can be written for. Only languages with a UST
    /// front end qualify.
    pub fn is_pattern(&self) -> bool {
        matches!(self, Self::Python | Self::TypeScript | Self::JavaScript)
    }

    pub fn all() -> &'static [Language] {
        &[Self::Python, Self::TypeScript, Self::JavaScript, Self::Json]
    }

    pub fn pattern_languages() -> impl Iterator<Item = Language> {
        Self::all().iter().copied().filter(Language::is_pattern)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Python => write!(f, "Python"),
            Self::TypeScript => write!(f, "TypeScript"),
            Self::JavaScript => write!(f, "JavaScript"),
            Self::Json => write!(f, "JSON"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A source buffer plus its path metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeFile {
    /// File name without directories.
    pub name: String,
    /// Path relative to the repository root.
    pub relative_path: String,
    pub root_path: PathBuf,
    pub code: String,
    pub content_hash: String,
}

impl CodeFile {
    pub fn new(relative_path: impl Into<String>, code: impl Into<String>) -> Self {
        let relative_path = relative_path.into();
        let code = code.into();
        let name = relative_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&relative_path)
            .to_string();
        let content_hash = hex::encode(Sha256::digest(code.as_bytes()));
        Self {
            name,
            relative_path,
            root_path: PathBuf::new(),
            code,
            content_hash,
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_path = root.into();
        self
    }

    pub fn full_path(&self) -> PathBuf {
        self.root_path.join(&self.relative_path)
    }

    pub fn extension(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(_, ext)| ext)
    }

    pub fn text(&self, span: TextSpan) -> &str {
        span.slice(&self.code)
    }
}

impl std::fmt::Display for CodeFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.relative_path)
    }
}

/// Construct kinds of the unified tree.
///
/// Child layout is positional per kind: `Assignment` and `BinaryOperator`
/// are `[left, right]`, `Invocation` is `[target, args]`, `MemberReference`
/// is `[target, name]`, `Lock` is `[lock, body]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UstKind {
    Identifier { name: String },
    IntLiteral { value: i64 },
    FloatLiteral { value: f64 },
    StringLiteral { value: String },
    BoolLiteral { value: bool },
    NullLiteral,
    Comment { text: String },
    Assignment { operator: Option<String> },
    BinaryOperator { operator: String },
    UnaryOperator { operator: String },
    Invocation,
    Args,
    MemberReference,
    ExpressionStatement,
    Block,
    If,
    Loop,
    Return,
    FunctionDeclaration { name: Option<String> },
    ClassDeclaration { name: Option<String> },
    Lock,
    Other { name: String },
}

impl UstKind {
    pub fn name(&self) -> &str {
        match self {
            Self::Identifier { .. } => "identifier",
            Self::IntLiteral { .. } => "int_literal",
            Self::FloatLiteral { .. } => "float_literal",
            Self::StringLiteral { .. } => "string_literal",
            Self::BoolLiteral { .. } => "bool_literal",
            Self::NullLiteral => "null_literal",
            Self::Comment { .. } => "comment",
            Self::Assignment { .. } => "assignment",
            Self::BinaryOperator { .. } => "binary_operator",
            Self::UnaryOperator { .. } => "unary_operator",
            Self::Invocation => "invocation",
            Self::Args => "args",
            Self::MemberReference => "member_reference",
            Self::ExpressionStatement => "expression_statement",
            Self::Block => "block",
            Self::If => "if",
            Self::Loop => "loop",
            Self::Return => "return",
            Self::FunctionDeclaration { .. } => "function_declaration",
            Self::ClassDeclaration { .. } => "class_declaration",
            Self::Lock => "lock",
            Self::Other { name } => name,
        }
    }
}

/// One node of the unified tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UstNode {
    pub kind: UstKind,
    pub span: TextSpan,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UstNode>,
    /// Pre-order index assigned by [`RootUst::finalize`].
    #[serde(skip)]
    pub id: usize,
}

impl UstNode {
    pub fn new(kind: UstKind, span: TextSpan, children: Vec<UstNode>) -> Self {
        Self {
            kind,
            span,
            children,
            id: 0,
        }
    }

    pub fn leaf(kind: UstKind, span: TextSpan) -> Self {
        Self::new(kind, span, Vec::new())
    }

    pub fn identifier(name: impl Into<String>, span: TextSpan) -> Self {
        Self::leaf(UstKind::Identifier { name: name.into() }, span)
    }

    pub fn int(value: i64, span: TextSpan) -> Self {
        Self::leaf(UstKind::IntLiteral { value }, span)
    }

    pub fn string(value: impl Into<String>, span: TextSpan) -> Self {
        Self::leaf(
            UstKind::StringLiteral {
                value: value.into(),
            },
            span,
        )
    }

    pub fn null(span: TextSpan) -> Self {
        Self::leaf(UstKind::NullLiteral, span)
    }

    pub fn comment(text: impl Into<String>, span: TextSpan) -> Self {
        Self::leaf(UstKind::Comment { text: text.into() }, span)
    }

    pub fn assignment(left: UstNode, right: UstNode, span: TextSpan) -> Self {
        Self::new(UstKind::Assignment { operator: None }, span, vec![left, right])
    }

    pub fn invocation(target: UstNode, args: UstNode, span: TextSpan) -> Self {
        Self::new(UstKind::Invocation, span, vec![target, args])
    }

    pub fn args(args: Vec<UstNode>, span: TextSpan) -> Self {
        Self::new(UstKind::Args, span, args)
    }

    pub fn block(statements: Vec<UstNode>, span: TextSpan) -> Self {
        Self::new(UstKind::Block, span, statements)
    }

    pub fn child(&self, index: usize) -> Option<&UstNode> {
        self.children.get(index)
    }

    /// Pre-order traversal of this subtree.
    pub fn descendants(&self) -> Vec<&UstNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

/// Root of one file's tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootUst {
    pub file: Arc<CodeFile>,
    pub language: Language,
    pub node: UstNode,
    /// Comment tokens, kept outside the main tree.
    #[serde(default)]
    pub comments: Vec<UstNode>,
    /// `parents[id]` is the parent id of node `id`; `None` for the root.
    #[serde(skip)]
    parents: Vec<Option<usize>>,
}

impl RootUst {
    pub fn new(
        file: Arc<CodeFile>,
        language: Language,
        node: UstNode,
        comments: Vec<UstNode>,
    ) -> Self {
        let mut root = Self {
            file,
            language,
            node,
            comments,
            parents: Vec::new(),
        };
        root.finalize();
        root
    }

    /// Assign node ids and rebuild the parent table. Must be called again
    /// after any structural rewrite.
    pub fn finalize(&mut self) {
        let mut parents = Vec::new();
        assign_ids(&mut self.node, None, &mut parents);
        let root_id = self.node.id;
        for comment in &mut self.comments {
            assign_ids(comment, Some(root_id), &mut parents);
        }
        self.parents = parents;
    }

    pub fn node_count(&self) -> usize {
        self.parents.len()
    }

    pub fn parent_of(&self, id: usize) -> Option<usize> {
        self.parents.get(id).copied().flatten()
    }

    /// Ids from `id`'s parent up to the root.
    pub fn ancestors(&self, id: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut current = self.parent_of(id);
        while let Some(parent) = current {
            out.push(parent);
            current = self.parent_of(parent);
        }
        out
    }

    pub fn find(&self, id: usize) -> Option<&UstNode> {
        std::iter::once(&self.node)
            .chain(self.comments.iter())
            .flat_map(|n| n.descendants())
            .find(|n| n.id == id)
    }
}

fn assign_ids(node: &mut UstNode, parent: Option<usize>, parents: &mut Vec<Option<usize>>) {
    node.id = parents.len();
    parents.push(parent);
    let id = node.id;
    for child in &mut node.children {
        assign_ids(child, Some(id), parents);
    }
}
