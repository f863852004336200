use std::collections::BTreeSet;

use once_cell::sync::OnceCell;
use regex::Regex;

use super::PatternNode;
use crate::error::{MatchError, Result};
use crate::ust::Language;

/// A named, language-scoped pattern ready for matching.
#[derive(Debug, Clone)]
pub struct PatternRoot {
    pub key: String,
    /// Source the pattern was loaded from, used in diagnostics.
    pub file_name: String,
    pub filename_wildcard: Option<String>,
    pub data_format: String,
    pub description: String,
    pub node: PatternNode,
    languages: BTreeSet<Language>,
    /// `parents[i]` is the pre-order index of node `i`'s parent.
    parents: Vec<Option<usize>>,
    wildcard_regex: OnceCell<Option<Regex>>,
}

impl PatternRoot {
    pub fn new(key: impl Into<String>, node: PatternNode) -> Self {
        let mut root = Self {
            key: key.into(),
            file_name: String::new(),
            filename_wildcard: None,
            data_format: "Json".into(),
            description: String::new(),
            node,
            languages: Language::pattern_languages().collect(),
            parents: Vec::new(),
            wildcard_regex: OnceCell::new(),
        };
        root.fill_ascendants();
        root
    }

    /// Copy of this root's metadata around a different tree.
    pub fn with_node(&self, node: PatternNode) -> Self {
        let mut root = Self {
            key: self.key.clone(),
            file_name: self.file_name.clone(),
            filename_wildcard: self.filename_wildcard.clone(),
            data_format: self.data_format.clone(),
            description: self.description.clone(),
            node,
            languages: self.languages.clone(),
            parents: Vec::new(),
            wildcard_regex: OnceCell::new(),
        };
        root.fill_ascendants();
        root
    }

    pub fn languages(&self) -> &BTreeSet<Language> {
        &self.languages
    }

    /// Restrict the pattern to `languages`. An empty list means every
    /// pattern-capable language.
    pub fn set_languages<I>(&mut self, languages: I) -> Result<()>
    where
        I: IntoIterator<Item = Language>,
    {
        let languages: BTreeSet<Language> = languages.into_iter().collect();
        if let Some(bad) = languages.iter().find(|l| !l.is_pattern()) {
            return Err(MatchError::PatternCompile(format!(
                "{bad} is not a pattern language (pattern {})",
                self.key
            )));
        }
        if languages.is_empty() {
            tracing::info!(key = %self.key, "no languages given, using all pattern languages");
            self.languages = Language::pattern_languages().collect();
        } else {
            self.languages = languages;
        }
        Ok(())
    }

    pub fn set_filename_wildcard(&mut self, wildcard: Option<String>) {
        self.filename_wildcard = wildcard.filter(|w| !w.trim().is_empty());
        self.wildcard_regex = OnceCell::new();
    }

    /// Recompute the pre-order parent table.
    pub fn fill_ascendants(&mut self) {
        let mut parents = Vec::new();
        let mut stack = vec![(&self.node, None)];
        while let Some((node, parent)) = stack.pop() {
            let id = parents.len();
            parents.push(parent);
            for child in node.children().into_iter().rev() {
                stack.push((child, Some(id)));
            }
        }
        self.parents = parents;
    }

    pub fn node_count(&self) -> usize {
        self.parents.len()
    }

    pub fn parent_of(&self, index: usize) -> Option<usize> {
        self.parents.get(index).copied().flatten()
    }

    /// Whether this pattern should run against `file_name` written in
    /// `language`.
    pub fn applies_to(&self, language: Language, file_name: &str) -> bool {
        if !self.languages.contains(&language) {
            return false;
        }
        match self.wildcard() {
            Some(regex) => regex.is_match(file_name),
            None => true,
        }
    }

    fn wildcard(&self) -> Option<&Regex> {
        self.wildcard_regex
            .get_or_init(|| {
                let wildcard = self.filename_wildcard.as_deref()?;
                match Regex::new(&wildcard_to_regex(wildcard)) {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        tracing::warn!(key = %self.key, wildcard, error = %e, "invalid filename wildcard");
                        None
                    }
                }
            })
            .as_ref()
    }
}

impl std::fmt::Display for PatternRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}", self.description)
        }
    }
}

/// Translate a filename glob to an anchored, case-insensitive regex.
/// `**` crosses directories, `*` does not.
pub fn wildcard_to_regex(wildcard: &str) -> String {
    let mut out = String::from("(?i)^");
    let mut chars = wildcard.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str(r"[^/\\]*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_languages_means_all_pattern_languages() {
        let mut root = PatternRoot::new("p", PatternNode::any());
        root.set_languages(Vec::new()).unwrap();
        assert_eq!(root.languages().len(), 3);
        assert!(!root.languages().contains(&Language::Json));
    }

    #[test]
    fn rejects_non_pattern_language() {
        let mut root = PatternRoot::new("p", PatternNode::any());
        let err = root.set_languages([Language::Json]).unwrap_err();
        assert!(matches!(err, MatchError::PatternCompile(_)));
    }

    #[test]
    fn wildcard_filters_file_names() {
        let mut root = PatternRoot::new("p", PatternNode::any());
        root.set_filename_wildcard(Some("*.test.ts".into()));
        assert!(root.applies_to(Language::TypeScript, "app.test.ts"));
        assert!(root.applies_to(Language::TypeScript, "APP.TEST.TS"));
        assert!(!root.applies_to(Language::TypeScript, "app.ts"));
        assert!(!root.applies_to(Language::TypeScript, "dir/app.test.ts"));

        root.set_filename_wildcard(Some("**/*.py".into()));
        assert!(root.applies_to(Language::Python, "a/b/c.py"));
    }

    #[test]
    fn language_scope_is_checked_first() {
        let mut root = PatternRoot::new("p", PatternNode::any());
        root.set_languages([Language::Python]).unwrap();
        assert!(!root.applies_to(Language::TypeScript, "x.py"));
    }

    #[test]
    fn parent_table_is_preorder() {
        let node = PatternNode::assignment(
            PatternNode::id("a"),
            PatternNode::or(vec![PatternNode::int(1), PatternNode::int(2)]),
        );
        let root = PatternRoot::new("p", node);
        assert_eq!(root.node_count(), 5);
        assert_eq!(root.parent_of(0), None);
        assert_eq!(root.parent_of(1), Some(0));
        assert_eq!(root.parent_of(3), Some(2));
        assert_eq!(root.parent_of(4), Some(2));
    }
}
