use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use super::{JsonPatternSerializer, PatternNormalizer, PatternRoot, PatternSerializer};
use crate::error::{MatchError, Result};
use crate::ust::Language;

fn default_data_format() -> String {
    "Json".into()
}

/// Accept either a serialized pattern string or an inline JSON object.
fn string_or_object<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

/// Description of one pattern as stored in a pattern source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDto {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "string_or_object")]
    pub value: String,
    #[serde(default = "default_data_format")]
    pub data_format: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename_wildcard: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl PatternDto {
    pub fn json(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: String::new(),
            value: value.into(),
            data_format: default_data_format(),
            languages: Vec::new(),
            filename_wildcard: None,
            description: String::new(),
        }
    }
}

/// Normalized patterns, compiled once and shared read-only by all workers.
#[derive(Debug, Clone, Default)]
pub struct PatternLibrary {
    patterns: Vec<Arc<PatternRoot>>,
}

impl PatternLibrary {
    pub fn new(patterns: Vec<PatternRoot>) -> Self {
        Self {
            patterns: patterns.into_iter().map(Arc::new).collect(),
        }
    }

    /// Compile with the built-in JSON serializer.
    pub fn compile(dtos: &[PatternDto]) -> (Self, Vec<MatchError>) {
        let serializers: Vec<Box<dyn PatternSerializer>> =
            vec![Box::new(JsonPatternSerializer::default())];
        Self::compile_with(dtos, &serializers)
    }

    /// Deserialize, scope and normalize every description. Patterns that
    /// fail are dropped and their errors returned alongside the library.
    pub fn compile_with(
        dtos: &[PatternDto],
        serializers: &[Box<dyn PatternSerializer>],
    ) -> (Self, Vec<MatchError>) {
        let normalizer = PatternNormalizer::new();
        let mut patterns = Vec::with_capacity(dtos.len());
        let mut errors = Vec::new();

        for dto in dtos {
            match compile_one(dto, serializers, &normalizer) {
                Ok(root) => patterns.push(Arc::new(root)),
                Err(e) => {
                    tracing::warn!(key = %dto.key, error = %e, "pattern skipped");
                    errors.push(e);
                }
            }
        }

        tracing::debug!(compiled = patterns.len(), failed = errors.len(), "pattern library compiled");
        (Self { patterns }, errors)
    }

    /// Patterns that apply to a file of `language` named `file_name`.
    pub fn applicable<'a>(
        &'a self,
        language: Language,
        file_name: &'a str,
    ) -> impl Iterator<Item = &'a Arc<PatternRoot>> + 'a {
        self.patterns
            .iter()
            .filter(move |p| p.applies_to(language, file_name))
    }

    /// Serialize back to descriptions.
    pub fn to_dtos(&self, serializer: &dyn PatternSerializer) -> Result<Vec<PatternDto>> {
        self.patterns
            .iter()
            .map(|p| {
                Ok(PatternDto {
                    key: p.key.clone(),
                    name: p.file_name.clone(),
                    value: serializer.serialize(&p.node)?,
                    data_format: serializer.format().to_string(),
                    languages: p.languages().iter().map(|l| l.to_string()).collect(),
                    filename_wildcard: p.filename_wildcard.clone(),
                    description: p.description.clone(),
                })
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PatternRoot>> {
        self.patterns.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn compile_one(
    dto: &PatternDto,
    serializers: &[Box<dyn PatternSerializer>],
    normalizer: &PatternNormalizer,
) -> Result<PatternRoot> {
    let serializer = serializers
        .iter()
        .find(|s| s.format().eq_ignore_ascii_case(&dto.data_format))
        .or_else(|| serializers.first())
        .ok_or_else(|| {
            MatchError::PatternCompile(format!("no serializer for {}", dto.data_format))
        })?;

    let node = serializer
        .deserialize(&dto.value)
        .map_err(|e| MatchError::PatternCompile(format!("{}: {e}", dto.key)))?;

    let mut languages = Vec::with_capacity(dto.languages.len());
    for name in &dto.languages {
        let language = Language::from_str_lenient(name).ok_or_else(|| {
            MatchError::PatternCompile(format!("{}: unknown language {name}", dto.key))
        })?;
        languages.push(language);
    }

    let mut root = PatternRoot::new(dto.key.clone(), node);
    root.file_name = if dto.name.is_empty() {
        dto.key.clone()
    } else {
        dto.name.clone()
    };
    root.data_format = serializer.format().to_string();
    root.description = dto.description.clone();
    root.set_filename_wildcard(dto.filename_wildcard.clone());
    root.set_languages(languages)?;

    normalizer.normalize(&root)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSIGN_X_5: &str = r#"{"kind":"Assignment","left":{"kind":"IdToken","id":"x"},"right":{"kind":"IntLiteral","value":5}}"#;

    #[test]
    fn compiles_valid_and_reports_invalid() {
        let dtos = vec![
            PatternDto::json("ok", ASSIGN_X_5),
            PatternDto::json("broken", "{not json"),
            PatternDto::json("empty-or", r#"{"kind":"Or","patterns":[]}"#),
        ];
        let (library, errors) = PatternLibrary::compile(&dtos);
        assert_eq!(library.keys().collect::<Vec<_>>(), vec!["ok"]);
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[1], MatchError::Conversion { .. }));
    }

    #[test]
    fn rejects_non_pattern_language() {
        let mut dto = PatternDto::json("json-only", ASSIGN_X_5);
        dto.languages = vec!["json".into()];
        let (library, errors) = PatternLibrary::compile(&[dto]);
        assert!(library.is_empty());
        assert!(matches!(errors[0], MatchError::PatternCompile(_)));
    }

    #[test]
    fn dto_accepts_inline_object_value() {
        let json = r#"{"key":"k","value":{"kind":"Any"},"languages":["python"]}"#;
        let dto: PatternDto = serde_json::from_str(json).unwrap();
        assert_eq!(dto.value, r#"{"kind":"Any"}"#);
        assert_eq!(dto.data_format, "Json");
    }

    #[test]
    fn applicable_respects_languages_and_wildcards() {
        let mut py = PatternDto::json("py", ASSIGN_X_5);
        py.languages = vec!["Python".into()];
        let mut tests_only = PatternDto::json("tests", ASSIGN_X_5);
        tests_only.filename_wildcard = Some("test_*.py".into());
        let (library, errors) = PatternLibrary::compile(&[py, tests_only]);
        assert!(errors.is_empty());

        let keys = |lang, name| {
            library
                .applicable(lang, name)
                .map(|p| p.key.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(keys(Language::Python, "test_app.py"), vec!["py", "tests"]);
        assert_eq!(keys(Language::Python, "app.py"), vec!["py"]);
        assert!(keys(Language::TypeScript, "app.ts").is_empty());
    }

    #[test]
    fn dtos_round_trip_through_serializer() {
        let (library, _) = PatternLibrary::compile(&[PatternDto::json("ok", ASSIGN_X_5)]);
        let dtos = library.to_dtos(&JsonPatternSerializer::default()).unwrap();
        let (again, errors) = PatternLibrary::compile(&dtos);
        assert!(errors.is_empty());
        assert_eq!(again.iter().next().unwrap().node, library.iter().next().unwrap().node);
    }
}
