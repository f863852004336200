use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::PatternDto;
use crate::error::{MatchError, Result};

const BUILTIN_PATTERNS: &str = include_str!("builtin.json");

/// A source of pattern descriptions.
pub trait PatternsRepository: Send + Sync {
    fn get_all(&self) -> Result<Vec<PatternDto>>;
}

fn filter_ids(dtos: Vec<PatternDto>, ids: &Option<HashSet<String>>) -> Vec<PatternDto> {
    match ids {
        Some(ids) => dtos.into_iter().filter(|d| ids.contains(&d.key)).collect(),
        None => dtos,
    }
}

fn parse_dtos(text: &str, origin: &str) -> Result<Vec<PatternDto>> {
    let mut dtos: Vec<PatternDto> = serde_json::from_str(text)?;
    for dto in &mut dtos {
        if dto.name.is_empty() {
            dto.name = origin.to_string();
        }
    }
    Ok(dtos)
}

/// Patterns stored as a JSON array in a file.
#[derive(Debug, Clone)]
pub struct FilePatternsRepository {
    path: PathBuf,
    ids: Option<HashSet<String>>,
}

impl FilePatternsRepository {
    /// Fails immediately when `path` does not exist, so a bad pattern
    /// source aborts the run before any file is touched.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(MatchError::Config(format!(
                "pattern file not found: {}",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            ids: None,
        })
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }
}

impl PatternsRepository for FilePatternsRepository {
    fn get_all(&self) -> Result<Vec<PatternDto>> {
        let text = std::fs::read_to_string(&self.path)?;
        let dtos = parse_dtos(&text, &self.path.display().to_string())?;
        Ok(filter_ids(dtos, &self.ids))
    }
}

/// Patterns held in memory; also accepts a JSON array string.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatternsRepository {
    dtos: Vec<PatternDto>,
}

impl MemoryPatternsRepository {
    pub fn new(dtos: Vec<PatternDto>) -> Self {
        Self { dtos }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(Self::new(parse_dtos(text, "memory")?))
    }
}

impl PatternsRepository for MemoryPatternsRepository {
    fn get_all(&self) -> Result<Vec<PatternDto>> {
        Ok(self.dtos.clone())
    }
}

/// Patterns shipped with the crate.
#[derive(Debug, Clone, Default)]
pub struct DefaultPatternsRepository {
    ids: Option<HashSet<String>>,
}

impl DefaultPatternsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }
}

impl PatternsRepository for DefaultPatternsRepository {
    fn get_all(&self) -> Result<Vec<PatternDto>> {
        let dtos = parse_dtos(BUILTIN_PATTERNS, "builtin")?;
        Ok(filter_ids(dtos, &self.ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternLibrary;

    #[test]
    fn builtin_patterns_all_compile() {
        let dtos = DefaultPatternsRepository::new().get_all().unwrap();
        assert!(dtos.len() >= 4);
        let (library, errors) = PatternLibrary::compile(&dtos);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(library.len(), dtos.len());
    }

    #[test]
    fn id_filter_restricts_results() {
        let dtos = DefaultPatternsRepository::new()
            .with_ids(["eval-invocation".to_string()])
            .get_all()
            .unwrap();
        assert_eq!(dtos.len(), 1);
        assert_eq!(dtos[0].key, "eval-invocation");
    }

    #[test]
    fn missing_pattern_file_is_a_config_error() {
        let err = FilePatternsRepository::open("/nonexistent/patterns.json").unwrap_err();
        assert!(matches!(err, MatchError::Config(_)));
    }

    #[test]
    fn reads_pattern_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        std::fs::write(
            &path,
            r#"[{"key":"any","value":{"kind":"Any"}},{"key":"null","value":"{\"kind\":\"NullLiteral\"}"}]"#,
        )
        .unwrap();
        let dtos = FilePatternsRepository::open(&path).unwrap().get_all().unwrap();
        assert_eq!(dtos.len(), 2);
        assert!(dtos[0].name.ends_with("patterns.json"));
    }
}
