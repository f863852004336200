use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detector::DetectorConfig;
use crate::error::{MatchError, Result};
use crate::ust::Language;
use crate::workflow::Stage;

/// Top-level configuration from `.ustmatch.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub detector: DetectorSection,
    #[serde(default)]
    pub patterns: PatternsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    pub stage: Stage,
    pub start_stage: Option<Stage>,
    /// `0` means one worker per core.
    pub threads: usize,
    pub max_stack_size: Option<usize>,
    pub file_timeout_ms: Option<u64>,
    /// Per-parse memory budget in MiB.
    pub memory_mb: Option<u64>,
    /// Fold literal expressions before matching.
    pub preprocess: bool,
    pub include_intermediate: bool,
    pub dump_dir: Option<PathBuf>,
    /// Language names; empty means every language with a parser.
    pub languages: Vec<String>,
    /// Glob patterns of relative paths to skip.
    pub exclude: Vec<String>,
    pub max_file_size: u64,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            stage: Stage::Match,
            start_stage: None,
            threads: 0,
            max_stack_size: None,
            file_timeout_ms: None,
            memory_mb: None,
            preprocess: true,
            include_intermediate: false,
            dump_dir: None,
            languages: Vec::new(),
            exclude: Vec::new(),
            max_file_size: crate::workflow::repository::DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl WorkflowSection {
    /// Parsed language list. Unknown names are a configuration error.
    pub fn languages(&self) -> Result<Vec<Language>> {
        parse_languages(&self.languages)
    }

    pub fn file_timeout(&self) -> Option<Duration> {
        self.file_timeout_ms.map(Duration::from_millis)
    }

    /// `memory_mb` in bytes.
    pub fn memory_budget(&self) -> Option<usize> {
        self.memory_mb
            .map(|mb| usize::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSection {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Languages that never win the race early on a clean parse.
    pub no_early_exit: Vec<String>,
}

impl Default for DetectorSection {
    fn default() -> Self {
        let defaults = DetectorConfig::default();
        Self {
            timeout_ms: defaults.timeout.as_millis() as u64,
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            no_early_exit: Vec::new(),
        }
    }
}

impl DetectorSection {
    pub fn to_detector_config(&self, max_stack_size: Option<usize>) -> Result<DetectorConfig> {
        let no_early_exit: HashSet<Language> = parse_languages(&self.no_early_exit)?.into_iter().collect();
        Ok(DetectorConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            no_early_exit,
            max_stack_size,
            memory_budget: None,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternsSection {
    /// JSON pattern file; the built-in library when unset.
    pub path: Option<PathBuf>,
    /// Only these pattern keys, when non-empty.
    pub ids: Vec<String>,
}

fn parse_languages(names: &[String]) -> Result<Vec<Language>> {
    names
        .iter()
        .map(|name| {
            Language::from_str_lenient(name)
                .ok_or_else(|| MatchError::Config(format!("unknown language: {name}")))
        })
        .collect()
}

impl Config {
    /// Load config from a TOML file. Returns default if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Generate a starter config file.
    pub fn starter_toml() -> &'static str {
        r#"# ustmatch configuration

[workflow]
# Last stage to run: read, parse, convert, preprocess, match, patterns.
stage = "match"

# Resume from a later stage over tree dumps (preprocess or match).
# start_stage = "match"

# Worker threads (0 = one per core).
threads = 0

# Languages to analyze (python, typescript, javascript). Empty = all.
languages = []

# Relative paths to skip.
# exclude = ["vendor/**", "**/*.min.js"]

# Per-file parse memory budget in MiB (source plus estimated tree).
# memory_mb = 512

# Fold string concatenation and negative literals before matching.
preprocess = true

# Write converted trees as JSON.
# dump_dir = "ust-dump"

[detector]
timeout_ms = 20000
poll_interval_ms = 100
# no_early_exit = ["javascript"]

[patterns]
# path = "patterns.json"
# ids = ["hardcoded-password"]
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load(Path::new("/no/such/.ustmatch.toml")).unwrap();
        assert_eq!(config.workflow.stage, Stage::Match);
        assert!(config.workflow.preprocess);
        assert_eq!(config.detector.timeout_ms, 20_000);
        assert!(config.patterns.path.is_none());
    }

    #[test]
    fn starter_toml_parses() {
        let config: Config = toml::from_str(Config::starter_toml()).unwrap();
        assert_eq!(config.detector.poll_interval_ms, 100);
        assert!(config.workflow.languages().unwrap().is_empty());
    }

    #[test]
    fn loads_sections_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".ustmatch.toml");
        std::fs::write(
            &path,
            r#"
[workflow]
stage = "parse"
threads = 3
languages = ["python", "TypeScript"]
file_timeout_ms = 1500
memory_mb = 64

[detector]
no_early_exit = ["javascript"]

[patterns]
ids = ["todo-comment"]
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.workflow.stage, Stage::Parse);
        assert_eq!(config.workflow.threads, 3);
        assert_eq!(
            config.workflow.languages().unwrap(),
            vec![Language::Python, Language::TypeScript]
        );
        assert_eq!(config.workflow.file_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.workflow.memory_budget(), Some(64 * 1024 * 1024));

        let detector = config.detector.to_detector_config(None).unwrap();
        assert!(detector.no_early_exit.contains(&Language::JavaScript));
        assert_eq!(detector.timeout, Duration::from_secs(20));
        assert_eq!(config.patterns.ids, vec!["todo-comment"]);
    }

    #[test]
    fn unknown_language_is_rejected() {
        let section = WorkflowSection {
            languages: vec!["cobol".into()],
            ..WorkflowSection::default()
        };
        assert!(matches!(section.languages(), Err(MatchError::Config(_))));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[workflow\nstage =").unwrap();
        assert!(matches!(Config::load(&path), Err(MatchError::Toml(_))));
    }
}
