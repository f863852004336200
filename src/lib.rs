//! ustmatch — structural pattern matching over a unified syntax tree.
//!
//! Source files in several languages are parsed, converted to one
//! language-agnostic tree, and matched against a library of structural
//! patterns. Runs are staged (read, parse, convert, preprocess, match) and
//! process files concurrently.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use ustmatch::{run, RunOptions};
//!
//! let options = RunOptions::default();
//! let result = run(Path::new("./my-project"), &options).unwrap();
//! println!("Files: {}, Matches: {}", result.total_files(), result.matches().len());
//! ```

pub mod config;
pub mod detector;
pub mod diagnostics;
pub mod error;
pub mod matching;
pub mod output;
pub mod parser;
pub mod pattern;
pub mod preprocess;
pub mod ust;
pub mod workflow;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, PatternsSection};
use error::Result;
use output::OutputFormat;
use parser::ParserRegistry;
use pattern::{DefaultPatternsRepository, FilePatternsRepository, PatternsRepository};
use preprocess::LiteralFolder;
use ust::Language;
use workflow::{CancellationToken, FilesRepository, MemoryRepository, Stage, StageHelper, Workflow, WorkflowResult};

/// Options for a run. Unset fields fall back to the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Path to config file (defaults to `.ustmatch.toml` in the input dir).
    pub config_path: Option<PathBuf>,
    /// JSON pattern file; overrides `[patterns] path`.
    pub patterns_path: Option<PathBuf>,
    pub stage: Option<Stage>,
    pub start_stage: Option<Stage>,
    pub threads: Option<usize>,
    pub languages: Vec<Language>,
    pub dump_dir: Option<PathBuf>,
}

/// Config for `path`: the explicit file, or `.ustmatch.toml` next to the
/// input.
pub fn load_config(path: &Path, explicit: Option<&Path>) -> Result<Config> {
    let config_path = match explicit {
        Some(p) => p.to_path_buf(),
        None if path.is_file() => path
            .parent()
            .unwrap_or(Path::new("."))
            .join(".ustmatch.toml"),
        None => path.join(".ustmatch.toml"),
    };
    Config::load(&config_path)
}

/// The pattern source selected by `explicit` or the config section.
pub fn patterns_repository(
    explicit: Option<&Path>,
    section: &PatternsSection,
) -> Result<Arc<dyn PatternsRepository>> {
    let path = explicit.or(section.path.as_deref());
    let ids = section.ids.clone();
    let repository: Arc<dyn PatternsRepository> = match path {
        Some(path) => {
            let repo = FilePatternsRepository::open(path)?;
            Arc::new(if ids.is_empty() { repo } else { repo.with_ids(ids) })
        }
        None => {
            let repo = DefaultPatternsRepository::new();
            Arc::new(if ids.is_empty() { repo } else { repo.with_ids(ids) })
        }
    };
    Ok(repository)
}

/// Assemble the workflow for `path` from config and options.
pub fn build_workflow(path: &Path, options: &RunOptions) -> Result<Workflow> {
    let config = load_config(path, options.config_path.as_deref())?;
    let section = &config.workflow;

    let stage = options.stage.unwrap_or(section.stage);
    let start_stage = options.start_stage.or(section.start_stage);
    let helper = StageHelper::new(stage, start_stage)?;

    let parsers = ParserRegistry::new();
    let mut languages = if options.languages.is_empty() {
        section.languages()?
    } else {
        options.languages.clone()
    };
    if languages.is_empty() {
        languages = parsers.languages().collect();
    }

    let source = FilesRepository::new(path, languages.clone())?
        .with_exclude(&section.exclude)?
        .with_max_file_size(section.max_file_size)
        .with_ust_dumps(helper.loads_ust);
    let patterns = patterns_repository(options.patterns_path.as_deref(), &config.patterns)?;

    let mut workflow = Workflow::new(Arc::new(source), patterns)
        .with_parsers(parsers)
        .with_languages(languages)
        .with_stage(stage, start_stage)
        .with_threads(options.threads.unwrap_or(section.threads))
        .with_detector(config.detector.to_detector_config(section.max_stack_size)?);
    if section.preprocess {
        workflow = workflow.with_preprocessor(Arc::new(LiteralFolder));
    }
    workflow.max_stack_size = section.max_stack_size;
    workflow.file_timeout = section.file_timeout();
    workflow.memory_budget = section.memory_budget();
    workflow.include_intermediate = section.include_intermediate;
    workflow.dump_dir = options.dump_dir.clone().or_else(|| section.dump_dir.clone());
    Ok(workflow)
}

/// Run a complete workflow over `path`.
pub fn run(path: &Path, options: &RunOptions) -> Result<WorkflowResult> {
    run_with_cancellation(path, options, &CancellationToken::new())
}

pub fn run_with_cancellation(
    path: &Path,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<WorkflowResult> {
    build_workflow(path, options)?.process(cancel)
}

/// Compile the pattern library only; no source file is touched.
pub fn check_patterns(explicit: Option<&Path>, config: &Config) -> Result<WorkflowResult> {
    let patterns = patterns_repository(explicit, &config.patterns)?;
    let source = MemoryRepository::new(Language::pattern_languages().collect());
    Workflow::new(Arc::new(source), patterns)
        .with_stage(Stage::Patterns, None)
        .process(&CancellationToken::new())
}

/// Render a run's result in the requested format.
pub fn render_report(result: &WorkflowResult, format: OutputFormat, target_name: &str) -> Result<String> {
    output::render(result, format, target_name)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::path::Path;

    fn with_patterns(file: &str) -> RunOptions {
        RunOptions {
            patterns_path: Some(PathBuf::from(format!("tests/fixtures/patterns/{file}"))),
            threads: Some(2),
            ..RunOptions::default()
        }
    }

    #[cfg(feature = "typescript")]
    #[test]
    fn assignment_matches_once() {
        let result = run(Path::new("tests/fixtures/assign"), &with_patterns("assign_x5.json")).unwrap();
        let matches = result.matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_code(), "x = 5");
        assert_eq!(matches[0].to_dto().begin_line, 1);
        assert_eq!(result.error_count(), 0);
    }

    #[cfg(feature = "typescript")]
    #[test]
    fn comment_pattern_matches_first_comment_only() {
        let result = run(Path::new("tests/fixtures/comments"), &with_patterns("todo.json")).unwrap();
        let matches = result.matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_code(), "// TODO");
        assert_eq!(matches[0].span.start, 0);
    }

    #[cfg(feature = "python")]
    #[test]
    fn builtin_library_flags_python_settings() {
        let options = RunOptions {
            threads: Some(2),
            ..RunOptions::default()
        };
        let result = run(Path::new("tests/fixtures/python_app"), &options).unwrap();
        let mut keys: Vec<String> = result
            .matches()
            .iter()
            .map(|m| m.pattern.key.clone())
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(
            keys,
            vec!["debug-enabled", "eval-invocation", "hardcoded-password", "todo-comment"]
        );
    }

    #[cfg(feature = "python")]
    #[test]
    fn shebang_script_is_detected_as_python() {
        let options = RunOptions {
            languages: vec![Language::Python, Language::TypeScript],
            threads: Some(1),
            ..RunOptions::default()
        };
        let result = run(Path::new("tests/fixtures/scripts"), &options).unwrap();
        assert_eq!(result.total_files(), 1);
        assert!(result
            .matches()
            .iter()
            .any(|m| m.pattern.key == "eval-invocation" && m.language == Language::Python));
    }

    #[test]
    fn read_stage_counts_files_without_parsing() {
        let options = RunOptions {
            stage: Some(Stage::Read),
            ..RunOptions::default()
        };
        let result = run(Path::new("tests/fixtures/assign"), &options).unwrap();
        assert_eq!(result.total_files(), 1);
        assert!(result.matches().is_empty());
        assert_eq!(result.pattern_count(), 0);
    }

    #[test]
    fn builtin_patterns_all_compile() {
        let result = check_patterns(None, &Config::default()).unwrap();
        assert_eq!(result.error_count(), 0);
        assert_eq!(result.pattern_count(), 4);
        assert_eq!(result.total_files(), 0);
    }

    #[test]
    fn cancelled_run_reports_partial_result() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_with_cancellation(
            Path::new("tests/fixtures/assign"),
            &with_patterns("assign_x5.json"),
            &cancel,
        )
        .unwrap();
        assert!(result.is_cancelled());
        assert!(result.matches().is_empty());
        assert_eq!(error::MatchError::Cancelled.exit_code(), 130);
    }

    #[cfg(feature = "python")]
    #[test]
    fn memory_budget_fails_oversized_files() {
        let mut workflow = build_workflow(Path::new("tests/fixtures/python_app"), &RunOptions::default()).unwrap();
        workflow.memory_budget = Some(32);
        let result = workflow.process(&CancellationToken::new()).unwrap();
        assert_eq!(result.error_count(), 1);
        assert!(result.matches().is_empty());
    }

    #[test]
    fn missing_input_fails_the_run() {
        let err = run(Path::new("tests/fixtures/nope"), &RunOptions::default()).unwrap_err();
        assert!(matches!(err, error::MatchError::Config(_)));
    }

    #[cfg(feature = "typescript")]
    #[test]
    fn report_renders_in_every_format() {
        let result = run(Path::new("tests/fixtures/assign"), &with_patterns("assign_x5.json")).unwrap();
        for format in [OutputFormat::Console, OutputFormat::Json, OutputFormat::Sarif] {
            let text = render_report(&result, format, "assign").unwrap();
            assert!(text.contains("x = 5"), "{format:?} output lacks the match");
        }
    }
}
