//! Staged processing of many files.
//!
//! A run reads every file of a [`SourceRepository`], detects its language
//! when the extension does not settle it, parses, converts to a unified
//! tree, optionally preprocesses, and matches the pattern library. Which of
//! those steps run is decided once by [`StageHelper`]. Pattern compilation
//! runs on its own scoped thread while files are read and parsed; the first
//! file that reaches the match stage waits for it.

mod cancellation;
pub mod repository;
mod result;
mod stage;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use rayon::prelude::*;

use crate::detector::{DetectorConfig, LanguageDetector};
use crate::diagnostics::Diagnostics;
use crate::error::{MatchError, Result};
use crate::matching::MatchingEngine;
use crate::parser::{ParseOptions, ParseTree, ParserRegistry};
use crate::pattern::{PatternLibrary, PatternsRepository};
use crate::preprocess::UstPreprocessor;
use crate::ust::{count_lines, CodeFile, Language, RootUst};

pub use cancellation::CancellationToken;
pub use repository::{FilesRepository, MemoryRepository, SourceRepository, UST_DUMP_SUFFIX};
pub use result::{ResultEntity, StageTiming, TimeBucket, WorkflowResult, WorkflowStats};
pub use stage::{Stage, StageHelper};

/// One configured run over a source repository.
pub struct Workflow {
    source: Arc<dyn SourceRepository>,
    patterns: Arc<dyn PatternsRepository>,
    parsers: ParserRegistry,
    preprocessor: Option<Arc<dyn UstPreprocessor>>,
    diagnostics: Arc<Diagnostics>,
    detector: DetectorConfig,
    pub stage: Stage,
    pub start_stage: Option<Stage>,
    /// Worker threads; `0` lets the pool pick.
    pub threads: usize,
    pub max_stack_size: Option<usize>,
    pub file_timeout: Option<Duration>,
    /// Per-parse memory budget in bytes.
    pub memory_budget: Option<usize>,
    /// Keep every converted tree in the result.
    pub include_intermediate: bool,
    /// Write each converted tree here as JSON.
    pub dump_dir: Option<PathBuf>,
    languages: Vec<Language>,
}

impl Workflow {
    pub fn new(source: Arc<dyn SourceRepository>, patterns: Arc<dyn PatternsRepository>) -> Self {
        let languages = source.languages().to_vec();
        Self {
            source,
            patterns,
            parsers: ParserRegistry::new(),
            preprocessor: None,
            diagnostics: Arc::new(Diagnostics::new()),
            detector: DetectorConfig::default(),
            stage: Stage::Match,
            start_stage: None,
            threads: 0,
            max_stack_size: None,
            file_timeout: None,
            memory_budget: None,
            include_intermediate: false,
            dump_dir: None,
            languages,
        }
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn UstPreprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_detector(mut self, config: DetectorConfig) -> Self {
        self.detector = config;
        self
    }

    pub fn with_stage(mut self, stage: Stage, start: Option<Stage>) -> Self {
        self.stage = stage;
        self.start_stage = start;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Restrict the run to `languages`; an empty list keeps the source's.
    pub fn with_languages(mut self, languages: Vec<Language>) -> Self {
        if !languages.is_empty() {
            self.languages = languages;
        }
        self
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Languages analyzed by this run. Falls back to every registered
    /// parser when neither the source nor the caller narrowed them.
    pub fn languages(&self) -> Vec<Language> {
        if self.languages.is_empty() {
            self.parsers.languages().collect()
        } else {
            self.languages.clone()
        }
    }

    /// Check the run configuration without touching any file.
    pub fn validate(&self) -> Result<StageHelper> {
        let helper = StageHelper::new(self.stage, self.start_stage)?;
        if helper.contains_parse && !self.languages().iter().any(|l| self.parsers.get(*l).is_some()) {
            return Err(MatchError::Config(
                "no parser is registered for any analyzed language".into(),
            ));
        }
        if let Some(dir) = &self.dump_dir {
            if dir.is_file() {
                return Err(MatchError::Config(format!(
                    "dump directory is a file: {}",
                    dir.display()
                )));
            }
        }
        Ok(helper)
    }

    pub fn process(&self, cancel: &CancellationToken) -> Result<WorkflowResult> {
        let helper = self.validate()?;
        let languages = self.languages();
        let result = WorkflowResult::new(self.stage, languages.clone());

        // an unreadable pattern source fails the run before any file work
        let dtos = if helper.needs_patterns() {
            Some(self.patterns.get_all()?)
        } else {
            None
        };
        let names = if helper.is_patterns {
            Vec::new()
        } else {
            self.source.file_names()?
        };

        let mut pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("ustmatch-worker-{i}"));
        if let Some(size) = self.max_stack_size {
            pool = pool.stack_size(size);
        }
        let pool = pool
            .build()
            .map_err(|e| MatchError::Config(format!("failed to start worker pool: {e}")))?;

        let mut detector_config = self.detector.clone();
        if detector_config.max_stack_size.is_none() {
            detector_config.max_stack_size = self.max_stack_size;
        }
        if detector_config.memory_budget.is_none() {
            detector_config.memory_budget = self.memory_budget;
        }
        let worker = FileWorker {
            workflow: self,
            helper,
            languages: &languages,
            detector: LanguageDetector::new(
                self.parsers.clone(),
                detector_config,
                Arc::clone(&self.diagnostics),
            ),
            engine: MatchingEngine::new(Arc::clone(&self.diagnostics)),
            result: &result,
            cancel,
        };

        tracing::info!(
            stage = %self.stage,
            files = names.len(),
            threads = pool.current_num_threads(),
            "workflow started"
        );

        std::thread::scope(|scope| {
            let (tx, rx) = crossbeam_channel::bounded::<Arc<PatternLibrary>>(1);
            let library: OnceCell<Option<Arc<PatternLibrary>>> = OnceCell::new();

            if let Some(dtos) = dtos {
                let result = &result;
                let diagnostics = &self.diagnostics;
                scope.spawn(move || {
                    let started = Instant::now();
                    let (compiled, errors) = PatternLibrary::compile(&dtos);
                    for error in &errors {
                        diagnostics.error(error);
                    }
                    result.add_errors(errors.len());
                    result.set_pattern_count(compiled.len());
                    result.add_time(TimeBucket::Patterns, started.elapsed());

                    let compiled = Arc::new(compiled);
                    result.add_entity(ResultEntity::Patterns(Arc::clone(&compiled)));
                    // no receiver left means nothing needed the library
                    let _ = tx.send(compiled);
                });
            } else {
                drop(tx);
            }

            let wait_for_library = || library.get_or_init(|| rx.recv().ok()).clone();

            if helper.is_patterns {
                wait_for_library();
                return;
            }

            pool.install(|| {
                names.par_iter().for_each(|name| {
                    if cancel.is_cancelled() {
                        result.mark_cancelled();
                        return;
                    }
                    match worker.process_file(name, &wait_for_library) {
                        Ok(()) => {}
                        Err(MatchError::Cancelled) => result.mark_cancelled(),
                        Err(e) => {
                            self.diagnostics.error(&e);
                            result.add_error();
                        }
                    }
                });
            });
        });
        drop(worker);

        if result.is_cancelled() {
            self.diagnostics.info("workflow cancelled");
        }
        result.finish();
        tracing::info!(
            files = result.total_files(),
            errors = result.error_count(),
            matches = self.diagnostics.match_count(),
            elapsed = ?result.total_time(),
            "workflow finished"
        );
        Ok(result)
    }
}

/// Per-run state shared by every file task.
struct FileWorker<'a> {
    workflow: &'a Workflow,
    helper: StageHelper,
    languages: &'a [Language],
    detector: LanguageDetector,
    engine: MatchingEngine,
    result: &'a WorkflowResult,
    cancel: &'a CancellationToken,
}

impl FileWorker<'_> {
    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(MatchError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn process_file<F>(&self, name: &str, library: &F) -> Result<()>
    where
        F: Fn() -> Option<Arc<PatternLibrary>>,
    {
        let workflow = self.workflow;
        if workflow.source.is_file_ignored(name) {
            tracing::debug!(file = %name, "file ignored");
            return Ok(());
        }

        let started = Instant::now();
        let file = Arc::new(workflow.source.read_file(name)?);
        self.result.add_time(TimeBucket::Read, started.elapsed());
        self.checkpoint()?;

        let ust = if self.helper.loads_ust {
            let started = Instant::now();
            let mut ust: RootUst = serde_json::from_str(&file.code)?;
            ust.finalize();
            self.result.add_time(TimeBucket::Read, started.elapsed());
            if !self.languages.contains(&ust.language) {
                tracing::debug!(file = %name, language = %ust.language, "dump language not analyzed");
                return Ok(());
            }
            self.count(&ust.file);
            ust
        } else if !self.helper.contains_parse {
            self.count(&file);
            if workflow.include_intermediate {
                self.result.add_entity(ResultEntity::SourceFile(file));
            }
            return Ok(());
        } else {
            let Some(detection) = self.detector.detect_if_required(&file, self.languages) else {
                workflow
                    .diagnostics
                    .info(format!("{name}: language not detected, skipped"));
                self.result.add_skipped();
                return Ok(());
            };
            self.count(&file);

            let language = detection.language;
            let parser = workflow.parsers.get(language).ok_or_else(|| {
                MatchError::parsing(name, format!("no parser registered for {language}"))
            })?;

            let tree = match detection.parse_tree {
                Some(tree) if tree.language == language => tree,
                _ => {
                    let options = ParseOptions {
                        timeout: workflow.file_timeout,
                        cancellation: Some(self.cancel.flag()),
                        memory_budget: workflow.memory_budget,
                    };
                    parser.parse(&file, &options)?
                }
            };
            self.record_parse(&tree);
            self.checkpoint()?;
            if !self.helper.contains_convert {
                return Ok(());
            }

            let started = Instant::now();
            let ust = parser.convert(&tree)?;
            self.result.add_time(TimeBucket::Convert, started.elapsed());
            self.checkpoint()?;
            ust
        };

        let ust = match (&workflow.preprocessor, self.helper.contains_preprocess) {
            (Some(preprocessor), true) => {
                let started = Instant::now();
                let ust = preprocessor.preprocess(ust)?;
                self.result.add_time(TimeBucket::Preprocess, started.elapsed());
                self.checkpoint()?;
                ust
            }
            _ => ust,
        };
        let ust = Arc::new(ust);

        if let Some(dir) = &workflow.dump_dir {
            dump_ust(dir, &ust)?;
        }
        if workflow.include_intermediate {
            self.result.add_entity(ResultEntity::Ust(Arc::clone(&ust)));
        }

        if self.helper.contains_match {
            let Some(library) = library() else {
                tracing::warn!(file = %name, "pattern library unavailable, match skipped");
                return Ok(());
            };
            let started = Instant::now();
            let matches = self.engine.match_library(&library, &ust);
            self.result.add_time(TimeBucket::Match, started.elapsed());
            self.result.add_matches(matches);
        }
        Ok(())
    }

    fn count(&self, file: &CodeFile) {
        self.result
            .add_processed_file(file.code.chars().count(), count_lines(&file.code));
    }

    fn record_parse(&self, tree: &ParseTree) {
        let timings = tree.timings;
        self.result
            .add_time(TimeBucket::Parse, timings.lexer + timings.parser);
        if !timings.lexer.is_zero() {
            self.result.add_time(TimeBucket::Lexer, timings.lexer);
        }
        if !timings.parser.is_zero() {
            self.result.add_time(TimeBucket::Parser, timings.parser);
        }
        if tree.error_count > 0 {
            tracing::warn!(
                file = %tree.file.relative_path,
                errors = tree.error_count,
                first = tree.errors.first().map(String::as_str).unwrap_or(""),
                "syntax errors"
            );
        }
    }
}

/// Write `ust` under `dir`, mirroring its relative path.
fn dump_ust(dir: &std::path::Path, ust: &RootUst) -> Result<()> {
    let path = dir.join(format!("{}{}", ust.file.relative_path, UST_DUMP_SUFFIX));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(ust)?)?;
    tracing::debug!(path = %path.display(), "tree dumped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{LanguageParser, ParseTimings, SyntaxTree};
    use crate::pattern::{MemoryPatternsRepository, PatternDto};
    use crate::ust::{TextSpan, UstNode};

    /// Line-oriented toy front end: `name = 123;` assignments and `//`
    /// comments. A line reading `!!` fails the parse.
    struct LineParser;

    impl LanguageParser for LineParser {
        fn language(&self) -> Language {
            Language::TypeScript
        }

        fn grammar(&self) -> &str {
            "lines"
        }

        fn parse(&self, file: &Arc<CodeFile>, _options: &ParseOptions) -> Result<ParseTree> {
            let mut statements = Vec::new();
            let mut comments = Vec::new();
            let mut offset = 0;
            for line in file.code.split_inclusive('\n') {
                let text = line.trim_end();
                let start = offset + (text.len() - text.trim_start().len());
                let text = text.trim();
                offset += line.len();
                if text == "!!" {
                    return Err(MatchError::parsing(&file.relative_path, "bang"));
                }
                if text.starts_with("//") {
                    comments.push(UstNode::comment(text, TextSpan::new(start, text.len())));
                    continue;
                }
                let body = text.trim_end_matches(';');
                let Some((left, right)) = body.split_once('=') else {
                    continue;
                };
                let name = left.trim();
                let value_text = right.trim();
                let value_start = start + body.len() - value_text.len();
                let Ok(value) = value_text.parse::<i64>() else {
                    continue;
                };
                statements.push(UstNode::assignment(
                    UstNode::identifier(name, TextSpan::new(start, name.len())),
                    UstNode::int(value, TextSpan::new(value_start, value_text.len())),
                    TextSpan::new(start, body.len()),
                ));
            }
            let root = RootUst::new(
                Arc::clone(file),
                Language::TypeScript,
                UstNode::block(statements, TextSpan::new(0, file.code.len())),
                comments,
            );
            Ok(ParseTree {
                language: Language::TypeScript,
                file: Arc::clone(file),
                syntax: SyntaxTree::Ust(Box::new(root)),
                error_count: 0,
                errors: Vec::new(),
                timings: ParseTimings::default(),
            })
        }

        fn convert(&self, tree: &ParseTree) -> Result<RootUst> {
            match &tree.syntax {
                SyntaxTree::Ust(root) => Ok(root.as_ref().clone()),
                SyntaxTree::TreeSitter(_) => Err(MatchError::parsing("lines", "unexpected tree")),
            }
        }
    }

    const ASSIGN_X_5: &str = r#"{"kind":"Assignment","left":{"kind":"IdToken","id":"x"},"right":{"kind":"IntLiteral","value":5}}"#;
    const TODO_COMMENT: &str = r#"{"kind":"CommentRegex","regex":"TODO"}"#;

    fn registry() -> ParserRegistry {
        let mut registry = ParserRegistry::empty();
        registry.register(Arc::new(LineParser));
        registry
    }

    fn workflow(source: MemoryRepository, patterns: Vec<PatternDto>) -> Workflow {
        Workflow::new(Arc::new(source), Arc::new(MemoryPatternsRepository::new(patterns)))
            .with_parsers(registry())
            .with_threads(2)
    }

    fn ts_source() -> MemoryRepository {
        MemoryRepository::new(vec![Language::TypeScript])
    }

    #[test]
    fn assignment_is_matched_end_to_end() {
        let source = ts_source().with_file("a.ts", "x = 5;\ny = 6;\n");
        let result = workflow(source, vec![PatternDto::json("x5", ASSIGN_X_5)])
            .process(&CancellationToken::new())
            .unwrap();

        let matches = result.matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_code(), "x = 5");
        assert_eq!(matches[0].pattern.key, "x5");
        assert_eq!(result.total_files(), 1);
        assert_eq!(result.total_lines(), 2);
        assert_eq!(result.pattern_count(), 1);
        assert_eq!(result.error_count(), 0);
        assert!(result.finished_at().is_some());
    }

    #[test]
    fn comment_pattern_matches_only_the_first_comment() {
        let source = ts_source().with_file("c.ts", "// TODO\n// FIXME\n");
        let result = workflow(source, vec![PatternDto::json("todo", TODO_COMMENT)])
            .process(&CancellationToken::new())
            .unwrap();

        let matches = result.matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].span, TextSpan::new(0, 7));
        assert_eq!(matches[0].matched_code(), "// TODO");
    }

    #[test]
    fn parse_stage_skips_patterns_and_matching() {
        let source = ts_source().with_file("a.ts", "x = 5;");
        let result = workflow(source, vec![PatternDto::json("x5", ASSIGN_X_5)])
            .with_stage(Stage::Parse, None)
            .process(&CancellationToken::new())
            .unwrap();
        assert_eq!(result.total_files(), 1);
        assert_eq!(result.pattern_count(), 0);
        assert!(result.matches().is_empty());
        assert!(result.entities().is_empty());
    }

    #[test]
    fn patterns_stage_touches_no_files() {
        let source = ts_source().with_file("a.ts", "x = 5;");
        let patterns = vec![
            PatternDto::json("x5", ASSIGN_X_5),
            PatternDto::json("bad", r#"{"kind":"Or","patterns":[]}"#),
        ];
        let result = workflow(source, patterns)
            .with_stage(Stage::Patterns, None)
            .process(&CancellationToken::new())
            .unwrap();
        assert_eq!(result.total_files(), 0);
        assert_eq!(result.pattern_count(), 1);
        assert_eq!(result.error_count(), 1);
        assert!(matches!(result.entities()[0], ResultEntity::Patterns(_)));
    }

    #[test]
    fn failing_file_is_counted_and_skipped() {
        let source = ts_source()
            .with_file("bad.ts", "!!\n")
            .with_file("good.ts", "x = 5;\n");
        let result = workflow(source, vec![PatternDto::json("x5", ASSIGN_X_5)])
            .process(&CancellationToken::new())
            .unwrap();
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.matches().len(), 1);
        assert_eq!(result.matches()[0].file.relative_path, "good.ts");
    }

    #[test]
    fn ignored_and_undetected_files_have_no_statistics() {
        let source = MemoryRepository::new(vec![Language::TypeScript])
            .with_file("skip.py", "x = 5;")
            .with_file("notes.txt", "x = 5;")
            .with_file("Makefile", "x = 5;");
        let result = workflow(source, vec![PatternDto::json("x5", ASSIGN_X_5)])
            .with_parsers(ParserRegistry::empty())
            .with_stage(Stage::Read, None)
            .process(&CancellationToken::new())
            .unwrap();
        // the extensionless file is read; the other two never are
        assert_eq!(result.total_files(), 1);

        let source = MemoryRepository::new(vec![Language::TypeScript, Language::Python])
            .with_file("a.py", "x = 5;");
        let result = workflow(source, Vec::new())
            .with_languages(vec![Language::TypeScript])
            .with_stage(Stage::Parse, None)
            .process(&CancellationToken::new())
            .unwrap();
        // python is readable but not analyzed, so no candidate remains
        assert_eq!(result.total_files(), 0);
        assert_eq!(result.skipped_count(), 1);
        assert_eq!(result.error_count(), 0);
    }

    #[test]
    fn race_winner_parse_tree_is_reused() {
        let source = MemoryRepository::new(vec![Language::TypeScript]).with_file("Makefile", "x = 5;");
        let result = workflow(source, vec![PatternDto::json("x5", ASSIGN_X_5)])
            .with_languages(vec![Language::TypeScript, Language::Python])
            .with_parsers({
                let mut registry = registry();
                registry.register(Arc::new(crate::detector::tests::FakeParser {
                    language: Language::Python,
                    grammar: "python",
                    delay: Duration::from_secs(60),
                    errors: 0,
                }));
                registry
            })
            .with_detector(DetectorConfig {
                timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(10),
                ..DetectorConfig::default()
            })
            .process(&CancellationToken::new())
            .unwrap();
        // the toy parser wins the race; the slow one never reports
        assert_eq!(result.skipped_count(), 0);
        assert_eq!(result.total_files(), 1);
        assert_eq!(result.matches().len(), 1);
    }

    #[test]
    fn cancelled_run_processes_nothing() {
        let source = ts_source().with_file("a.ts", "x = 5;");
        let token = CancellationToken::new();
        token.cancel();
        let result = workflow(source, vec![PatternDto::json("x5", ASSIGN_X_5)])
            .process(&token)
            .unwrap();
        assert!(result.is_cancelled());
        assert_eq!(result.total_files(), 0);
        assert!(result.matches().is_empty());
    }

    #[test]
    fn bad_stage_range_fails_the_run() {
        let err = workflow(ts_source(), Vec::new())
            .with_stage(Stage::Parse, Some(Stage::Match))
            .process(&CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, MatchError::Config(_)));
    }

    #[test]
    fn dumps_reload_and_match_again() {
        let dumps = tempfile::tempdir().unwrap();
        let source = ts_source().with_file("src/a.ts", "x = 5;\n");
        let mut first = workflow(source, vec![PatternDto::json("x5", ASSIGN_X_5)])
            .with_stage(Stage::Convert, None);
        first.dump_dir = Some(dumps.path().to_path_buf());
        first.include_intermediate = true;
        let result = first.process(&CancellationToken::new()).unwrap();
        assert!(result.matches().is_empty());
        assert!(matches!(result.entities()[0], ResultEntity::Ust(_)));
        assert!(dumps.path().join("src/a.ts.ust.json").is_file());

        let reload = FilesRepository::new(dumps.path(), vec![Language::TypeScript])
            .unwrap()
            .with_ust_dumps(true);
        let second = Workflow::new(
            Arc::new(reload),
            Arc::new(MemoryPatternsRepository::new(vec![PatternDto::json("x5", ASSIGN_X_5)])),
        )
        .with_parsers(registry())
        .with_stage(Stage::Match, Some(Stage::Match));
        let result = second.process(&CancellationToken::new()).unwrap();
        let matches = result.matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_code(), "x = 5");
        assert_eq!(matches[0].file.relative_path, "src/a.ts");
    }
}
