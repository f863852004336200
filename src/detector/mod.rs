//! Language detection by racing candidate parsers.
//!
//! Each candidate grammar parses the file on its own thread. The race ends
//! at the deadline, when every worker has reported, or as soon as a worker
//! produces a clean parse for a language that is allowed to win early.
//! Outstanding workers are then cancelled through the shared flag and the
//! result with the fewest syntax errors wins.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::parser::{LanguageParser, ParseOptions, ParseTree, ParserRegistry};
use crate::ust::{CodeFile, Language};

static SHEBANG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#!\s*(?:\S*/)?(?:env\s+)?(\w+)").unwrap());

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Languages whose grammar accepts almost anything; a clean parse in one
    /// of these does not end the race.
    pub no_early_exit: HashSet<Language>,
    /// Stack size of racing worker threads.
    pub max_stack_size: Option<usize>,
    /// Memory budget handed to each racing parse.
    pub memory_budget: Option<usize>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(100),
            no_early_exit: HashSet::new(),
            max_stack_size: None,
            memory_budget: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub language: Language,
    /// Present when a race was run; reused by the caller instead of parsing
    /// again.
    pub parse_tree: Option<ParseTree>,
    pub errors: Vec<String>,
}

impl DetectionResult {
    fn unparsed(language: Language) -> Self {
        Self {
            language,
            parse_tree: None,
            errors: Vec::new(),
        }
    }
}

pub struct LanguageDetector {
    parsers: ParserRegistry,
    config: DetectorConfig,
    diagnostics: Arc<Diagnostics>,
}

type WorkerReport = (Language, Result<ParseTree>);

impl LanguageDetector {
    pub fn new(parsers: ParserRegistry, config: DetectorConfig, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            parsers,
            config,
            diagnostics,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Pick a language for `file` among `candidates`.
    pub fn detect(&self, file: &Arc<CodeFile>, candidates: &[Language]) -> Option<DetectionResult> {
        let mut unique: Vec<Language> = Vec::with_capacity(candidates.len());
        for language in candidates {
            if !unique.contains(language) {
                unique.push(*language);
            }
        }

        match unique.as_slice() {
            [] => return None,
            [only] => return Some(DetectionResult::unparsed(*only)),
            _ => {}
        }

        let mut grammars = HashSet::new();
        let racers: Vec<Arc<dyn LanguageParser>> = unique
            .iter()
            .filter_map(|language| {
                let parser = self.parsers.get(*language);
                if parser.is_none() {
                    tracing::debug!(%language, "no parser registered, candidate dropped");
                }
                parser
            })
            .filter(|parser| grammars.insert(parser.grammar().to_string()))
            .collect();

        match racers.as_slice() {
            [] => None,
            [only] => Some(DetectionResult::unparsed(only.language())),
            _ => self.race(file, racers),
        }
    }

    /// Candidate languages for `file` within `analyzed`: the extension when it
    /// is known, otherwise every analyzed language with a parser, narrowed
    /// by a shebang line when there is one.
    pub fn candidates(&self, file: &CodeFile, analyzed: &[Language]) -> Vec<Language> {
        let by_extension = file
            .extension()
            .map(Language::from_extension)
            .unwrap_or(Language::Unknown);
        if by_extension != Language::Unknown {
            return if analyzed.contains(&by_extension) {
                vec![by_extension]
            } else {
                Vec::new()
            };
        }

        let parsable: Vec<Language> = analyzed
            .iter()
            .copied()
            .filter(|l| self.parsers.get(*l).is_some())
            .collect();

        let interpreter = SHEBANG
            .captures(&file.code)
            .map(|caps| caps[1].to_lowercase());
        let hinted: Vec<Language> = match interpreter.as_deref() {
            Some(i) if i.starts_with("python") => vec![Language::Python],
            Some("node" | "deno" | "bun") => vec![Language::JavaScript, Language::TypeScript],
            _ => Vec::new(),
        };
        let narrowed: Vec<Language> = parsable
            .iter()
            .copied()
            .filter(|l| hinted.contains(l))
            .collect();

        if narrowed.is_empty() {
            parsable
        } else {
            narrowed
        }
    }

    /// Candidates for `file` followed by detection.
    pub fn detect_if_required(&self, file: &Arc<CodeFile>, analyzed: &[Language]) -> Option<DetectionResult> {
        let candidates = self.candidates(file, analyzed);
        self.detect(file, &candidates)
    }

    fn race(&self, file: &Arc<CodeFile>, racers: Vec<Arc<dyn LanguageParser>>) -> Option<DetectionResult> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;
        let cancel = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = crossbeam_channel::unbounded::<WorkerReport>();

        let mut spawned = 0usize;
        for parser in racers {
            let language = parser.language();
            let tx = tx.clone();
            let file = Arc::clone(file);
            let options = ParseOptions {
                timeout: Some(self.config.timeout),
                cancellation: Some(Arc::clone(&cancel)),
                memory_budget: self.config.memory_budget,
            };
            let mut builder = std::thread::Builder::new().name(format!("detect-{language}"));
            if let Some(size) = self.config.max_stack_size {
                builder = builder.stack_size(size);
            }
            let handle = builder.spawn(move || {
                let outcome = parser.parse(&file, &options);
                // The receiver may already be gone when the race ended early.
                let _ = tx.send((language, outcome));
            });
            match handle {
                Ok(_) => spawned += 1,
                Err(e) => tracing::warn!(%language, error = %e, "failed to spawn detection worker"),
            }
        }
        drop(tx);

        let mut reports: Vec<(Language, ParseTree)> = Vec::new();
        let mut received = 0usize;
        while received < spawned {
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(file = %file.relative_path, "detection deadline reached");
                break;
            }
            let wait = self.config.poll_interval.min(deadline - now);
            match rx.recv_timeout(wait) {
                Ok((language, outcome)) => {
                    received += 1;
                    match outcome {
                        Ok(tree) => {
                            let conclusive =
                                tree.error_count == 0 && !self.config.no_early_exit.contains(&language);
                            reports.push((language, tree));
                            if conclusive {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(%language, error = %e, "candidate parse failed");
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        cancel.store(1, Ordering::Relaxed);

        // Stable: earlier reports win ties.
        let (language, tree) = reports
            .into_iter()
            .min_by_key(|(_, tree)| tree.error_count)?;

        self.diagnostics.info(format!(
            "{}: detected {language} in {:?} ({} syntax errors)",
            file.relative_path,
            started.elapsed(),
            tree.error_count
        ));
        Some(DetectionResult {
            language,
            errors: tree.errors.clone(),
            parse_tree: Some(tree),
        })
    }
}
