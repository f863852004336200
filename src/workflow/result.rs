use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Stage;
use crate::matching::MatchResult;
use crate::pattern::PatternLibrary;
use crate::ust::{CodeFile, Language, RootUst};

/// Timing buckets accumulated per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    Read,
    Parse,
    Convert,
    Preprocess,
    Match,
    Patterns,
    /// Front-end split of `Parse`, when reported.
    Lexer,
    Parser,
}

impl TimeBucket {
    pub const ALL: [TimeBucket; 8] = [
        Self::Read,
        Self::Parse,
        Self::Convert,
        Self::Preprocess,
        Self::Match,
        Self::Patterns,
        Self::Lexer,
        Self::Parser,
    ];

    /// Buckets that make up the total processing time.
    pub const STAGES: [TimeBucket; 6] = [
        Self::Read,
        Self::Parse,
        Self::Convert,
        Self::Preprocess,
        Self::Match,
        Self::Patterns,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Parse => "parse",
            Self::Convert => "convert",
            Self::Preprocess => "preprocess",
            Self::Match => "match",
            Self::Patterns => "patterns",
            Self::Lexer => "lexer",
            Self::Parser => "parser",
        };
        write!(f, "{name}")
    }
}

/// Intermediate artifacts retained for dumping.
#[derive(Debug, Clone)]
pub enum ResultEntity {
    SourceFile(Arc<CodeFile>),
    Patterns(Arc<PatternLibrary>),
    Ust(Arc<RootUst>),
}

/// Aggregate of one run, updated concurrently by file workers.
#[derive(Debug)]
pub struct WorkflowResult {
    pub stage: Stage,
    pub languages: Vec<Language>,
    files: AtomicUsize,
    chars: AtomicUsize,
    lines: AtomicUsize,
    errors: AtomicUsize,
    skipped: AtomicUsize,
    patterns: AtomicUsize,
    nanos: [AtomicU64; 8],
    matches: Mutex<Vec<MatchResult>>,
    entities: Mutex<Vec<ResultEntity>>,
    cancelled: AtomicBool,
    started_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl WorkflowResult {
    pub fn new(stage: Stage, languages: Vec<Language>) -> Self {
        Self {
            stage,
            languages,
            files: AtomicUsize::new(0),
            chars: AtomicUsize::new(0),
            lines: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            patterns: AtomicUsize::new(0),
            nanos: Default::default(),
            matches: Mutex::new(Vec::new()),
            entities: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
            started_at: Utc::now(),
            finished_at: Mutex::new(None),
        }
    }

    pub fn add_processed_file(&self, chars: usize, lines: usize) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.chars.fetch_add(chars, Ordering::Relaxed);
        self.lines.fetch_add(lines, Ordering::Relaxed);
    }

    pub fn add_time(&self, bucket: TimeBucket, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.nanos[bucket.index()].fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_errors(&self, count: usize) {
        self.errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_pattern_count(&self, count: usize) {
        self.patterns.store(count, Ordering::Relaxed);
    }

    pub fn add_matches(&self, results: Vec<MatchResult>) {
        if results.is_empty() {
            return;
        }
        self.matches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(results);
    }

    pub fn add_entity(&self, entity: ResultEntity) {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entity);
    }

    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn finish(&self) {
        *self.finished_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub fn total_files(&self) -> usize {
        self.files.load(Ordering::Relaxed)
    }

    pub fn total_chars(&self) -> usize {
        self.chars.load(Ordering::Relaxed)
    }

    pub fn total_lines(&self) -> usize {
        self.lines.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn time(&self, bucket: TimeBucket) -> Duration {
        Duration::from_nanos(self.nanos[bucket.index()].load(Ordering::Relaxed))
    }

    pub fn total_time(&self) -> Duration {
        TimeBucket::STAGES.iter().map(|b| self.time(*b)).sum()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn matches(&self) -> Vec<MatchResult> {
        self.matches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn entities(&self) -> Vec<ResultEntity> {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Serializable snapshot of the counters.
    pub fn stats(&self) -> WorkflowStats {
        let total = self.total_time();
        let stages = TimeBucket::ALL
            .iter()
            .filter(|b| !self.time(**b).is_zero())
            .map(|b| {
                let elapsed = self.time(*b);
                let whole = match b {
                    TimeBucket::Lexer | TimeBucket::Parser => self.time(TimeBucket::Parse),
                    _ => total,
                };
                StageTiming {
                    bucket: *b,
                    millis: elapsed.as_secs_f64() * 1000.0,
                    percent: percent(elapsed, whole),
                }
            })
            .collect();
        WorkflowStats {
            stage: self.stage,
            files: self.total_files(),
            chars: self.total_chars(),
            lines: self.total_lines(),
            errors: self.error_count(),
            skipped: self.skipped_count(),
            patterns: self.pattern_count(),
            matches: self.matches.lock().unwrap_or_else(PoisonError::into_inner).len(),
            cancelled: self.is_cancelled(),
            started_at: self.started_at,
            finished_at: self.finished_at(),
            timings: stages,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub bucket: TimeBucket,
    pub millis: f64,
    /// Share of the summed stage time; lexer and parser splits are a
    /// share of `parse`.
    pub percent: f64,
}

fn percent(part: Duration, whole: Duration) -> f64 {
    if whole.is_zero() {
        0.0
    } else {
        part.as_secs_f64() / whole.as_secs_f64() * 100.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStats {
    pub stage: Stage,
    pub files: usize,
    pub chars: usize,
    pub lines: usize,
    pub errors: usize,
    pub skipped: usize,
    pub patterns: usize,
    pub matches: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub timings: Vec<StageTiming>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poisoned_lists_keep_accepting_results() {
        let result = WorkflowResult::new(Stage::Match, Vec::new());
        std::thread::scope(|s| {
            let outcome = s
                .spawn(|| {
                    let _entities = result.entities.lock().unwrap();
                    let _finished = result.finished_at.lock().unwrap();
                    panic!("worker died holding the locks");
                })
                .join();
            assert!(outcome.is_err());
        });
        assert!(result.entities.is_poisoned());

        let file = Arc::new(CodeFile::new("a.py", "x = 1"));
        result.add_entity(ResultEntity::SourceFile(file));
        result.finish();
        assert_eq!(result.entities().len(), 1);
        assert!(result.finished_at().is_some());
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let result = WorkflowResult::new(Stage::Match, vec![Language::Python]);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        result.add_processed_file(10, 2);
                        result.add_time(TimeBucket::Parse, Duration::from_micros(1));
                    }
                });
            }
        });
        assert_eq!(result.total_files(), 800);
        assert_eq!(result.total_chars(), 8000);
        assert_eq!(result.total_lines(), 1600);
        assert_eq!(result.time(TimeBucket::Parse), Duration::from_micros(800));
    }

    #[test]
    fn stats_report_percentages() {
        let result = WorkflowResult::new(Stage::Match, Vec::new());
        result.add_time(TimeBucket::Read, Duration::from_millis(25));
        result.add_time(TimeBucket::Match, Duration::from_millis(75));
        result.finish();
        let stats = result.stats();
        assert_eq!(stats.timings.len(), 2);
        assert!((stats.timings[0].percent - 25.0).abs() < 1e-6);
        assert!((stats.timings[1].percent - 75.0).abs() < 1e-6);
        assert!(stats.finished_at.is_some());
    }
}
