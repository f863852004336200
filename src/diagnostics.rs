//! Per-run diagnostic sink.
//!
//! A `Diagnostics` value is created for each run and handed to the
//! workflow, engine and detector explicitly, so concurrent runs never share
//! counters. Every line is also forwarded to `tracing`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::error::MatchError;
use crate::matching::MatchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Match,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: AtomicUsize,
    matches: AtomicUsize,
    messages: Mutex<Vec<Diagnostic>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&self, error: &MatchError) {
        tracing::error!("{error}");
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.push(DiagnosticLevel::Error, error.to_string());
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.push(DiagnosticLevel::Info, message);
    }

    pub fn match_found(&self, result: &MatchResult) {
        let location = result.span.to_line_column(&result.file.code);
        tracing::info!(
            key = %result.pattern.key,
            file = %result.file.relative_path,
            %location,
            "pattern matched"
        );
        self.matches.fetch_add(1, Ordering::Relaxed);
        self.push(
            DiagnosticLevel::Match,
            format!(
                "{}: {} at {}",
                result.pattern.key, result.file.relative_path, location
            ),
        );
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn match_count(&self) -> usize {
        self.matches.load(Ordering::Relaxed)
    }

    pub fn messages(&self) -> Vec<Diagnostic> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    fn push(&self, level: DiagnosticLevel, message: String) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(Diagnostic { level, message });
        }
    }
}
