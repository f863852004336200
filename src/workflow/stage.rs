use serde::{Deserialize, Serialize};

use crate::error::{MatchError, Result};

/// Per-file pipeline stages, in order, plus the file-independent
/// `Patterns` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Read,
    Parse,
    Convert,
    Preprocess,
    #[default]
    Match,
    /// Compile the pattern library only.
    Patterns,
}

impl Stage {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "read" => Some(Self::Read),
            "parse" => Some(Self::Parse),
            "convert" => Some(Self::Convert),
            "preprocess" => Some(Self::Preprocess),
            "match" => Some(Self::Match),
            "patterns" => Some(Self::Patterns),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Parse => "parse",
            Self::Convert => "convert",
            Self::Preprocess => "preprocess",
            Self::Match => "match",
            Self::Patterns => "patterns",
        };
        write!(f, "{name}")
    }
}

/// Stage predicates derived once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageHelper {
    pub stage: Stage,
    pub start: Stage,
    pub is_patterns: bool,
    pub contains_read: bool,
    pub contains_parse: bool,
    pub contains_convert: bool,
    pub contains_preprocess: bool,
    pub contains_match: bool,
    /// Inputs are unified-tree dumps rather than source files.
    pub loads_ust: bool,
}

impl StageHelper {
    pub fn new(stage: Stage, start: Option<Stage>) -> Result<Self> {
        if stage == Stage::Patterns {
            if start.is_some_and(|s| s != Stage::Patterns) {
                tracing::debug!("start stage ignored for a patterns-only run");
            }
            return Ok(Self {
                stage,
                start: Stage::Patterns,
                is_patterns: true,
                contains_read: false,
                contains_parse: false,
                contains_convert: false,
                contains_preprocess: false,
                contains_match: false,
                loads_ust: false,
            });
        }

        let start = match start.unwrap_or(Stage::Read) {
            // parsing needs the source text, so it starts with a read
            Stage::Parse => Stage::Read,
            Stage::Convert => {
                return Err(MatchError::Config(
                    "cannot start at convert: raw parse trees are not persisted".into(),
                ))
            }
            Stage::Patterns => {
                return Err(MatchError::Config(
                    "patterns is only valid as the stage itself".into(),
                ))
            }
            other => other,
        };
        if start > stage {
            return Err(MatchError::Config(format!(
                "start stage {start} comes after stage {stage}"
            )));
        }

        let loads_ust = start >= Stage::Preprocess;
        Ok(Self {
            stage,
            start,
            is_patterns: false,
            contains_read: true,
            contains_parse: !loads_ust && stage >= Stage::Parse,
            contains_convert: !loads_ust && stage >= Stage::Convert,
            contains_preprocess: stage >= Stage::Preprocess && start <= Stage::Preprocess,
            contains_match: stage >= Stage::Match,
            loads_ust,
        })
    }

    /// Whether the pattern library has to be compiled.
    pub fn needs_patterns(&self) -> bool {
        self.is_patterns || self.contains_match
    }
}
