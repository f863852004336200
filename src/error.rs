use thiserror::Error;

use crate::ust::TextSpan;

pub type Result<T> = std::result::Result<T, MatchError>;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Parse error in {file}: {message}")]
    Parsing { file: String, message: String },

    #[error("Pattern conversion error ({key}) at {span}: {message}")]
    Conversion {
        key: String,
        span: TextSpan,
        message: String,
    },

    #[error("Pattern compile error: {0}")]
    PatternCompile(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl MatchError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled => 130,
            _ => 2,
        }
    }

    pub fn parsing(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parsing {
            file: file.into(),
            message: message.into(),
        }
    }
}
