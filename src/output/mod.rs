pub mod console;
pub mod json;
pub mod sarif;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::workflow::WorkflowResult;

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Console,
    Json,
    Sarif,
}

impl OutputFormat {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "console" | "text" => Some(Self::Console),
            "json" => Some(Self::Json),
            "sarif" => Some(Self::Sarif),
            _ => None,
        }
    }
}

/// Render a run's matches and statistics into the requested format.
pub fn render(result: &WorkflowResult, format: OutputFormat, target_name: &str) -> Result<String> {
    match format {
        OutputFormat::Console => Ok(console::render(result)),
        OutputFormat::Json => json::render(result),
        OutputFormat::Sarif => sarif::render(result, target_name),
    }
}
