use super::PatternNode;
use crate::error::Result;

/// Turns the textual `value` of a pattern description into a raw pattern
/// tree and back. One implementation per data format.
pub trait PatternSerializer: Send + Sync {
    /// Format name matched case-insensitively against `PatternDto::data_format`.
    fn format(&self) -> &str;

    fn deserialize(&self, value: &str) -> Result<PatternNode>;

    fn serialize(&self, node: &PatternNode) -> Result<String>;
}

/// Pattern trees written as `kind`-tagged JSON objects.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPatternSerializer {
    pub pretty: bool,
}

impl PatternSerializer for JsonPatternSerializer {
    fn format(&self) -> &str {
        "Json"
    }

    fn deserialize(&self, value: &str) -> Result<PatternNode> {
        Ok(serde_json::from_str(value)?)
    }

    fn serialize(&self, node: &PatternNode) -> Result<String> {
        let text = if self.pretty {
            serde_json::to_string_pretty(node)?
        } else {
            serde_json::to_string(node)?
        };
        Ok(text)
    }
}
