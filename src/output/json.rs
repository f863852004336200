use crate::error::Result;
use crate::matching::MatchResultDto;
use crate::workflow::{WorkflowResult, WorkflowStats};

use serde::Serialize;

#[derive(Serialize)]
struct JsonReport {
    matches: Vec<MatchResultDto>,
    statistics: WorkflowStats,
}

/// Render matches and statistics as a JSON report.
pub fn render(result: &WorkflowResult) -> Result<String> {
    let report = JsonReport {
        matches: result.matches().iter().map(|m| m.to_dto()).collect(),
        statistics: result.stats(),
    };
    let json = serde_json::to_string_pretty(&report)?;
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::sample_result;

    #[test]
    fn report_carries_dtos_and_stats() {
        let json = render(&sample_result()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let first = &value["matches"][0];
        assert_eq!(first["matched_code"], "x = 5");
        assert_eq!(first["begin_line"], 2);
        assert_eq!(first["pattern_key"], "x5");
        assert_eq!(value["statistics"]["files"], 1);
        assert_eq!(value["statistics"]["stage"], "match");
    }
}
